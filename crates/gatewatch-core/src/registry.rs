//! Registry contract: enrolled faces, enrolled plates and the event log.
//!
//! Each call is atomic on its own. Callers serialize concurrent use.

use crate::plate::PlateNumber;
use crate::types::{Embedding, EnrolledFace, EnrolledPlate, RecognitionEvent, SubjectType};
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{kind} #{id} not found")]
    NotFound { kind: SubjectType, id: i64 },
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    #[error("registry backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub trait Registry {
    fn snapshot_faces(&self) -> Result<Vec<EnrolledFace>, RegistryError>;
    fn snapshot_plates(&self) -> Result<Vec<EnrolledPlate>, RegistryError>;

    /// Append to the audit log with the current time.
    fn append_event(&mut self, subject: SubjectType, identifier: &str) -> Result<(), RegistryError>;
    /// Most recent events first.
    fn recent_events(&self, limit: usize) -> Result<Vec<RecognitionEvent>, RegistryError>;

    /// New faces start with access allowed and unmarked.
    fn add_face(&mut self, name: &str, embedding: &Embedding, image: &[u8]) -> Result<i64, RegistryError>;
    fn rename_face(&mut self, id: i64, name: &str) -> Result<(), RegistryError>;
    /// Flip the access flag and return its new value.
    fn toggle_face_access(&mut self, id: i64) -> Result<bool, RegistryError>;
    fn set_face_marked(&mut self, id: i64, marked: bool) -> Result<(), RegistryError>;
    /// Returns the number of faces updated.
    fn mark_all_faces(&mut self) -> Result<usize, RegistryError>;
    fn delete_face(&mut self, id: i64) -> Result<(), RegistryError>;

    fn add_plate(&mut self, plate: &PlateNumber) -> Result<i64, RegistryError>;
    fn set_plate_marked(&mut self, id: i64, marked: bool) -> Result<(), RegistryError>;
    fn delete_plate(&mut self, id: i64) -> Result<(), RegistryError>;
}

/// In-process registry. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    faces: Vec<EnrolledFace>,
    plates: Vec<EnrolledPlate>,
    events: Vec<RecognitionEvent>,
    next_id: i64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn face_mut(&mut self, id: i64) -> Result<&mut EnrolledFace, RegistryError> {
        self.faces
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(RegistryError::NotFound {
                kind: SubjectType::Face,
                id,
            })
    }

    fn plate_mut(&mut self, id: i64) -> Result<&mut EnrolledPlate, RegistryError> {
        self.plates
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(RegistryError::NotFound {
                kind: SubjectType::Plate,
                id,
            })
    }
}

impl Registry for MemoryRegistry {
    fn snapshot_faces(&self) -> Result<Vec<EnrolledFace>, RegistryError> {
        Ok(self.faces.clone())
    }

    fn snapshot_plates(&self) -> Result<Vec<EnrolledPlate>, RegistryError> {
        Ok(self.plates.clone())
    }

    fn append_event(&mut self, subject: SubjectType, identifier: &str) -> Result<(), RegistryError> {
        let id = self.allocate_id();
        self.events.push(RecognitionEvent {
            id,
            subject,
            identifier: identifier.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<RecognitionEvent>, RegistryError> {
        Ok(self.events.iter().rev().take(limit).cloned().collect())
    }

    fn add_face(&mut self, name: &str, embedding: &Embedding, image: &[u8]) -> Result<i64, RegistryError> {
        let id = self.allocate_id();
        self.faces.push(EnrolledFace {
            id,
            name: name.to_string(),
            embedding: embedding.clone(),
            access_allowed: true,
            marked: false,
            image: image.to_vec(),
        });
        Ok(id)
    }

    fn rename_face(&mut self, id: i64, name: &str) -> Result<(), RegistryError> {
        self.face_mut(id)?.name = name.to_string();
        Ok(())
    }

    fn toggle_face_access(&mut self, id: i64) -> Result<bool, RegistryError> {
        let face = self.face_mut(id)?;
        face.access_allowed = !face.access_allowed;
        Ok(face.access_allowed)
    }

    fn set_face_marked(&mut self, id: i64, marked: bool) -> Result<(), RegistryError> {
        self.face_mut(id)?.marked = marked;
        Ok(())
    }

    fn mark_all_faces(&mut self) -> Result<usize, RegistryError> {
        self.faces.iter_mut().for_each(|f| f.marked = true);
        Ok(self.faces.len())
    }

    fn delete_face(&mut self, id: i64) -> Result<(), RegistryError> {
        let before = self.faces.len();
        self.faces.retain(|f| f.id != id);
        if self.faces.len() == before {
            return Err(RegistryError::NotFound {
                kind: SubjectType::Face,
                id,
            });
        }
        Ok(())
    }

    fn add_plate(&mut self, plate: &PlateNumber) -> Result<i64, RegistryError> {
        let id = self.allocate_id();
        self.plates.push(EnrolledPlate {
            id,
            plate: plate.clone(),
            marked: false,
        });
        Ok(id)
    }

    fn set_plate_marked(&mut self, id: i64, marked: bool) -> Result<(), RegistryError> {
        self.plate_mut(id)?.marked = marked;
        Ok(())
    }

    fn delete_plate(&mut self, id: i64) -> Result<(), RegistryError> {
        let before = self.plates.len();
        self.plates.retain(|p| p.id != id);
        if self.plates.len() == before {
            return Err(RegistryError::NotFound {
                kind: SubjectType::Plate,
                id,
            });
        }
        Ok(())
    }
}
