use crate::plate::PlateNumber;
use crate::types::{BoundingBox, EnrolledFace, SubjectType};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Display label for a face that matched nothing.
pub const UNKNOWN_LABEL: &str = "unknown";
/// Display label for an enrolled face with a blank name.
pub const UNNAMED_LABEL: &str = "enrolled (unnamed)";

/// Who a detection resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Face { id: i64, name: String },
    UnnamedFace { id: i64 },
    UnknownFace,
    /// `id` is set when the plate is enrolled.
    Plate { plate: PlateNumber, id: Option<i64> },
}

impl Identity {
    pub fn for_face(face: &EnrolledFace) -> Self {
        if face.is_unnamed() {
            Identity::UnnamedFace { id: face.id }
        } else {
            Identity::Face {
                id: face.id,
                name: face.name.clone(),
            }
        }
    }

    pub fn subject(&self) -> SubjectType {
        match self {
            Identity::Plate { .. } => SubjectType::Plate,
            _ => SubjectType::Face,
        }
    }

    /// Text shown next to the bounding box.
    pub fn label(&self) -> String {
        match self {
            Identity::Face { name, .. } => name.clone(),
            Identity::UnnamedFace { .. } => UNNAMED_LABEL.to_string(),
            Identity::UnknownFace => UNKNOWN_LABEL.to_string(),
            Identity::Plate { plate, .. } => plate.to_string(),
        }
    }

    /// Identifier written to the audit log.
    pub fn log_identifier(&self) -> String {
        match self {
            Identity::UnnamedFace { id } => format!("#{id}"),
            other => other.label(),
        }
    }

    /// True when the detection resolved to an enrolled record.
    pub fn is_enrolled(&self) -> bool {
        match self {
            Identity::Face { .. } | Identity::UnnamedFace { .. } => true,
            Identity::UnknownFace => false,
            Identity::Plate { id, .. } => id.is_some(),
        }
    }
}

/// Per-detection output of the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub identity: Identity,
    pub location: BoundingBox,
    pub allowed: bool,
    /// First qualifying observation of this identity in the current tracking window.
    pub is_new: bool,
    /// Set when the record is flagged for attention.
    pub alert: Option<DateTime<Utc>>,
    /// Distance to the closest enrolled face, for face verdicts.
    pub distance: Option<f32>,
}

impl Verdict {
    /// Overlay text: the label, with the alert time appended for flagged records.
    pub fn display_text(&self) -> String {
        match self.alert {
            Some(at) => format!(
                "{} - {}",
                self.identity.label(),
                at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            None => self.identity.label(),
        }
    }
}
