//! gatewatch-store — SQLite-backed registry.
//!
//! Three tables: `faces`, `plates` and the append-only `recognition_logs`.
//! Embeddings are stored as little-endian f32 blobs.

use chrono::{DateTime, Utc};
use gatewatch_core::registry::{Registry, RegistryError};
use gatewatch_core::{
    Embedding, EnrolledFace, EnrolledPlate, PlateNumber, RecognitionEvent, SubjectType,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL DEFAULT '',
    embedding      BLOB NOT NULL,
    image          BLOB NOT NULL,
    access_allowed INTEGER NOT NULL DEFAULT 1,
    marked         INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS plates (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    plate_number TEXT NOT NULL,
    marked       INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS recognition_logs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    type       TEXT NOT NULL,
    identifier TEXT NOT NULL,
    timestamp  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_recognition_logs_timestamp ON recognition_logs (timestamp);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

fn backend(e: rusqlite::Error) -> RegistryError {
    RegistryError::Backend(Box::new(e))
}

fn ensure_changed(kind: SubjectType, id: i64, changed: usize) -> Result<(), RegistryError> {
    if changed == 0 {
        return Err(RegistryError::NotFound { kind, id });
    }
    Ok(())
}

pub struct SqliteRegistry {
    conn: Connection,
}

impl SqliteRegistry {
    /// Open (or create) the database at `path`, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "database opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn set_flag(
        &mut self,
        kind: SubjectType,
        id: i64,
        marked: bool,
    ) -> Result<(), RegistryError> {
        let sql = match kind {
            SubjectType::Face => "UPDATE faces SET marked = ?1 WHERE id = ?2",
            SubjectType::Plate => "UPDATE plates SET marked = ?1 WHERE id = ?2",
        };
        let changed = self.conn.execute(sql, params![marked, id]).map_err(backend)?;
        ensure_changed(kind, id, changed)
    }
}

impl Registry for SqliteRegistry {
    fn snapshot_faces(&self) -> Result<Vec<EnrolledFace>, RegistryError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, embedding, image, access_allowed, marked FROM faces ORDER BY id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            })
            .map_err(backend)?;

        let mut faces = Vec::new();
        for row in rows {
            let (id, name, blob, image, access_allowed, marked) = row.map_err(backend)?;
            let Some(embedding) = Embedding::from_le_bytes(&blob) else {
                tracing::warn!(id, bytes = blob.len(), "skipping face with corrupt embedding blob");
                continue;
            };
            faces.push(EnrolledFace {
                id,
                name: name.unwrap_or_default(),
                embedding,
                access_allowed,
                marked,
                image,
            });
        }
        Ok(faces)
    }

    fn snapshot_plates(&self) -> Result<Vec<EnrolledPlate>, RegistryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, plate_number, marked FROM plates ORDER BY id")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .map_err(backend)?;

        let mut plates = Vec::new();
        for row in rows {
            let (id, text, marked) = row.map_err(backend)?;
            match PlateNumber::parse(&text) {
                Ok(plate) => plates.push(EnrolledPlate { id, plate, marked }),
                Err(e) => tracing::warn!(id, error = %e, "skipping stored plate"),
            }
        }
        Ok(plates)
    }

    fn append_event(&mut self, subject: SubjectType, identifier: &str) -> Result<(), RegistryError> {
        self.conn
            .execute(
                "INSERT INTO recognition_logs (type, identifier, timestamp) VALUES (?1, ?2, ?3)",
                params![subject.as_str(), identifier, Utc::now()],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<RecognitionEvent>, RegistryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, type, identifier, timestamp FROM recognition_logs
                 ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, DateTime<Utc>>(3)?,
                ))
            })
            .map_err(backend)?;

        let mut events = Vec::new();
        for row in rows {
            let (id, kind, identifier, timestamp) = row.map_err(backend)?;
            let subject = kind
                .parse::<SubjectType>()
                .map_err(|e| RegistryError::InvalidRecord(format!("log #{id}: {e}")))?;
            events.push(RecognitionEvent {
                id,
                subject,
                identifier,
                timestamp,
            });
        }
        Ok(events)
    }

    fn add_face(&mut self, name: &str, embedding: &Embedding, image: &[u8]) -> Result<i64, RegistryError> {
        self.conn
            .execute(
                "INSERT INTO faces (name, embedding, image) VALUES (?1, ?2, ?3)",
                params![name, embedding.to_le_bytes(), image],
            )
            .map_err(backend)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn rename_face(&mut self, id: i64, name: &str) -> Result<(), RegistryError> {
        let changed = self
            .conn
            .execute("UPDATE faces SET name = ?1 WHERE id = ?2", params![name, id])
            .map_err(backend)?;
        ensure_changed(SubjectType::Face, id, changed)
    }

    fn toggle_face_access(&mut self, id: i64) -> Result<bool, RegistryError> {
        let tx = self.conn.transaction().map_err(backend)?;
        let current: Option<bool> = tx
            .query_row(
                "SELECT access_allowed FROM faces WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        let Some(current) = current else {
            return Err(RegistryError::NotFound {
                kind: SubjectType::Face,
                id,
            });
        };
        tx.execute(
            "UPDATE faces SET access_allowed = ?1 WHERE id = ?2",
            params![!current, id],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(!current)
    }

    fn set_face_marked(&mut self, id: i64, marked: bool) -> Result<(), RegistryError> {
        self.set_flag(SubjectType::Face, id, marked)
    }

    fn mark_all_faces(&mut self) -> Result<usize, RegistryError> {
        self.conn
            .execute("UPDATE faces SET marked = 1", [])
            .map_err(backend)
    }

    fn delete_face(&mut self, id: i64) -> Result<(), RegistryError> {
        let changed = self
            .conn
            .execute("DELETE FROM faces WHERE id = ?1", [id])
            .map_err(backend)?;
        ensure_changed(SubjectType::Face, id, changed)
    }

    fn add_plate(&mut self, plate: &PlateNumber) -> Result<i64, RegistryError> {
        self.conn
            .execute(
                "INSERT INTO plates (plate_number) VALUES (?1)",
                [plate.as_str()],
            )
            .map_err(backend)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn set_plate_marked(&mut self, id: i64, marked: bool) -> Result<(), RegistryError> {
        self.set_flag(SubjectType::Plate, id, marked)
    }

    fn delete_plate(&mut self, id: i64) -> Result<(), RegistryError> {
        let changed = self
            .conn
            .execute("DELETE FROM plates WHERE id = ?1", [id])
            .map_err(backend)?;
        ensure_changed(SubjectType::Plate, id, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> SqliteRegistry {
        SqliteRegistry::open_in_memory().unwrap()
    }

    #[test]
    fn test_face_roundtrip_defaults() {
        let mut reg = registry();
        let embedding = Embedding::new(vec![0.25, -1.5, 3.0]);
        let id = reg.add_face("Ayşe", &embedding, b"\xff\xd8jpeg").unwrap();

        let faces = reg.snapshot_faces().unwrap();
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!(face.id, id);
        assert_eq!(face.name, "Ayşe");
        assert_eq!(face.embedding, embedding);
        assert_eq!(face.image, b"\xff\xd8jpeg");
        assert!(face.access_allowed);
        assert!(!face.marked);
    }

    #[test]
    fn test_face_updates() {
        let mut reg = registry();
        let id = reg.add_face("", &Embedding::new(vec![1.0]), &[]).unwrap();

        assert!(!reg.toggle_face_access(id).unwrap());
        assert!(reg.toggle_face_access(id).unwrap());
        reg.rename_face(id, "Ali").unwrap();
        reg.set_face_marked(id, true).unwrap();

        let face = &reg.snapshot_faces().unwrap()[0];
        assert_eq!(face.name, "Ali");
        assert!(face.marked);
        assert!(face.access_allowed);
    }

    #[test]
    fn test_missing_face_is_not_found() {
        let mut reg = registry();
        assert!(matches!(
            reg.toggle_face_access(42),
            Err(RegistryError::NotFound { kind: SubjectType::Face, id: 42 })
        ));
        assert!(matches!(reg.rename_face(42, "x"), Err(RegistryError::NotFound { .. })));
        assert!(matches!(reg.delete_face(42), Err(RegistryError::NotFound { .. })));
        assert!(matches!(
            reg.set_plate_marked(42, true),
            Err(RegistryError::NotFound { kind: SubjectType::Plate, .. })
        ));
    }

    #[test]
    fn test_mark_all_and_delete() {
        let mut reg = registry();
        let a = reg.add_face("a", &Embedding::new(vec![1.0]), &[]).unwrap();
        reg.add_face("b", &Embedding::new(vec![2.0]), &[]).unwrap();
        assert_eq!(reg.mark_all_faces().unwrap(), 2);
        assert!(reg.snapshot_faces().unwrap().iter().all(|f| f.marked));

        reg.delete_face(a).unwrap();
        assert_eq!(reg.snapshot_faces().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_embedding_row_is_skipped() {
        let mut reg = registry();
        reg.add_face("ok", &Embedding::new(vec![1.0]), &[]).unwrap();
        reg.conn
            .execute(
                "INSERT INTO faces (name, embedding, image) VALUES ('bad', x'010203', x'')",
                [],
            )
            .unwrap();

        let faces = reg.snapshot_faces().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name, "ok");
    }

    #[test]
    fn test_plates() {
        let mut reg = registry();
        let id = reg.add_plate(&PlateNumber::parse("34 AB 1234").unwrap()).unwrap();
        reg.conn
            .execute("INSERT INTO plates (plate_number) VALUES ('garbage')", [])
            .unwrap();

        reg.set_plate_marked(id, true).unwrap();
        let plates = reg.snapshot_plates().unwrap();
        assert_eq!(plates.len(), 1);
        assert_eq!(plates[0].plate.as_str(), "34 AB 1234");
        assert!(plates[0].marked);

        reg.delete_plate(id).unwrap();
        assert!(reg.snapshot_plates().unwrap().is_empty());
    }

    #[test]
    fn test_events_newest_first() {
        let mut reg = registry();
        reg.append_event(SubjectType::Plate, "34 AB 1234").unwrap();
        reg.append_event(SubjectType::Face, "Ayşe").unwrap();
        reg.append_event(SubjectType::Face, "#3").unwrap();

        let events = reg.recent_events(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].identifier, "#3");
        assert_eq!(events[1].identifier, "Ayşe");
        assert!(events[0].timestamp >= events[1].timestamp);

        let all = reg.recent_events(10).unwrap();
        assert_eq!(all[2].subject, SubjectType::Plate);
    }

    #[test]
    fn test_unknown_event_type_is_invalid_record() {
        let mut reg = registry();
        reg.conn
            .execute(
                "INSERT INTO recognition_logs (type, identifier, timestamp) VALUES ('car', 'x', ?1)",
                [Utc::now()],
            )
            .unwrap();
        assert!(matches!(reg.recent_events(5), Err(RegistryError::InvalidRecord(_))));
    }

    #[test]
    fn test_reopen_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("recognition.db");
        {
            let mut reg = SqliteRegistry::open(&path).unwrap();
            reg.add_plate(&PlateNumber::parse("06 A 12").unwrap()).unwrap();
        }
        let reg = SqliteRegistry::open(&path).unwrap();
        assert_eq!(reg.snapshot_plates().unwrap().len(), 1);
    }
}
