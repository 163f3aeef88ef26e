use crate::plate::PlateNumber;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Face embedding vector (128-dimensional for the default model family).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when the vector has exactly `dim` finite components.
    pub fn is_well_formed(&self, dim: usize) -> bool {
        self.values.len() == dim && self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers are expected to have checked dimensionality; extra trailing
    /// components on either side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Serialize as packed little-endian `f32` values.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Returns `None` when the
    /// byte length is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self { values })
    }
}

/// An enrolled face record, as held in the registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrolledFace {
    pub id: i64,
    /// Display name. Not unique; may be blank for nameless enrollments.
    pub name: String,
    #[serde(skip_serializing)]
    pub embedding: Embedding,
    pub access_allowed: bool,
    pub marked: bool,
    /// Source image bytes, kept for display only.
    #[serde(skip_serializing)]
    pub image: Vec<u8>,
}

impl EnrolledFace {
    pub fn is_unnamed(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// An enrolled plate record. The plate text always satisfies the plate grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrolledPlate {
    pub id: i64,
    pub plate: PlateNumber,
    pub marked: bool,
}

/// Kind of identity a recognition event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Face,
    Plate,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Face => "face",
            SubjectType::Plate => "plate",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(SubjectType::Face),
            "plate" => Ok(SubjectType::Plate),
            other => Err(format!("unknown subject type: {other}")),
        }
    }
}

/// Append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionEvent {
    pub id: i64,
    pub subject: SubjectType,
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
}

/// A frame handed to the engine by the caller.
#[derive(Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }
}

/// One located face with its raw embedding, as returned by a [`FaceEmbedder`](crate::services::FaceEmbedder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Raw OCR output for one plate candidate, before grammar validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateRead {
    pub bbox: BoundingBox,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_well_formed_checks_dim_and_finiteness() {
        assert!(Embedding::new(vec![0.0; 4]).is_well_formed(4));
        assert!(!Embedding::new(vec![0.0; 3]).is_well_formed(4));
        assert!(!Embedding::new(vec![0.0, f32::NAN, 0.0, 0.0]).is_well_formed(4));
    }

    #[test]
    fn test_le_bytes_rejects_truncated_blob() {
        let bytes = Embedding::new(vec![1.5, -2.0]).to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(
            Embedding::from_le_bytes(&bytes),
            Some(Embedding::new(vec![1.5, -2.0]))
        );
        assert!(Embedding::from_le_bytes(&bytes[..7]).is_none());
    }

    #[test]
    fn test_unnamed_face() {
        let face = EnrolledFace {
            id: 1,
            name: "  ".into(),
            embedding: Embedding::default(),
            access_allowed: true,
            marked: false,
            image: Vec::new(),
        };
        assert!(face.is_unnamed());
    }

    #[test]
    fn test_subject_type_parse() {
        assert_eq!("face".parse::<SubjectType>(), Ok(SubjectType::Face));
        assert_eq!("plate".parse::<SubjectType>(), Ok(SubjectType::Plate));
        assert!("car".parse::<SubjectType>().is_err());
    }
}
