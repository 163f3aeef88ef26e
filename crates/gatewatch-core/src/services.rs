//! Capability interfaces for the model-backed services.
//!
//! The engine only sees these traits, so detection/OCR backends can be swapped
//! without touching matching or decision logic.

use crate::types::{FaceDetection, Frame};
use image::GrayImage;
use std::collections::VecDeque;
use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The backend is not ready. The current cycle produces no data.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// A single call failed. Treated as an empty result.
    #[error("service call failed: {0}")]
    Failed(String),
}

/// Locates faces in a frame and returns one embedding per face.
pub trait FaceEmbedder {
    fn embed(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>, ServiceError>;
}

/// Reads text from a binarized plate crop.
pub trait PlateReader {
    fn read(&mut self, crop: &GrayImage) -> Result<String, ServiceError>;
}

/// Serves precomputed detections, one recorded frame per call.
///
/// The recording is a JSON array of frames, each an array of
/// `{"bbox": {...}, "embedding": [...]}` objects.
#[derive(Debug, Clone, Default)]
pub struct ReplayEmbedder {
    frames: VecDeque<Vec<FaceDetection>>,
}

impl ReplayEmbedder {
    pub fn new(frames: Vec<Vec<FaceDetection>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn from_json<R: Read>(reader: R) -> Result<Self, serde_json::Error> {
        let frames: Vec<Vec<FaceDetection>> = serde_json::from_reader(reader)?;
        Ok(Self::new(frames))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FaceEmbedder for ReplayEmbedder {
    fn embed(&mut self, _frame: &Frame) -> Result<Vec<FaceDetection>, ServiceError> {
        self.frames
            .pop_front()
            .ok_or_else(|| ServiceError::Unavailable("recording exhausted".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};
    use image::DynamicImage;

    fn frame() -> Frame {
        Frame::new(DynamicImage::new_luma8(4, 4), 0)
    }

    #[test]
    fn test_replay_serves_frames_in_order() {
        let json = r#"[
            [{"bbox": {"x": 1, "y": 2, "width": 3, "height": 4}, "embedding": [0.5, 0.25]}],
            []
        ]"#;
        let mut replay = ReplayEmbedder::from_json(json.as_bytes()).unwrap();
        assert_eq!(replay.remaining(), 2);

        let first = replay.embed(&frame()).unwrap();
        assert_eq!(
            first,
            vec![FaceDetection {
                bbox: BoundingBox::new(1, 2, 3, 4),
                embedding: Embedding::new(vec![0.5, 0.25]),
            }]
        );
        assert!(replay.embed(&frame()).unwrap().is_empty());
        assert!(matches!(replay.embed(&frame()), Err(ServiceError::Unavailable(_))));
    }

    #[test]
    fn test_replay_rejects_bad_json() {
        assert!(ReplayEmbedder::from_json("{".as_bytes()).is_err());
    }
}
