//! Matching live identities against the enrolled registry snapshot.

use crate::plate::PlateNumber;
use crate::types::{Embedding, EnrolledFace, EnrolledPlate};
use thiserror::Error;

/// Default acceptance distance for 128-dim face embeddings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Default embedding dimensionality.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    /// Gallery index of the accepted match, if the closest entry is under the threshold.
    pub best: Option<usize>,
    /// Distance to every gallery entry, `None` where the stored vector is malformed.
    pub distances: Vec<Option<f32>>,
}

impl FaceMatch {
    /// Closest comparable entry regardless of threshold. Earliest index wins ties.
    pub fn closest(&self) -> Option<(usize, f32)> {
        let mut closest: Option<(usize, f32)> = None;
        for (i, d) in self.distances.iter().enumerate() {
            if let Some(d) = *d {
                if closest.map_or(true, |(_, best)| d < best) {
                    closest = Some((i, d));
                }
            }
        }
        closest
    }

    /// Distance of the accepted match.
    pub fn best_distance(&self) -> Option<f32> {
        self.best.and_then(|i| self.distances.get(i).copied().flatten())
    }
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait FaceMatcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[EnrolledFace],
        threshold: f32,
    ) -> Result<FaceMatch, MatchError>;
}

/// Euclidean distance matcher over fixed-dimension embeddings.
///
/// Every gallery entry is visited; stored vectors of the wrong shape are
/// skipped rather than compared.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub dim: usize,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            dim: DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Reject queries that cannot be compared against this gallery.
    pub fn check(&self, embedding: &Embedding) -> Result<(), MatchError> {
        if embedding.dim() != self.dim {
            return Err(MatchError::Dimension {
                expected: self.dim,
                actual: embedding.dim(),
            });
        }
        if !embedding.values.iter().all(|v| v.is_finite()) {
            return Err(MatchError::NonFinite);
        }
        Ok(())
    }
}

impl FaceMatcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[EnrolledFace],
        threshold: f32,
    ) -> Result<FaceMatch, MatchError> {
        self.check(query)?;

        let distances: Vec<Option<f32>> = gallery
            .iter()
            .map(|face| {
                face.embedding
                    .is_well_formed(self.dim)
                    .then(|| query.euclidean_distance(&face.embedding))
            })
            .collect();

        let mut result = FaceMatch {
            best: None,
            distances,
        };
        result.best = match result.closest() {
            Some((idx, d)) if d < threshold => Some(idx),
            _ => None,
        };
        Ok(result)
    }
}

/// Exact match of a normalized plate against the enrolled plates.
pub fn match_plate<'a>(
    candidate: &PlateNumber,
    plates: &'a [EnrolledPlate],
) -> Option<&'a EnrolledPlate> {
    plates.iter().find(|p| &p.plate == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(id: i64, name: &str, values: Vec<f32>) -> EnrolledFace {
        EnrolledFace {
            id,
            name: name.into(),
            embedding: Embedding::new(values),
            access_allowed: true,
            marked: false,
            image: Vec::new(),
        }
    }

    #[test]
    fn test_matcher_visits_whole_gallery() {
        // Best match is the last entry.
        let query = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            face(1, "decoy1", vec![0.0, 1.0, 0.0]),
            face(2, "decoy2", vec![0.0, 0.0, 1.0]),
            face(3, "match", vec![0.9, 0.1, 0.0]),
        ];

        let result = EuclideanMatcher::new(3).compare(&query, &gallery, 0.6).unwrap();
        assert_eq!(result.best, Some(2));
        assert_eq!(result.distances.len(), 3);
        assert!(result.distances.iter().all(Option::is_some));
        assert!(result.best_distance().unwrap() < 0.2);
    }

    #[test]
    fn test_matcher_rejects_above_threshold() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![face(1, "far", vec![0.0, 1.0])];

        let result = EuclideanMatcher::new(2).compare(&query, &gallery, 0.6).unwrap();
        assert_eq!(result.best, None);
        let (idx, d) = result.closest().unwrap();
        assert_eq!(idx, 0);
        assert!((d - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_threshold_is_strict() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![face(1, "edge", vec![0.5, 0.0])];

        let matcher = EuclideanMatcher::new(2);
        assert_eq!(matcher.compare(&query, &gallery, 0.5).unwrap().best, None);
        assert_eq!(matcher.compare(&query, &gallery, 0.51).unwrap().best, Some(0));
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let result = EuclideanMatcher::new(2).compare(&query, &[], 0.6).unwrap();
        assert_eq!(result.best, None);
        assert!(result.distances.is_empty());
        assert!(result.closest().is_none());
    }

    #[test]
    fn test_matcher_tie_picks_first() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            face(1, "a", vec![0.1, 0.0]),
            face(2, "b", vec![0.0, 0.1]),
        ];
        let result = EuclideanMatcher::new(2).compare(&query, &gallery, 0.6).unwrap();
        assert_eq!(result.best, Some(0));
    }

    #[test]
    fn test_matcher_skips_malformed_gallery_entry() {
        let query = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            face(1, "short", vec![1.0]),
            face(2, "nan", vec![1.0, f32::NAN]),
            face(3, "ok", vec![1.0, 0.1]),
        ];
        let result = EuclideanMatcher::new(2).compare(&query, &gallery, 0.6).unwrap();
        assert_eq!(result.distances[0], None);
        assert_eq!(result.distances[1], None);
        assert_eq!(result.best, Some(2));
    }

    #[test]
    fn test_matcher_rejects_malformed_query() {
        let gallery = vec![face(1, "ok", vec![1.0, 0.0])];
        let matcher = EuclideanMatcher::new(2);

        assert_eq!(
            matcher.compare(&Embedding::new(vec![1.0, 0.0, 0.0]), &gallery, 0.6),
            Err(MatchError::Dimension { expected: 2, actual: 3 })
        );
        assert_eq!(
            matcher.compare(&Embedding::new(vec![f32::INFINITY, 0.0]), &gallery, 0.6),
            Err(MatchError::NonFinite)
        );
    }

    #[test]
    fn test_matcher_is_deterministic() {
        let query = Embedding::new(vec![0.3, 0.4]);
        let gallery = vec![face(1, "a", vec![0.3, 0.5]), face(2, "b", vec![0.0, 0.0])];
        let matcher = EuclideanMatcher::new(2);
        let first = matcher.compare(&query, &gallery, 0.6).unwrap();
        for _ in 0..5 {
            assert_eq!(matcher.compare(&query, &gallery, 0.6).unwrap(), first);
        }
    }

    #[test]
    fn test_match_plate_exact_only() {
        let plates = vec![
            EnrolledPlate {
                id: 7,
                plate: PlateNumber::parse("34 AB 1234").unwrap(),
                marked: true,
            },
        ];
        let hit = PlateNumber::parse("34 ab 1234").unwrap();
        let miss = PlateNumber::parse("34 AB 1235").unwrap();

        assert_eq!(match_plate(&hit, &plates).map(|p| p.id), Some(7));
        assert!(match_plate(&miss, &plates).is_none());
    }
}
