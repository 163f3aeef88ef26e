//! gatewatch-core — face and licence-plate identity matching and access decisions.
//!
//! Face embeddings are compared against an enrolled gallery by Euclidean
//! distance; plates are located by contour analysis, read through an OCR
//! backend and validated against the plate grammar. Model backends sit behind
//! the traits in [`services`].

pub mod engine;
pub mod extractor;
pub mod gate;
pub mod matcher;
pub mod plate;
pub mod registry;
pub mod services;
pub mod tracking;
pub mod types;
pub mod verdict;

pub use engine::{
    AccessPolicy, CommandOutcome, DecisionEngine, EngineConfig, EngineError, EnrollmentCommand,
    RecognitionMode,
};
pub use gate::{GateDecision, GateState, Turnstile};
pub use plate::PlateNumber;
pub use registry::{MemoryRegistry, Registry, RegistryError};
pub use services::{FaceEmbedder, PlateReader, ReplayEmbedder, ServiceError};
pub use types::{
    BoundingBox, Embedding, EnrolledFace, EnrolledPlate, FaceDetection, Frame, PlateRead,
    RecognitionEvent, SubjectType,
};
pub use verdict::{Identity, Verdict};
