//! Per-frame decision engine.
//!
//! Owns the registry handle, the in-memory snapshot of enrolled records and
//! the session's tracking state. Frames are processed one at a time, start to
//! finish; nothing in the frame path is fatal except an unavailable service.

use crate::extractor::{ExtractorConfig, PlateCandidateExtractor};
use crate::gate::{Gate, GateDecision, GateError, GateState};
use crate::matcher::{
    match_plate, EuclideanMatcher, FaceMatcher, MatchError, DEFAULT_EMBEDDING_DIM,
    DEFAULT_MATCH_THRESHOLD,
};
use crate::plate::{PlateError, PlateNumber};
use crate::registry::{Registry, RegistryError};
use crate::services::{FaceEmbedder, PlateReader, ServiceError};
use crate::tracking::{Observation, TrackKey, Tracker};
use crate::types::{
    Embedding, EnrolledFace, EnrolledPlate, FaceDetection, Frame, PlateRead, SubjectType,
};
use crate::verdict::{Identity, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;

/// Which enrolled-face flag makes a match worth logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Turnstile mode: log matches whose access flag is set.
    #[default]
    Access,
    /// Screening mode: log matches on marked faces and raise an alert.
    Marked,
}

impl AccessPolicy {
    pub fn qualifies(self, face: &EnrolledFace) -> bool {
        match self {
            AccessPolicy::Access => face.access_allowed,
            AccessPolicy::Marked => face.marked,
        }
    }
}

impl FromStr for AccessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "access" => Ok(AccessPolicy::Access),
            "marked" => Ok(AccessPolicy::Marked),
            other => Err(format!("unknown policy: {other} (expected access or marked)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    Face,
    Plate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum Euclidean distance accepted as the same face.
    pub match_threshold: f32,
    pub embedding_dim: usize,
    pub policy: AccessPolicy,
    /// Absence after which an identity counts as new again. 0 keeps entries for the session.
    pub tracking_ttl_secs: u64,
    /// Insert newly seen valid plates into the registry.
    pub auto_save: bool,
    pub extractor: ExtractorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            policy: AccessPolicy::default(),
            tracking_ttl_secs: 60,
            auto_save: false,
            extractor: ExtractorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the frame path cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::new("match_threshold", "must be a finite value above 0"));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::new("embedding_dim", "must be at least 1"));
        }
        self.extractor.validate()
    }

    pub fn tracking_ttl(&self) -> Option<chrono::Duration> {
        if self.tracking_ttl_secs == 0 {
            return None;
        }
        chrono::Duration::from_std(std::time::Duration::from_secs(self.tracking_ttl_secs)).ok()
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no data: {service} service unavailable: {reason}")]
    ServiceUnavailable { service: &'static str, reason: String },
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    InvalidPlate(#[from] PlateError),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(#[from] MatchError),
    #[error("gate error: {0}")]
    Gate(#[from] GateError),
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid setting {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// Enrollment edits from the caller. Validated before they reach the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentCommand {
    AddFace {
        name: String,
        embedding: Embedding,
        image: Vec<u8>,
    },
    AddPlate { text: String },
    RenameFace { id: i64, name: String },
    ToggleFaceAccess { id: i64 },
    MarkFace { id: i64 },
    UnmarkFace { id: i64 },
    MarkAllFaces,
    DeleteFace { id: i64 },
    MarkPlate { id: i64 },
    UnmarkPlate { id: i64 },
    DeletePlate { id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Added(i64),
    Updated,
    AccessAllowed(bool),
    Marked(usize),
}

pub struct DecisionEngine<R: Registry> {
    registry: R,
    config: EngineConfig,
    matcher: EuclideanMatcher,
    extractor: PlateCandidateExtractor,
    embedder: Option<Box<dyn FaceEmbedder>>,
    reader: Option<Box<dyn PlateReader>>,
    faces: Vec<EnrolledFace>,
    plates: Vec<EnrolledPlate>,
    tracker: Tracker,
    gate: Gate,
}

impl<R: Registry> DecisionEngine<R> {
    /// Open a session over `registry` and load the initial snapshot.
    pub fn new(registry: R, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let mut engine = Self {
            matcher: EuclideanMatcher::new(config.embedding_dim),
            extractor: PlateCandidateExtractor::new(config.extractor.clone()),
            tracker: Tracker::new(config.tracking_ttl()),
            registry,
            config,
            embedder: None,
            reader: None,
            faces: Vec::new(),
            plates: Vec::new(),
            gate: Gate::new(),
        };
        engine.refresh()?;
        tracing::info!(
            faces = engine.faces.len(),
            plates = engine.plates.len(),
            policy = ?engine.config.policy,
            threshold = engine.config.match_threshold,
            "session started"
        );
        Ok(engine)
    }

    pub fn with_embedder(mut self, embedder: Box<dyn FaceEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_plate_reader(mut self, reader: Box<dyn PlateReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Reload enrolled faces and plates. On failure the previous snapshot is kept.
    pub fn refresh(&mut self) -> Result<(), EngineError> {
        let faces = self.registry.snapshot_faces()?;
        let plates = self.registry.snapshot_plates()?;
        let malformed = faces
            .iter()
            .filter(|f| !f.embedding.is_well_formed(self.config.embedding_dim))
            .count();
        if malformed > 0 {
            tracing::warn!(
                malformed,
                expected_dim = self.config.embedding_dim,
                "enrolled faces with malformed embeddings will never match"
            );
        }
        self.faces = faces;
        self.plates = plates;
        Ok(())
    }

    pub fn faces(&self) -> &[EnrolledFace] {
        &self.faces
    }

    pub fn plates(&self) -> &[EnrolledPlate] {
        &self.plates
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn auto_save(&self) -> bool {
        self.config.auto_save
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        tracing::info!(enabled, "auto-save toggled");
        self.config.auto_save = enabled;
    }

    pub fn tracked_identities(&self) -> usize {
        self.tracker.len()
    }

    pub fn gate_state(&self) -> &GateState {
        self.gate.state()
    }

    /// Dismiss the held gate decision.
    pub fn reset_gate(&mut self) {
        self.gate.reset();
    }

    /// Close the session: drop tracking state and hand the registry back.
    pub fn end_session(mut self) -> R {
        tracing::info!(tracked = self.tracker.len(), "session ended");
        self.tracker.clear();
        self.registry
    }

    /// Run the face flow on one frame.
    pub fn process_faces(&mut self, frame: &Frame) -> Result<Vec<Verdict>, EngineError> {
        let embedder = self
            .embedder
            .as_mut()
            .ok_or_else(|| EngineError::ServiceUnavailable {
                service: "embedding",
                reason: "no backend configured".into(),
            })?;

        let detections = match embedder.embed(frame) {
            Ok(d) => d,
            Err(ServiceError::Unavailable(reason)) => {
                return Err(EngineError::ServiceUnavailable {
                    service: "embedding",
                    reason,
                })
            }
            Err(ServiceError::Failed(reason)) => {
                tracing::warn!(frame = frame.sequence, %reason, "embedding failed; treating frame as empty");
                Vec::new()
            }
        };

        let verdicts = self.decide_faces(detections, frame.captured_at);
        tracing::debug!(frame = frame.sequence, faces = verdicts.len(), "face frame processed");
        Ok(verdicts)
    }

    /// Resolve already-extracted face detections observed at `now`.
    pub fn decide_faces(&mut self, detections: Vec<FaceDetection>, now: DateTime<Utc>) -> Vec<Verdict> {
        self.tracker.evict_stale(now);

        let mut verdicts = Vec::with_capacity(detections.len());
        for detection in detections {
            let result = match self.matcher.compare(
                &detection.embedding,
                &self.faces,
                self.config.match_threshold,
            ) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, bbox = ?detection.bbox, "skipping malformed face detection");
                    continue;
                }
            };

            let Some(idx) = result.best else {
                verdicts.push(Verdict {
                    identity: Identity::UnknownFace,
                    location: detection.bbox,
                    allowed: false,
                    is_new: false,
                    alert: None,
                    distance: result.closest().map(|(_, d)| d),
                });
                continue;
            };

            let face = &self.faces[idx];
            let identity = Identity::for_face(face);
            let allowed = face.access_allowed;
            let qualifies = self.config.policy.qualifies(face);
            let flagged = self.config.policy == AccessPolicy::Marked && face.marked;
            let key = TrackKey::Face(face.id);

            // Only qualifying matches enter tracking, so a face that starts to
            // qualify mid-presence is still logged on its first qualifying frame.
            let is_new = qualifies && self.tracker.observe(key, now) == Observation::First;
            if is_new {
                self.log_event(identity.subject(), &identity.log_identifier());
            }
            if flagged && is_new {
                tracing::warn!(identity = %identity.label(), "marked face recognized");
            }

            verdicts.push(Verdict {
                identity,
                location: detection.bbox,
                allowed,
                is_new,
                alert: flagged.then_some(now),
                distance: result.best_distance(),
            });
        }
        verdicts
    }

    /// Run the plate flow on one frame.
    pub fn process_plates(&mut self, frame: &Frame) -> Result<Vec<Verdict>, EngineError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| EngineError::ServiceUnavailable {
                service: "ocr",
                reason: "no backend configured".into(),
            })?;

        let candidates = self.extractor.extract(&frame.image);
        let mut reads = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match reader.read(&candidate.crop) {
                Ok(text) => reads.push(PlateRead {
                    bbox: candidate.bbox,
                    text,
                }),
                Err(ServiceError::Unavailable(reason)) => {
                    return Err(EngineError::ServiceUnavailable {
                        service: "ocr",
                        reason,
                    })
                }
                Err(ServiceError::Failed(reason)) => {
                    tracing::warn!(frame = frame.sequence, bbox = ?candidate.bbox, %reason, "OCR failed; skipping candidate");
                }
            }
        }

        let verdicts = self.decide_plates(reads, frame.captured_at);
        tracing::debug!(frame = frame.sequence, plates = verdicts.len(), "plate frame processed");
        Ok(verdicts)
    }

    /// Resolve raw OCR reads observed at `now`.
    pub fn decide_plates(&mut self, reads: Vec<PlateRead>, now: DateTime<Utc>) -> Vec<Verdict> {
        self.tracker.evict_stale(now);

        let mut seen = HashSet::new();
        let mut verdicts = Vec::new();
        for read in reads {
            let plate = match PlateNumber::parse(&read.text) {
                Ok(p) => p,
                Err(_) => {
                    tracing::trace!(raw = %read.text, "OCR text outside plate grammar");
                    continue;
                }
            };
            if !seen.insert(plate.clone()) {
                continue;
            }

            let enrolled = match_plate(&plate, &self.plates).map(|p| (p.id, p.marked));
            let is_new =
                self.tracker.observe(TrackKey::Plate(plate.clone()), now) == Observation::First;

            if is_new {
                self.log_event(SubjectType::Plate, plate.as_str());
                if self.config.auto_save && enrolled.is_none() {
                    self.auto_save_plate(&plate);
                }
            }

            let marked = enrolled.is_some_and(|(_, marked)| marked);
            if marked && is_new {
                tracing::warn!(plate = %plate, "marked plate recognized");
            }

            verdicts.push(Verdict {
                identity: Identity::Plate {
                    plate,
                    id: enrolled.map(|(id, _)| id),
                },
                location: read.bbox,
                allowed: enrolled.is_some(),
                is_new,
                alert: marked.then_some(now),
                distance: None,
            });
        }
        verdicts
    }

    /// One turnstile cycle: capture, decide, hold the first verdict's outcome.
    pub fn request_access(
        &mut self,
        mode: RecognitionMode,
        frame: &Frame,
    ) -> Result<GateDecision, EngineError> {
        self.gate.begin();
        let verdicts = match mode {
            RecognitionMode::Face => self.process_faces(frame),
            RecognitionMode::Plate => self.process_plates(frame),
        };
        let verdicts = match verdicts {
            Ok(v) => v,
            Err(e) => {
                self.gate.abort();
                return Err(e);
            }
        };

        let decision = GateDecision::from_verdicts(&verdicts);
        tracing::info!(frame = frame.sequence, ?decision, turnstile = ?decision.turnstile(), "gate decision");
        Ok(self.gate.resolve(decision)?.clone())
    }

    /// Apply an enrollment edit and refresh the snapshot.
    ///
    /// Once the registry accepts the edit the outcome is returned even if the
    /// refresh fails; the snapshot then stays at its previous state.
    pub fn apply(&mut self, command: EnrollmentCommand) -> Result<CommandOutcome, EngineError> {
        let outcome = match command {
            EnrollmentCommand::AddFace {
                name,
                embedding,
                image,
            } => {
                self.matcher.check(&embedding)?;
                let id = self.registry.add_face(name.trim(), &embedding, &image)?;
                tracing::info!(id, name = %name.trim(), "face enrolled");
                CommandOutcome::Added(id)
            }
            EnrollmentCommand::AddPlate { text } => {
                let plate = PlateNumber::parse(&text)?;
                let id = self.registry.add_plate(&plate)?;
                tracing::info!(id, plate = %plate, "plate enrolled");
                CommandOutcome::Added(id)
            }
            EnrollmentCommand::RenameFace { id, name } => {
                self.registry.rename_face(id, name.trim())?;
                CommandOutcome::Updated
            }
            EnrollmentCommand::ToggleFaceAccess { id } => {
                CommandOutcome::AccessAllowed(self.registry.toggle_face_access(id)?)
            }
            EnrollmentCommand::MarkFace { id } => {
                self.registry.set_face_marked(id, true)?;
                CommandOutcome::Updated
            }
            EnrollmentCommand::UnmarkFace { id } => {
                self.registry.set_face_marked(id, false)?;
                CommandOutcome::Updated
            }
            EnrollmentCommand::MarkAllFaces => CommandOutcome::Marked(self.registry.mark_all_faces()?),
            EnrollmentCommand::DeleteFace { id } => {
                self.registry.delete_face(id)?;
                CommandOutcome::Updated
            }
            EnrollmentCommand::MarkPlate { id } => {
                self.registry.set_plate_marked(id, true)?;
                CommandOutcome::Updated
            }
            EnrollmentCommand::UnmarkPlate { id } => {
                self.registry.set_plate_marked(id, false)?;
                CommandOutcome::Updated
            }
            EnrollmentCommand::DeletePlate { id } => {
                self.registry.delete_plate(id)?;
                CommandOutcome::Updated
            }
        };
        if let Err(e) = self.refresh() {
            tracing::warn!(error = %e, ?outcome, "edit applied but snapshot refresh failed");
        }
        Ok(outcome)
    }

    /// Fire-and-forget audit write.
    fn log_event(&mut self, subject: SubjectType, identifier: &str) {
        match self.registry.append_event(subject, identifier) {
            Ok(()) => tracing::info!(%subject, identifier, "recognition logged"),
            Err(e) => tracing::warn!(%subject, identifier, error = %e, "failed to log recognition"),
        }
    }

    fn auto_save_plate(&mut self, plate: &PlateNumber) {
        match self.registry.add_plate(plate) {
            Ok(id) => {
                tracing::info!(id, plate = %plate, "plate auto-saved");
                self.plates.push(EnrolledPlate {
                    id,
                    plate: plate.clone(),
                    marked: false,
                });
            }
            Err(e) => tracing::warn!(plate = %plate, error = %e, "auto-save failed"),
        }
    }
}
