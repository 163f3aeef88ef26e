//! Turnstile state machine.
//!
//! `Idle → Capturing → Held(decision)`; a held decision stays on display until
//! an explicit [`Gate::reset`] or the next [`Gate::begin`].

use crate::verdict::Verdict;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Turnstile {
    Open,
    Closed,
}

/// The single outcome that drives the turnstile for one request cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateDecision {
    Allowed { identity: String },
    Denied { identity: String },
    NoMatch,
}

impl GateDecision {
    /// The first verdict decides; later detections in the same frame are ignored.
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        match verdicts.first() {
            Some(v) if v.allowed => GateDecision::Allowed {
                identity: v.identity.label(),
            },
            Some(v) if v.identity.is_enrolled() => GateDecision::Denied {
                identity: v.identity.label(),
            },
            _ => GateDecision::NoMatch,
        }
    }

    pub fn turnstile(&self) -> Turnstile {
        match self {
            GateDecision::Allowed { .. } => Turnstile::Open,
            GateDecision::Denied { .. } | GateDecision::NoMatch => Turnstile::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Capturing,
    Held(GateDecision),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("no capture in progress")]
    NotCapturing,
}

#[derive(Debug, Default)]
pub struct Gate {
    state: GateState,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Start a decision cycle. Any held decision is released.
    pub fn begin(&mut self) {
        self.state = GateState::Capturing;
    }

    /// Hold `decision` on display.
    pub fn resolve(&mut self, decision: GateDecision) -> Result<&GateDecision, GateError> {
        if self.state != GateState::Capturing {
            return Err(GateError::NotCapturing);
        }
        self.state = GateState::Held(decision);
        match &self.state {
            GateState::Held(d) => Ok(d),
            _ => Err(GateError::NotCapturing),
        }
    }

    /// Abandon the current cycle without a decision.
    pub fn abort(&mut self) {
        if self.state == GateState::Capturing {
            self.state = GateState::Idle;
        }
    }

    /// Dismiss the held decision.
    pub fn reset(&mut self) {
        self.state = GateState::Idle;
    }

    pub fn turnstile(&self) -> Turnstile {
        match &self.state {
            GateState::Held(d) => d.turnstile(),
            _ => Turnstile::Closed,
        }
    }
}
