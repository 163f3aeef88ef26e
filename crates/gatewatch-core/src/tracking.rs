//! Per-session presence tracking used to suppress duplicate events.
//!
//! An identity is "new" the first time it is observed, and again after it has
//! been absent for longer than the TTL. Without a TTL, entries live for the
//! whole session.

use crate::plate::PlateNumber;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;

/// Identity key for tracking. Faces are keyed by registry id since names are not unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    Face(i64),
    Plate(PlateNumber),
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Face(id) => write!(f, "face#{id}"),
            TrackKey::Plate(plate) => write!(f, "plate:{plate}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingEntry {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    First,
    Repeat,
}

#[derive(Debug, Clone, Default)]
pub struct Tracker {
    ttl: Option<Duration>,
    entries: HashMap<TrackKey, TrackingEntry>,
}

impl Tracker {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn is_stale(&self, entry: &TrackingEntry, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - entry.last_seen > ttl)
    }

    /// Record a sighting at `now`.
    pub fn observe(&mut self, key: TrackKey, now: DateTime<Utc>) -> Observation {
        let stale = self
            .entries
            .get(&key)
            .map(|entry| self.is_stale(entry, now));

        match stale {
            Some(false) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.last_seen = entry.last_seen.max(now);
                }
                Observation::Repeat
            }
            Some(true) | None => {
                tracing::debug!(key = %key, "tracking started");
                self.entries.insert(
                    key,
                    TrackingEntry {
                        first_seen: now,
                        last_seen: now,
                    },
                );
                Observation::First
            }
        }
    }

    /// Drop entries absent for longer than the TTL. Returns how many were removed.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.last_seen <= ttl);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "evicted stale tracking entries");
        }
        evicted
    }

    pub fn get(&self, key: &TrackKey) -> Option<&TrackingEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
