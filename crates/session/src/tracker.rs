//! Per-manipulator advancement tracking.

use chrono::{DateTime, Utc};
use jackhammer_core::ManipulatorId;
use std::collections::HashMap;

/// What is known about one manipulator during this process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManipulatorSession {
    /// Last depth reading in micrometres, if any
    pub last_known_position_um: Option<f64>,

    /// Signed sum of actual advancements since the last reset
    pub cumulative_advancement_um: f64,

    /// Actual advancement of the most recent run
    pub last_advancement_um: Option<f64>,

    /// Successful runs recorded since the last reset
    pub runs: u32,

    /// When the most recent run was recorded
    pub last_run_at: Option<DateTime<Utc>>,
}

/// A snapshot of every tracked manipulator.
#[derive(Debug, Clone)]
pub struct TrackerSnapshot {
    /// When snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Sessions ordered by manipulator id
    pub sessions: Vec<(ManipulatorId, ManipulatorSession)>,
}

/// Owns the session state of every manipulator.
///
/// Entries are created on first reference and live as long as the tracker.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<ManipulatorId, ManipulatorSession>,
}

impl SessionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed run: new depth and its signed actual advancement.
    pub fn record_run(&mut self, id: &ManipulatorId, new_position_um: f64, actual_advancement_um: f64) {
        let session = self.sessions.entry(id.clone()).or_default();
        session.last_known_position_um = Some(new_position_um);
        session.cumulative_advancement_um += actual_advancement_um;
        session.last_advancement_um = Some(actual_advancement_um);
        session.runs += 1;
        session.last_run_at = Some(Utc::now());
    }

    /// Record a depth reading without touching the advancement totals.
    pub fn record_position(&mut self, id: &ManipulatorId, position_um: f64) {
        self.sessions.entry(id.clone()).or_default().last_known_position_um = Some(position_um);
    }

    /// Current session, or an empty one if the manipulator was never seen.
    pub fn get_session(&self, id: &ManipulatorId) -> ManipulatorSession {
        self.sessions.get(id).cloned().unwrap_or_default()
    }

    /// Start a new insertion: zero the totals, keep the position.
    pub fn reset(&mut self, id: &ManipulatorId) {
        let session = self.sessions.entry(id.clone()).or_default();
        session.cumulative_advancement_um = 0.0;
        session.last_advancement_um = None;
        session.runs = 0;
    }

    /// Take a snapshot of all sessions.
    pub fn snapshot(&self) -> TrackerSnapshot {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        TrackerSnapshot {
            timestamp: Utc::now(),
            sessions,
        }
    }
}
