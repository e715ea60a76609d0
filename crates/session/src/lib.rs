//! Session Tracking
//!
//! Per-manipulator advancement totals, the emergency stop token and the
//! runner that ties predictions, remote calls and tracking together.

#![warn(missing_docs)]

pub mod runner;
pub mod stop;
pub mod tracker;

pub use runner::{JackhammerRunner, RunError, RunId, RunOutcome};
pub use stop::StopToken;
pub use tracker::{ManipulatorSession, SessionTracker, TrackerSnapshot};
