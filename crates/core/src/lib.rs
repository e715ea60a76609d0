//! Jackhammer core data models.
//!
//! Parameters, presets and the advancement predictor used to drive
//! Sensapex jackhammer mode through Ephys Link. Everything here is pure:
//! no I/O, no shared state.

#![warn(missing_docs)]

mod id;
mod params;
mod position;
mod preset;
mod predictor;

pub use id::{EmptyManipulatorId, ManipulatorId};
pub use params::{InvalidParameter, JackhammerParameters, Result, PHASE1_PULSES_RANGE, PHASE2_PULSES_RANGE};
pub use position::{Position, UM_PER_MM};
pub use preset::{Preset, GENTLE, PRESETS, STANDARD};
pub use predictor::{
    predict, predict_advancement, RiskLevel, CAUTION_THRESHOLD_UM, HIGH_RISK_THRESHOLD_UM,
};
