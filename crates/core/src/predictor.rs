//! Advancement prediction.
//!
//! Empirical fit of depth advancement per jackhammer call:
//!
//! ```text
//! Δw ≈ 0.3 · I^0.9 · S1^1.4 · P1^0.5
//! ```
//!
//! Steps dominate, iterations give diminishing returns and pulses act as a
//! dampener. Only phase 1 enters the fit.

use crate::params::{InvalidParameter, JackhammerParameters, Result, PHASE1_PULSES_RANGE};

const COEFFICIENT: f64 = 0.3;
const ITERATIONS_EXPONENT: f64 = 0.9;
const STEPS_EXPONENT: f64 = 1.4;
const PULSES_EXPONENT: f64 = 0.5;

/// Predicted advancement above which the operator should slow down.
pub const CAUTION_THRESHOLD_UM: f64 = 10.0;

/// Predicted advancement above which overshoot is likely.
pub const HIGH_RISK_THRESHOLD_UM: f64 = 20.0;

/// Predict the advancement in micrometres from raw phase 1 values.
pub fn predict(iterations: i32, phase1_steps: i32, phase1_pulses: i32) -> Result<f64> {
    if iterations <= 0 {
        return Err(InvalidParameter {
            field: "iterations",
            value: iterations,
            expected: "a positive integer",
        });
    }
    if phase1_steps <= 0 {
        return Err(InvalidParameter {
            field: "phase1_steps",
            value: phase1_steps,
            expected: "a positive integer",
        });
    }
    if !PHASE1_PULSES_RANGE.contains(&phase1_pulses) {
        return Err(InvalidParameter {
            field: "phase1_pulses",
            value: phase1_pulses,
            expected: "1 to 100",
        });
    }

    Ok(COEFFICIENT
        * f64::from(iterations).powf(ITERATIONS_EXPONENT)
        * f64::from(phase1_steps).powf(STEPS_EXPONENT)
        * f64::from(phase1_pulses).powf(PULSES_EXPONENT))
}

/// Predict the advancement of a full parameter set.
pub fn predict_advancement(params: &JackhammerParameters) -> Result<f64> {
    predict(params.iterations, params.phase1_steps, params.phase1_pulses)
}

/// How risky a predicted advancement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    /// At most 10 µm
    Low,
    /// Above 10 µm
    Caution,
    /// Above 20 µm
    High,
}

impl RiskLevel {
    /// Grade a predicted advancement.
    pub fn classify(predicted_um: f64) -> Self {
        if predicted_um > HIGH_RISK_THRESHOLD_UM {
            RiskLevel::High
        } else if predicted_um > CAUTION_THRESHOLD_UM {
            RiskLevel::Caution
        } else {
            RiskLevel::Low
        }
    }

    /// Operator-facing warning, if any.
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            RiskLevel::Low => None,
            RiskLevel::Caution => Some("Use caution"),
            RiskLevel::High => Some("High risk of overshoot!"),
        }
    }
}
