//! Jackhammer command parameters and their validation.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Result type for parameter validation.
pub type Result<T> = std::result::Result<T, InvalidParameter>;

/// Accepted phase 1 pulse intensity (forward).
pub const PHASE1_PULSES_RANGE: RangeInclusive<i32> = 1..=100;

/// Accepted phase 2 pulse intensity (backward, always negative).
pub const PHASE2_PULSES_RANGE: RangeInclusive<i32> = -100..=-1;

/// A parameter value outside its accepted range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid parameter {field}: {value} (expected {expected})")]
pub struct InvalidParameter {
    /// Field name, as used on the wire
    pub field: &'static str,
    /// Rejected value
    pub value: i32,
    /// Human readable accepted range
    pub expected: &'static str,
}

impl InvalidParameter {
    fn check(field: &'static str, value: i32, ok: bool, expected: &'static str) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(Self { field, value, expected })
        }
    }
}

/// Parameters of one jackhammer call.
///
/// Phase 1 drives the probe forward, phase 2 pulls it back. Steps are the
/// primary driver of advancement; pulses act as a dampener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackhammerParameters {
    /// Number of jackhammer cycles
    pub iterations: i32,
    /// Steps in the forward phase
    pub phase1_steps: i32,
    /// Pulse intensity of the forward phase (1 to 100)
    pub phase1_pulses: i32,
    /// Steps in the backward phase
    pub phase2_steps: i32,
    /// Pulse intensity of the backward phase (-100 to -1)
    pub phase2_pulses: i32,
}

impl JackhammerParameters {
    /// Check every field against its range.
    ///
    /// Called before anything is sent to the manipulator.
    pub fn validate(&self) -> Result<()> {
        InvalidParameter::check("iterations", self.iterations, self.iterations > 0, "a positive integer")?;
        InvalidParameter::check("phase1_steps", self.phase1_steps, self.phase1_steps > 0, "a positive integer")?;
        InvalidParameter::check(
            "phase1_pulses",
            self.phase1_pulses,
            PHASE1_PULSES_RANGE.contains(&self.phase1_pulses),
            "1 to 100",
        )?;
        InvalidParameter::check("phase2_steps", self.phase2_steps, self.phase2_steps >= 0, "zero or more")?;
        InvalidParameter::check(
            "phase2_pulses",
            self.phase2_pulses,
            PHASE2_PULSES_RANGE.contains(&self.phase2_pulses),
            "-100 to -1",
        )?;
        Ok(())
    }
}

impl Default for JackhammerParameters {
    fn default() -> Self {
        crate::preset::GENTLE.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> JackhammerParameters {
        JackhammerParameters {
            iterations: 10,
            phase1_steps: 1,
            phase1_pulses: 100,
            phase2_steps: 1,
            phase2_pulses: -100,
        }
    }

    #[test]
    fn test_valid_parameters() {
        assert!(params().validate().is_ok());
        assert!(JackhammerParameters::default().validate().is_ok());
    }

    #[test]
    fn test_zero_backward_steps_allowed() {
        let p = JackhammerParameters { phase2_steps: 0, ..params() };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let cases = [
            (JackhammerParameters { iterations: 0, ..params() }, "iterations"),
            (JackhammerParameters { phase1_steps: -1, ..params() }, "phase1_steps"),
            (JackhammerParameters { phase1_pulses: 101, ..params() }, "phase1_pulses"),
            (JackhammerParameters { phase1_pulses: 0, ..params() }, "phase1_pulses"),
            (JackhammerParameters { phase2_steps: -2, ..params() }, "phase2_steps"),
            (JackhammerParameters { phase2_pulses: 0, ..params() }, "phase2_pulses"),
            (JackhammerParameters { phase2_pulses: -101, ..params() }, "phase2_pulses"),
        ];

        for (p, field) in cases {
            let err = p.validate().unwrap_err();
            assert_eq!(err.field, field);
        }
    }

    #[test]
    fn test_error_message() {
        let err = JackhammerParameters { phase1_pulses: 150, ..params() }
            .validate()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid parameter phase1_pulses: 150 (expected 1 to 100)");
    }
}
