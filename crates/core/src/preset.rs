//! Named parameter presets.

use crate::params::JackhammerParameters;

/// A named, immutable parameter bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    /// Display name
    pub name: &'static str,
    /// Short usage note
    pub description: &'static str,
    /// Parameter values
    pub parameters: JackhammerParameters,
}

/// Safe for dura, roughly 4.7 µm per call.
pub const GENTLE: Preset = Preset {
    name: "Gentle",
    description: "Safe for dura. ~4.7 µm per call.",
    parameters: JackhammerParameters {
        iterations: 2,
        phase1_steps: 1,
        phase1_pulses: 70,
        phase2_steps: 1,
        phase2_pulses: -70,
    },
};

/// Sensapex SDK defaults, roughly 23.8 µm per call.
pub const STANDARD: Preset = Preset {
    name: "Standard",
    description: "SDK defaults. ~23.8 µm per call.",
    parameters: JackhammerParameters {
        iterations: 10,
        phase1_steps: 1,
        phase1_pulses: 100,
        phase2_steps: 1,
        phase2_pulses: -100,
    },
};

/// All presets, gentlest first.
pub const PRESETS: &[Preset] = &[GENTLE, STANDARD];

impl Preset {
    /// Find a preset by name, ignoring case.
    pub fn find(name: &str) -> Option<&'static Preset> {
        PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Predicted advancement of this preset in micrometres.
    pub fn predicted_um(&self) -> f64 {
        // Preset values are constants inside the predictor's domain.
        crate::predictor::predict_advancement(&self.parameters).unwrap_or_default()
    }
}
