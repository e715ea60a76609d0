//! Manipulator position.

use serde::{Deserialize, Serialize};

/// Micrometres per millimetre.
pub const UM_PER_MM: f64 = 1000.0;

/// Four-axis manipulator position in millimetres.
///
/// `w` is the depth axis, the only one jackhammer mode moves.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis (mm)
    #[serde(default)]
    pub x: f64,
    /// Y axis (mm)
    #[serde(default)]
    pub y: f64,
    /// Z axis (mm)
    #[serde(default)]
    pub z: f64,
    /// Depth axis (mm)
    #[serde(default)]
    pub w: f64,
}

impl Position {
    /// Depth in micrometres.
    pub fn depth_um(&self) -> f64 {
        self.w * UM_PER_MM
    }

    /// Signed depth change from `before` to `self`, in micrometres.
    pub fn advancement_since(&self, before: &Position) -> f64 {
        (self.w - before.w) * UM_PER_MM
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x={:.4}, y={:.4}, z={:.4}, w={:.4}",
            self.x, self.y, self.z, self.w
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advancement_in_micrometres() {
        let before = Position { w: 1.0, ..Default::default() };
        let after = Position { w: 1.0047, ..Default::default() };
        assert!((after.advancement_since(&before) - 4.7).abs() < 1e-6);
        assert!((before.advancement_since(&after) + 4.7).abs() < 1e-6);
    }

    #[test]
    fn test_display() {
        let p = Position { x: 1.0, y: 2.5, z: 0.0, w: 7.12345 };
        assert_eq!(p.to_string(), "x=1.0000, y=2.5000, z=0.0000, w=7.1235");
    }
}
