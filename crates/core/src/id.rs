//! Manipulator identifiers.

use serde::{Deserialize, Serialize};

/// Identifier of a manipulator as reported by Ephys Link on startup.
///
/// Sensapex manipulators are numbered, but Ephys Link addresses them by
/// string, so the identifier is kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManipulatorId(String);

impl ManipulatorId {
    /// Create an identifier, trimming surrounding whitespace.
    pub fn new(id: impl AsRef<str>) -> Result<Self, EmptyManipulatorId> {
        let trimmed = id.as_ref().trim();
        if trimmed.is_empty() {
            return Err(EmptyManipulatorId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returned when a manipulator identifier is blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("manipulator ID is required")]
pub struct EmptyManipulatorId;

impl std::fmt::Display for ManipulatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ManipulatorId {
    type Err = EmptyManipulatorId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ManipulatorId {
    type Error = EmptyManipulatorId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ManipulatorId> for String {
    fn from(id: ManipulatorId) -> Self {
        id.0
    }
}

impl AsRef<str> for ManipulatorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
