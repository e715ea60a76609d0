//! Remote execution gateway abstraction.

use async_trait::async_trait;
use jackhammer_core::{JackhammerParameters, ManipulatorId, Position};
use std::time::Duration;

use crate::engineio::ProtocolError;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors raised by a gateway.
///
/// None of these are retried automatically: the operator re-triggers the
/// run by hand.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server unreachable, connection lost, or not connected
    #[error("connection error: {0}")]
    Connection(String),

    /// The server does not know the manipulator
    #[error("manipulator {id} not found: {message}")]
    DeviceNotFound {
        /// Requested manipulator
        id: ManipulatorId,
        /// Server message
        message: String,
    },

    /// No response within the call timeout
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The server reported any other error
    #[error("remote error: {0}")]
    Remote(String),

    /// Malformed Engine.IO / Socket.IO traffic
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed JSON payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Map an error string returned by Ephys Link to a typed error.
    pub fn from_remote(id: &ManipulatorId, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("unknown manipulator") || lower.contains("invalid manipulator") {
            GatewayError::DeviceNotFound {
                id: id.clone(),
                message,
            }
        } else {
            GatewayError::Remote(message)
        }
    }
}

/// Outcome of a completed jackhammer call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JackhammerResponse {
    /// Manipulator position after the call
    pub position: Position,
    /// Wall time spent waiting for the call
    pub elapsed: Duration,
}

/// Something that can drive manipulators remotely.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run one jackhammer call and wait for it to finish.
    async fn run_jackhammer(
        &self,
        id: &ManipulatorId,
        params: &JackhammerParameters,
    ) -> Result<JackhammerResponse>;

    /// Read the current position.
    async fn get_position(&self, id: &ManipulatorId) -> Result<Position>;

    /// Stop all movement of a manipulator.
    async fn stop(&self, id: &ManipulatorId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ManipulatorId {
        ManipulatorId::new("3").unwrap()
    }

    #[test]
    fn test_not_found_maps_to_device_error() {
        let err = GatewayError::from_remote(&id(), "Manipulator 3 not found.");
        assert!(matches!(err, GatewayError::DeviceNotFound { .. }));

        let err = GatewayError::from_remote(&id(), "Unknown manipulator ID");
        assert!(matches!(err, GatewayError::DeviceNotFound { .. }));
    }

    #[test]
    fn test_other_errors_stay_remote() {
        let err = GatewayError::from_remote(&id(), "Manipulator is busy");
        assert!(matches!(err, GatewayError::Remote(ref m) if m == "Manipulator is busy"));
    }
}
