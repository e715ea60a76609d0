//! Jackhammer run orchestration.
//!
//! Validates parameters, keeps at most one run in flight per manipulator,
//! races the remote call against the emergency stop and feeds the session
//! tracker once a run has actually completed.

use jackhammer_core::{
    predict_advancement, InvalidParameter, JackhammerParameters, ManipulatorId, Position,
};
use jackhammer_link::{Gateway, GatewayError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};
use ulid::Ulid;

use crate::stop::StopToken;
use crate::tracker::{ManipulatorSession, SessionTracker, TrackerSnapshot};

/// Result type for run operations.
pub type Result<T> = std::result::Result<T, RunError>;

/// Why a run did not complete.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Rejected before anything was sent
    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),

    /// Another run on this manipulator has not finished
    #[error("a jackhammer run is already in flight on manipulator {0}")]
    InFlight(ManipulatorId),

    /// The remote call failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Aborted by the emergency stop
    #[error("run on manipulator {0} cancelled by emergency stop")]
    Cancelled(ManipulatorId),
}

/// Run identifier, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Ulid);

impl RunId {
    /// Generate a new run id
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Run id
    pub run_id: RunId,
    /// Manipulator that moved
    pub manipulator_id: ManipulatorId,
    /// Advancement predicted before the run (µm)
    pub predicted_um: f64,
    /// Measured advancement (µm), if a baseline position was known
    pub actual_um: Option<f64>,
    /// Position after the run
    pub position: Position,
    /// Time spent in the remote call
    pub elapsed: Duration,
    /// Session after the update
    pub session: ManipulatorSession,
}

/// Releases the manipulator's in-flight slot on drop.
struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<ManipulatorId>>,
    id: ManipulatorId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Drives jackhammer runs through a gateway and tracks their effect.
pub struct JackhammerRunner {
    gateway: Arc<dyn Gateway>,
    tracker: Mutex<SessionTracker>,
    in_flight: Mutex<HashSet<ManipulatorId>>,
}

impl JackhammerRunner {
    /// Create a runner with an empty session tracker.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self::with_tracker(gateway, SessionTracker::new())
    }

    /// Create a runner around an existing tracker.
    pub fn with_tracker(gateway: Arc<dyn Gateway>, tracker: SessionTracker) -> Self {
        Self {
            gateway,
            tracker: Mutex::new(tracker),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, SessionTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire(&self, id: &ManipulatorId) -> Result<InFlightGuard<'_>> {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !slots.insert(id.clone()) {
            return Err(RunError::InFlight(id.clone()));
        }
        Ok(InFlightGuard {
            slots: &self.in_flight,
            id: id.clone(),
        })
    }

    /// Whether a run is outstanding on the manipulator.
    pub fn is_in_flight(&self, id: &ManipulatorId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    /// Current session of a manipulator.
    pub fn session(&self, id: &ManipulatorId) -> ManipulatorSession {
        self.tracker().get_session(id)
    }

    /// Snapshot of every tracked manipulator.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.tracker().snapshot()
    }

    /// Zero the advancement totals of a manipulator.
    pub fn reset(&self, id: &ManipulatorId) {
        self.tracker().reset(id);
        info!("Total advancement reset for manipulator {}", id);
    }

    /// Read the current position and remember it.
    pub async fn refresh_position(&self, id: &ManipulatorId) -> Result<Position> {
        let position = self.gateway.get_position(id).await?;
        self.tracker().record_position(id, position.depth_um());
        Ok(position)
    }

    /// Trigger the stop token and tell the manipulator to halt.
    pub async fn emergency_stop(&self, id: &ManipulatorId, stop: &StopToken) -> Result<()> {
        warn!("Emergency stop on manipulator {}", id);
        stop.stop();
        self.gateway.stop(id).await?;
        Ok(())
    }

    /// Run one jackhammer call.
    ///
    /// The session is only updated when the call completes. Errors and
    /// cancellation leave it untouched.
    pub async fn run(
        &self,
        id: &ManipulatorId,
        params: &JackhammerParameters,
        stop: &StopToken,
    ) -> Result<RunOutcome> {
        params.validate()?;
        let predicted_um = predict_advancement(params)?;
        let _slot = self.acquire(id)?;

        let run_id = RunId::new();
        info!("{}: jackhammer on manipulator {} (predicted {:.1} µm)", run_id, id, predicted_um);

        if stop.is_stopped() {
            return Err(RunError::Cancelled(id.clone()));
        }

        let before = tokio::select! {
            biased;
            _ = stop.stopped() => return Err(RunError::Cancelled(id.clone())),
            reading = self.gateway.get_position(id) => match reading {
                Ok(position) => Some(position),
                Err(e) => {
                    warn!("{}: could not read position before run: {}", run_id, e);
                    None
                }
            },
        };

        let response = tokio::select! {
            biased;
            _ = stop.stopped() => {
                warn!("{}: cancelled, session not updated", run_id);
                return Err(RunError::Cancelled(id.clone()));
            }
            result = self.gateway.run_jackhammer(id, params) => match result {
                Ok(response) => response,
                Err(e) => {
                    warn!("{}: jackhammer failed: {}", run_id, e);
                    return Err(e.into());
                }
            },
        };

        let after_um = response.position.depth_um();
        let mut tracker = self.tracker();
        let actual_um = match before {
            Some(before) => Some(response.position.advancement_since(&before)),
            None => tracker.get_session(id).last_known_position_um.map(|b| after_um - b),
        };
        match actual_um {
            Some(actual) => tracker.record_run(id, after_um, actual),
            None => tracker.record_position(id, after_um),
        }
        let session = tracker.get_session(id);
        drop(tracker);

        info!(
            "{}: complete in {:?}, actual {}, total {:.1} µm",
            run_id,
            response.elapsed,
            actual_um.map_or_else(|| "unknown".to_string(), |a| format!("{:+.1} µm", a)),
            session.cumulative_advancement_um
        );

        Ok(RunOutcome {
            run_id,
            manipulator_id: id.clone(),
            predicted_um,
            actual_um,
            position: response.position,
            elapsed: response.elapsed,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jackhammer_link::JackhammerResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gateway that advances depth by a fixed step per call.
    struct MockGateway {
        depth_mm: Mutex<f64>,
        step_mm: f64,
        delay: Duration,
        fail_run: bool,
        fail_position: bool,
        runs: AtomicUsize,
        stops: AtomicUsize,
    }

    impl MockGateway {
        fn new(step_mm: f64) -> Self {
            Self {
                depth_mm: Mutex::new(1.0),
                step_mm,
                delay: Duration::ZERO,
                fail_run: false,
                fail_position: false,
                runs: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }
        }

        fn position(&self) -> Position {
            Position {
                w: *self.depth_mm.lock().unwrap(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Gateway for MockGateway {
        async fn run_jackhammer(
            &self,
            id: &ManipulatorId,
            _params: &JackhammerParameters,
        ) -> jackhammer_link::Result<JackhammerResponse> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_run {
                return Err(GatewayError::from_remote(id, "Manipulator not found"));
            }
            *self.depth_mm.lock().unwrap() += self.step_mm;
            Ok(JackhammerResponse {
                position: self.position(),
                elapsed: self.delay,
            })
        }

        async fn get_position(&self, _id: &ManipulatorId) -> jackhammer_link::Result<Position> {
            if self.fail_position {
                return Err(GatewayError::Timeout(Duration::from_secs(1)));
            }
            Ok(self.position())
        }

        async fn stop(&self, _id: &ManipulatorId) -> jackhammer_link::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn id(s: &str) -> ManipulatorId {
        ManipulatorId::new(s).unwrap()
    }

    fn gentle() -> JackhammerParameters {
        jackhammer_core::GENTLE.parameters
    }

    #[tokio::test]
    async fn test_successful_runs_accumulate() {
        let gateway = Arc::new(MockGateway::new(0.0047));
        let runner = JackhammerRunner::new(gateway.clone());
        let stop = StopToken::new();

        let first = runner.run(&id("1"), &gentle(), &stop).await.unwrap();
        let second = runner.run(&id("1"), &gentle(), &stop).await.unwrap();

        assert!((first.actual_um.unwrap() - 4.7).abs() < 1e-6);
        assert!((second.actual_um.unwrap() - 4.7).abs() < 1e-6);
        assert!((second.session.cumulative_advancement_um - 9.4).abs() < 1e-6);
        assert!((first.predicted_um - jackhammer_core::GENTLE.predicted_um()).abs() < 1e-9);

        let session = runner.session(&id("1"));
        assert_eq!(session.runs, 2);
        assert!((session.last_known_position_um.unwrap() - 1009.4).abs() < 1e-6);
        assert!(!runner.is_in_flight(&id("1")));
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_reach_gateway() {
        let gateway = Arc::new(MockGateway::new(0.001));
        let runner = JackhammerRunner::new(gateway.clone());
        let params = JackhammerParameters { iterations: 0, ..gentle() };

        let err = runner.run(&id("1"), &params, &StopToken::new()).await.unwrap_err();
        assert!(matches!(err, RunError::InvalidParameter(ref e) if e.field == "iterations"));
        assert_eq!(gateway.runs.load(Ordering::SeqCst), 0);
        assert!(!runner.is_in_flight(&id("1")));
    }

    #[tokio::test]
    async fn test_failed_call_leaves_session_unchanged() {
        let mut gateway = MockGateway::new(0.001);
        gateway.fail_run = true;
        let mut tracker = SessionTracker::new();
        tracker.record_run(&id("1"), 1000.0, 12.0);
        let runner = JackhammerRunner::with_tracker(Arc::new(gateway), tracker);

        let before = runner.session(&id("1"));
        let err = runner.run(&id("1"), &gentle(), &StopToken::new()).await.unwrap_err();

        assert!(matches!(err, RunError::Gateway(GatewayError::DeviceNotFound { .. })));
        assert_eq!(runner.session(&id("1")), before);
        assert!(!runner.is_in_flight(&id("1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_on_same_manipulator_is_rejected() {
        let mut gateway = MockGateway::new(0.001);
        gateway.delay = Duration::from_secs(2);
        let runner = JackhammerRunner::new(Arc::new(gateway));
        let stop = StopToken::new();

        let (id1a, id1b) = (id("1"), id("1"));
        let (params_a, params_b) = (gentle(), gentle());
        let (first, second) = tokio::join!(
            runner.run(&id1a, &params_a, &stop),
            runner.run(&id1b, &params_b, &stop),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(RunError::InFlight(ref m)) if m.as_str() == "1"));
        assert_eq!(runner.session(&id("1")).runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_manipulators_run_together() {
        let mut gateway = MockGateway::new(0.001);
        gateway.delay = Duration::from_secs(2);
        let runner = JackhammerRunner::new(Arc::new(gateway));
        let stop = StopToken::new();

        let (id1, id2) = (id("1"), id("2"));
        let (params_a, params_b) = (gentle(), gentle());
        let (a, b) = tokio::join!(
            runner.run(&id1, &params_a, &stop),
            runner.run(&id2, &params_b, &stop),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_cancels_without_update() {
        let mut gateway = MockGateway::new(0.001);
        gateway.delay = Duration::from_secs(30);
        let gateway = Arc::new(gateway);
        let runner = JackhammerRunner::new(gateway.clone());
        let stop = StopToken::new();

        let (id1, params) = (id("1"), gentle());
        let (result, stopped) = tokio::join!(runner.run(&id1, &params, &stop), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            runner.emergency_stop(&id("1"), &stop).await
        });

        assert!(matches!(result, Err(RunError::Cancelled(_))));
        assert!(stopped.is_ok());
        assert_eq!(gateway.stops.load(Ordering::SeqCst), 1);
        assert_eq!(runner.session(&id("1")), ManipulatorSession::default());
        assert!(!runner.is_in_flight(&id("1")));

        // The slot is free again for a fresh token.
        let outcome = runner.run(&id("1"), &gentle(), &StopToken::new()).await.unwrap();
        assert!((outcome.actual_um.unwrap() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stopped_token_rejects_run() {
        let gateway = Arc::new(MockGateway::new(0.001));
        let runner = JackhammerRunner::new(gateway.clone());
        let stop = StopToken::new();
        stop.stop();

        let err = runner.run(&id("1"), &gentle(), &stop).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled(_)));
        assert_eq!(gateway.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_last_known_position() {
        let mut gateway = MockGateway::new(0.002);
        gateway.fail_position = true;
        let runner = JackhammerRunner::new(Arc::new(gateway));
        let stop = StopToken::new();

        // No baseline at all: only the position is recorded.
        let first = runner.run(&id("1"), &gentle(), &stop).await.unwrap();
        assert!(first.actual_um.is_none());
        assert_eq!(first.session.cumulative_advancement_um, 0.0);
        assert_eq!(first.session.runs, 0);
        assert!((first.session.last_known_position_um.unwrap() - 1002.0).abs() < 1e-6);

        // The recorded position becomes the baseline of the next run.
        let second = runner.run(&id("1"), &gentle(), &stop).await.unwrap();
        assert!((second.actual_um.unwrap() - 2.0).abs() < 1e-6);
        assert!((second.session.cumulative_advancement_um - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_refresh_position_and_reset() {
        let gateway = Arc::new(MockGateway::new(0.005));
        let runner = JackhammerRunner::new(gateway);
        let stop = StopToken::new();

        runner.run(&id("1"), &gentle(), &stop).await.unwrap();
        let position = runner.refresh_position(&id("1")).await.unwrap();
        runner.reset(&id("1"));

        let session = runner.session(&id("1"));
        assert_eq!(session.cumulative_advancement_um, 0.0);
        assert_eq!(session.last_known_position_um, Some(position.depth_um()));
        assert_eq!(runner.snapshot().sessions.len(), 1);
    }
}
