//! Operator control state for a running simulation.
//!
//! Shared between the tick loop and whatever drives it (the engine's
//! Ctrl-C handler and operator console, or a test). All hot-path fields
//! are atomics so the loop never takes a lock between ticks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// Reason why the simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEndReason {
    /// Reached the tick count covering the configured duration.
    DurationReached,
    /// An operator issued a stop command.
    OperatorStop,
}

/// Shared operator control state.
///
/// Wrap in [`std::sync::Arc`] to share between tasks.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether the simulation is currently paused.
    paused: AtomicBool,

    /// Wakes the tick loop when resumed.
    resume_notify: Notify,

    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Real-time delay between ticks in milliseconds (0 = none).
    tick_interval_ms: AtomicU64,

    /// Wall-clock time when the run started.
    started_at: DateTime<Utc>,

    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,

    /// Ticks the loop has completed so far.
    completed_ticks: AtomicU64,

    /// Reason the simulation ended, if it has.
    end_reason: Mutex<Option<SimulationEndReason>>,
}

impl OperatorState {
    /// Create operator state for a run of at most `max_ticks` ticks
    /// (0 = until stopped).
    pub fn new(tick_interval_ms: u64, max_ticks: u64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
            tick_interval_ms: AtomicU64::new(tick_interval_ms),
            started_at: Utc::now(),
            max_ticks,
            completed_ticks: AtomicU64::new(0),
            end_reason: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Check whether the simulation is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause the simulation. The tick loop sleeps until resumed.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the simulation and wake the tick loop.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_one();
    }

    /// Wait until the simulation is no longer paused.
    ///
    /// A stop request also releases the wait, so a paused run can still be
    /// shut down.
    pub async fn wait_if_paused(&self) {
        while self.is_paused() && !self.is_stop_requested() {
            self.resume_notify.notified().await;
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean simulation stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.resume_notify.notify_one();
    }

    /// Check whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record the reason the simulation ended.
    pub async fn set_end_reason(&self, reason: SimulationEndReason) {
        let mut guard = self.end_reason.lock().await;
        *guard = Some(reason);
    }

    /// Get the reason the simulation ended, if it has.
    pub async fn end_reason(&self) -> Option<SimulationEndReason> {
        *self.end_reason.lock().await
    }

    // -----------------------------------------------------------------------
    // Tick speed
    // -----------------------------------------------------------------------

    /// Current real-time delay between ticks in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Change the delay between ticks. Returns the previous value.
    pub fn set_tick_interval_ms(&self, ms: u64) -> u64 {
        self.tick_interval_ms.swap(ms, Ordering::AcqRel)
    }

    // -----------------------------------------------------------------------
    // Boundaries
    // -----------------------------------------------------------------------

    /// Whether `completed_ticks` has reached the limit (never, if the
    /// limit is 0).
    pub const fn tick_limit_reached(&self, completed_ticks: u64) -> bool {
        self.max_ticks > 0 && completed_ticks >= self.max_ticks
    }

    /// Configured tick limit (0 = unlimited).
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Record the number of ticks completed. Called by the tick loop.
    pub fn record_tick(&self, completed_ticks: u64) {
        self.completed_ticks.store(completed_ticks, Ordering::Release);
    }

    /// Ticks completed so far.
    pub fn completed_ticks(&self) -> u64 {
        self.completed_ticks.load(Ordering::Acquire)
    }

    /// Wall-clock start time.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock seconds since start.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        // Negative if the wall clock stepped backwards.
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }

    /// Point-in-time status for logging or a control surface.
    pub async fn status(&self) -> SimulationStatus {
        SimulationStatus {
            tick: self.completed_ticks(),
            paused: self.is_paused(),
            stop_requested: self.is_stop_requested(),
            tick_interval_ms: self.tick_interval_ms(),
            elapsed_seconds: self.elapsed_seconds(),
            max_ticks: self.max_ticks,
            end_reason: self.end_reason().await,
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// JSON-serializable run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStatus {
    /// Ticks completed.
    pub tick: u64,
    /// Whether the simulation is paused.
    pub paused: bool,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
    /// Real-time delay between ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Wall-clock seconds since start.
    pub elapsed_seconds: u64,
    /// Configured tick limit (0 = unlimited).
    pub max_ticks: u64,
    /// The reason the simulation ended, if it has.
    pub end_reason: Option<SimulationEndReason>,
    /// RFC 3339 timestamp of when the run started.
    pub started_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_running() {
        let state = OperatorState::new(0, 0);
        assert!(!state.is_paused());
        assert!(!state.is_stop_requested());
    }

    #[test]
    fn pause_and_resume() {
        let state = OperatorState::new(0, 0);
        state.pause();
        assert!(state.is_paused());
        state.resume();
        assert!(!state.is_paused());
    }

    #[test]
    fn set_tick_interval_returns_previous() {
        let state = OperatorState::new(250, 0);
        assert_eq!(state.set_tick_interval_ms(0), 250);
        assert_eq!(state.tick_interval_ms(), 0);
    }

    #[test]
    fn zero_tick_limit_is_unlimited() {
        let state = OperatorState::new(0, 0);
        assert!(!state.tick_limit_reached(1_000_000));

        let bounded = OperatorState::new(0, 151);
        assert!(!bounded.tick_limit_reached(150));
        assert!(bounded.tick_limit_reached(151));
    }

    #[tokio::test]
    async fn stop_releases_a_paused_wait() {
        let state = OperatorState::new(0, 0);
        state.pause();
        state.request_stop();
        // Returns instead of blocking forever.
        state.wait_if_paused().await;
        assert!(state.is_paused());
    }

    #[tokio::test]
    async fn status_reports_end_reason() {
        let state = OperatorState::new(100, 10);
        state.record_tick(4);
        state.set_end_reason(SimulationEndReason::OperatorStop).await;
        let status = state.status().await;
        assert_eq!(status.tick, 4);
        assert_eq!(status.end_reason, Some(SimulationEndReason::OperatorStop));
        let json = serde_json::to_value(&status).ok();
        assert_eq!(
            json.and_then(|v| v.get("end_reason").cloned()),
            Some(serde_json::json!("operator_stop"))
        );
    }
}
