//! Simulation loop runner with operator controls.
//!
//! [`run_simulation`] drives an [`IntersectionScheduler`] from a
//! [`SimClock`]:
//!
//! - **Bounded run**: stop after `max_ticks` (the configured duration)
//! - **Pause/resume**: the operator can halt and continue the loop
//! - **Variable tick speed**: real-time delay adjustable while running
//! - **Operator stop**: clean stop between ticks
//! - **Integrity checks**: every snapshot is verified; anomalies are
//!   logged and counted, never fatal
//!
//! Snapshots go to a [`SnapshotSink`] by reference; the scheduler's own
//! state never leaves `advance`.

use std::sync::Arc;

use signalflow_types::IntersectionSnapshot;
use tracing::{error, info, warn};

use crate::accounting::{self, AccountingResult};
use crate::clock::{ClockError, SimClock};
use crate::operator::{OperatorState, SimulationEndReason};
use crate::scheduler::IntersectionScheduler;

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The simulated clock could not advance.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The reason the simulation ended.
    pub end_reason: SimulationEndReason,
    /// The last snapshot, if any tick ran.
    pub final_snapshot: Option<IntersectionSnapshot>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
    /// Snapshots that failed an integrity check.
    pub anomalies: u64,
}

/// Consumer of per-tick snapshots.
///
/// Implementations must not block for long; the loop calls them inline.
pub trait SnapshotSink: Send {
    /// Called once per tick with that tick's snapshot.
    fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot);

    /// Called once when the run ends, for flushing.
    fn finish(&mut self) {}
}

/// A sink that discards everything.
pub struct NoOpSink;

impl SnapshotSink for NoOpSink {
    fn on_snapshot(&mut self, _snapshot: &IntersectionSnapshot) {}
}

/// Run the tick loop until the duration is covered or the operator stops
/// it.
///
/// Each iteration evaluates the scheduler at the clock's current time,
/// verifies the snapshot, hands it to `sink`, then advances the clock.
///
/// # Errors
///
/// Returns [`RunnerError::Clock`] if the tick counter overflows.
pub async fn run_simulation(
    scheduler: &mut IntersectionScheduler,
    clock: &mut SimClock,
    operator: &Arc<OperatorState>,
    sink: &mut dyn SnapshotSink,
) -> Result<SimulationResult, RunnerError> {
    let mut last_snapshot: Option<IntersectionSnapshot> = None;
    let mut total_ticks: u64 = 0;
    let mut anomalies: u64 = 0;

    info!(
        max_ticks = operator.max_ticks(),
        tick_seconds = clock.tick_seconds(),
        tick_interval_ms = operator.tick_interval_ms(),
        "Simulation starting"
    );

    let end_reason = loop {
        // --- Check pause ---
        if operator.is_paused() {
            info!("Simulation paused, waiting for resume...");
            operator.wait_if_paused().await;
            info!("Simulation resumed");
        }

        // --- Check stop request (before tick) ---
        if operator.is_stop_requested() {
            info!(tick = total_ticks, "Operator stop requested");
            break SimulationEndReason::OperatorStop;
        }

        // --- Execute tick ---
        let snapshot = scheduler.advance(clock.now());
        total_ticks = total_ticks.saturating_add(1);
        operator.record_tick(total_ticks);

        if !verify_snapshot(last_snapshot.as_ref(), &snapshot, scheduler) {
            anomalies = anomalies.saturating_add(1);
        }

        sink.on_snapshot(&snapshot);
        last_snapshot = Some(snapshot);

        // --- Check tick limit (after tick) ---
        if operator.tick_limit_reached(total_ticks) {
            info!(
                tick = total_ticks,
                max_ticks = operator.max_ticks(),
                "Configured duration reached"
            );
            break SimulationEndReason::DurationReached;
        }

        clock.advance()?;

        // --- Sleep for tick interval ---
        let interval_ms = operator.tick_interval_ms();
        if interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(interval_ms)).await;
        }
    };

    operator.set_end_reason(end_reason).await;
    sink.finish();

    Ok(SimulationResult {
        end_reason,
        final_snapshot: last_snapshot,
        total_ticks,
        anomalies,
    })
}

/// Run every integrity check on `current`. Returns `false` and logs at
/// `error` if any fails.
fn verify_snapshot(
    previous: Option<&IntersectionSnapshot>,
    current: &IntersectionSnapshot,
    scheduler: &IntersectionScheduler,
) -> bool {
    let results = [
        accounting::verify_accounting(previous, current),
        accounting::verify_signal_safety(current, scheduler.plan()),
        accounting::verify_green_bounds(current, scheduler.timing()),
    ];

    let mut clean = true;
    for result in results {
        if let AccountingResult::Anomaly(anomaly) = result {
            error!(
                tick = anomaly.tick,
                violations = ?anomaly.violations,
                "{}",
                anomaly.message
            );
            clean = false;
        }
    }
    clean
}

/// Log the outcome of a run.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        anomalies = result.anomalies,
        final_time = result.final_snapshot.as_ref().map(|s| s.time_seconds),
        "Simulation ended"
    );

    if let Some(ref snapshot) = result.final_snapshot {
        info!(
            tick = snapshot.tick,
            phase = snapshot.active_phase,
            transition = ?snapshot.transition,
            total_backlog = snapshot.total_backlog(),
            "Final intersection state"
        );
    } else {
        warn!("Simulation ended with no ticks executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use signalflow_types::{Approach, ClassCounts};

    use super::*;
    use crate::arrivals::{ScheduledArrivals, SyntheticArrivals};
    use crate::config::{ArrivalConfig, SignalTimingConfig};

    #[derive(Default)]
    struct Collect {
        snapshots: Vec<IntersectionSnapshot>,
        finished: bool,
    }

    impl SnapshotSink for Collect {
        fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
            self.snapshots.push(snapshot.clone());
        }

        fn finish(&mut self) {
            self.finished = true;
        }
    }

    fn scheduler(source: Option<Box<dyn crate::arrivals::ArrivalSource>>) -> IntersectionScheduler {
        IntersectionScheduler::new(SignalTimingConfig::default(), source).unwrap()
    }

    #[tokio::test]
    async fn runs_until_duration_reached() {
        let mut scheduler = scheduler(None);
        let mut clock = SimClock::new(6.0).unwrap();
        let operator = Arc::new(OperatorState::new(0, 151));
        let mut sink = Collect::default();

        let result = run_simulation(&mut scheduler, &mut clock, &operator, &mut sink)
            .await
            .unwrap();

        assert_eq!(result.end_reason, SimulationEndReason::DurationReached);
        assert_eq!(result.total_ticks, 151);
        assert_eq!(result.anomalies, 0);
        assert_eq!(sink.snapshots.len(), 151);
        assert!(sink.finished);
        // First tick at time 0, last exactly on the 900 s duration.
        assert!(sink.snapshots.first().unwrap().time_seconds.abs() < f64::EPSILON);
        assert!((result.final_snapshot.unwrap().time_seconds - 900.0).abs() < 1e-9);
        assert_eq!(
            operator.end_reason().await,
            Some(SimulationEndReason::DurationReached)
        );
        assert_eq!(operator.status().await.tick, 151);
    }

    #[tokio::test]
    async fn paused_run_waits_for_resume() {
        let mut scheduler = scheduler(None);
        let mut clock = SimClock::new(6.0).unwrap();
        let operator = Arc::new(OperatorState::new(0, 10));
        operator.pause();

        let resumer = {
            let operator = Arc::clone(&operator);
            tokio::spawn(async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
                let ticks_while_paused = operator.completed_ticks();
                operator.resume();
                ticks_while_paused
            })
        };

        let result = run_simulation(&mut scheduler, &mut clock, &operator, &mut NoOpSink)
            .await
            .unwrap();

        assert_eq!(resumer.await.unwrap(), 0);
        assert_eq!(result.end_reason, SimulationEndReason::DurationReached);
        assert_eq!(result.total_ticks, 10);
    }

    #[tokio::test]
    async fn stop_before_start_runs_no_ticks() {
        let mut scheduler = scheduler(None);
        let mut clock = SimClock::new(6.0).unwrap();
        let operator = Arc::new(OperatorState::new(0, 0));
        operator.request_stop();

        let result = run_simulation(&mut scheduler, &mut clock, &operator, &mut NoOpSink)
            .await
            .unwrap();

        assert_eq!(result.end_reason, SimulationEndReason::OperatorStop);
        assert_eq!(result.total_ticks, 0);
        assert!(result.final_snapshot.is_none());
    }

    struct StopAfter {
        operator: Arc<OperatorState>,
        ticks: u64,
    }

    impl SnapshotSink for StopAfter {
        fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
            if snapshot.tick >= self.ticks {
                self.operator.request_stop();
            }
        }
    }

    #[tokio::test]
    async fn operator_stop_ends_unbounded_run() {
        let mut scheduler = scheduler(None);
        let mut clock = SimClock::new(1.0).unwrap();
        let operator = Arc::new(OperatorState::new(0, 0));
        let mut sink = StopAfter {
            operator: Arc::clone(&operator),
            ticks: 25,
        };

        let result = run_simulation(&mut scheduler, &mut clock, &operator, &mut sink)
            .await
            .unwrap();

        assert_eq!(result.end_reason, SimulationEndReason::OperatorStop);
        assert_eq!(result.total_ticks, 25);
    }

    #[tokio::test]
    async fn synthetic_rush_hour_run_is_clean() {
        let source = SyntheticArrivals::new(ArrivalConfig::default());
        let mut scheduler = scheduler(Some(Box::new(source)));
        let mut clock = SimClock::new(6.0).unwrap();
        let operator = Arc::new(OperatorState::new(0, 600));
        let mut sink = Collect::default();

        let result = run_simulation(&mut scheduler, &mut clock, &operator, &mut sink)
            .await
            .unwrap();

        assert_eq!(result.anomalies, 0);
        let arrived: u64 = sink
            .snapshots
            .iter()
            .flat_map(|s| s.lanes.iter())
            .map(|l| l.arrivals_this_tick)
            .sum();
        assert!(arrived > 0);
    }

    #[tokio::test]
    async fn data_gaps_are_reported_not_fatal() {
        let source = ScheduledArrivals::new()
            .with(Approach::North, 30.0, ClassCounts::new(4, 0, 0))
            .unwrap();
        let mut scheduler = scheduler(Some(Box::new(source)));
        let mut clock = SimClock::new(6.0).unwrap();
        let operator = Arc::new(OperatorState::new(0, 20));
        let mut sink = Collect::default();

        let result = run_simulation(&mut scheduler, &mut clock, &operator, &mut sink)
            .await
            .unwrap();

        assert_eq!(result.total_ticks, 20);
        assert_eq!(result.anomalies, 0);
        let east_gaps = sink
            .snapshots
            .iter()
            .filter(|s| s.lane(Approach::East).is_some_and(|l| l.data_gap))
            .count();
        // Tick 0 has an empty window; every later tick is a gap for east.
        assert_eq!(east_gaps, 19);
    }
}
