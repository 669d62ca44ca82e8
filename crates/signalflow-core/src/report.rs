//! End-of-run report built from the snapshot stream.
//!
//! [`RunReport`] is a [`SnapshotSink`]: it folds every snapshot into
//! per-lane totals and keeps an optional bounded history of recent
//! snapshots. The engine serializes it to JSON when the run ends.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use signalflow_types::{
    Approach, ClassCounts, IntersectionSnapshot, PhaseEvent, RunId, SignalState,
};
use tracing::info;

use crate::runner::SnapshotSink;

/// Totals for one approach over a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneStats {
    /// Which approach.
    pub lane: Approach,
    /// Vehicles that arrived, per class.
    pub arrivals: ClassCounts,
    /// Vehicles that departed, per class.
    pub departures: ClassCounts,
    /// Longest backlog seen.
    pub peak_backlog: u64,
    /// Simulated time the peak was first seen.
    pub peak_backlog_at: f64,
    /// Backlog at the last tick.
    pub final_backlog: ClassCounts,
    /// Simulated seconds spent green.
    pub green_seconds: f64,
    /// Simulated seconds spent yellow.
    pub yellow_seconds: f64,
    /// Simulated seconds spent red.
    pub red_seconds: f64,
    /// Ticks whose arrival window had no usable data.
    pub data_gap_ticks: u64,
}

impl LaneStats {
    const fn new(lane: Approach) -> Self {
        Self {
            lane,
            arrivals: ClassCounts::ZERO,
            departures: ClassCounts::ZERO,
            peak_backlog: 0,
            peak_backlog_at: 0.0,
            final_backlog: ClassCounts::ZERO,
            green_seconds: 0.0,
            yellow_seconds: 0.0,
            red_seconds: 0.0,
            data_gap_ticks: 0,
        }
    }

    fn add_time_in(&mut self, state: SignalState, seconds: f64) {
        match state {
            SignalState::Green => self.green_seconds += seconds,
            SignalState::Yellow => self.yellow_seconds += seconds,
            SignalState::Red => self.red_seconds += seconds,
        }
    }
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier of this run.
    pub run_id: RunId,
    /// Wall-clock time the report was created.
    pub started_at: DateTime<Utc>,
    /// Ticks observed.
    pub ticks: u64,
    /// Simulated time of the last tick.
    pub simulated_seconds: f64,
    /// Greens started after the first one.
    pub phase_changes: u64,
    /// Times the cycle wrapped back to phase 0.
    pub completed_cycles: u64,
    /// Greens cut short by a starved approach.
    pub preemptions: u64,
    /// Clamp notices raised.
    pub clamps: u64,
    /// Per-approach totals, in [`Approach::ALL`] order.
    pub lanes: Vec<LaneStats>,
    /// The most recent snapshots, oldest first.
    #[serde(skip_serializing_if = "VecDeque::is_empty")]
    pub history: VecDeque<IntersectionSnapshot>,

    #[serde(skip)]
    history_limit: usize,
    #[serde(skip)]
    previous: Option<(f64, Vec<SignalState>)>,
}

impl RunReport {
    /// An empty report keeping at most `history_limit` snapshots
    /// (0 = none).
    pub fn new(run_id: RunId, history_limit: usize) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            ticks: 0,
            simulated_seconds: 0.0,
            phase_changes: 0,
            completed_cycles: 0,
            preemptions: 0,
            clamps: 0,
            lanes: Approach::ALL.into_iter().map(LaneStats::new).collect(),
            history: VecDeque::new(),
            history_limit,
            previous: None,
        }
    }

    /// Totals for one approach.
    pub fn lane(&self, approach: Approach) -> Option<&LaneStats> {
        self.lanes.iter().find(|stats| stats.lane == approach)
    }

    /// Vehicles still queued at the end, all approaches.
    pub fn final_backlog(&self) -> u64 {
        self.lanes
            .iter()
            .fold(0_u64, |acc, stats| acc.saturating_add(stats.final_backlog.total()))
    }

    /// Pretty JSON for writing to disk.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Log the report at `info`.
    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            ticks = self.ticks,
            simulated_seconds = self.simulated_seconds,
            phase_changes = self.phase_changes,
            completed_cycles = self.completed_cycles,
            preemptions = self.preemptions,
            final_backlog = self.final_backlog(),
            "Run report"
        );
        for stats in &self.lanes {
            info!(
                lane = %stats.lane,
                arrived = stats.arrivals.total(),
                departed = stats.departures.total(),
                peak_backlog = stats.peak_backlog,
                final_backlog = stats.final_backlog.total(),
                green_seconds = stats.green_seconds,
                "Lane totals"
            );
        }
    }
}

impl SnapshotSink for RunReport {
    fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
        let now = snapshot.time_seconds;
        self.ticks = self.ticks.saturating_add(1);
        self.simulated_seconds = now;

        // Time between ticks is credited to the light shown at the
        // earlier tick.
        if let Some((before, states)) = self.previous.take() {
            let elapsed = (now - before).max(0.0);
            for (stats, state) in self.lanes.iter_mut().zip(states) {
                stats.add_time_in(state, elapsed);
            }
        }

        for (stats, lane) in self.lanes.iter_mut().zip(&snapshot.lanes) {
            stats.arrivals = stats.arrivals.saturating_add(lane.arrivals_by_class);
            stats.departures = stats.departures.saturating_add(lane.departures_by_class);
            stats.final_backlog = lane.backlog_by_class;
            if lane.data_gap {
                stats.data_gap_ticks = stats.data_gap_ticks.saturating_add(1);
            }
            if lane.backlog_total > stats.peak_backlog {
                stats.peak_backlog = lane.backlog_total;
                stats.peak_backlog_at = now;
            }
        }
        self.previous = Some((
            now,
            snapshot.lanes.iter().map(|lane| lane.signal_state).collect(),
        ));

        for event in &snapshot.events {
            match event {
                PhaseEvent::GreenStarted { phase } => {
                    self.phase_changes = self.phase_changes.saturating_add(1);
                    if *phase == 0 {
                        self.completed_cycles = self.completed_cycles.saturating_add(1);
                    }
                }
                PhaseEvent::YellowStarted {
                    preempted_by: Some(_),
                    ..
                } => self.preemptions = self.preemptions.saturating_add(1),
                PhaseEvent::YellowStarted { .. } | PhaseEvent::AllRedStarted { .. } => {}
            }
        }
        let clamps = u64::try_from(snapshot.clamps.len()).unwrap_or(u64::MAX);
        self.clamps = self.clamps.saturating_add(clamps);

        if self.history_limit > 0 {
            if self.history.len() >= self.history_limit {
                self.history.pop_front();
            }
            self.history.push_back(snapshot.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::arrivals::ScheduledArrivals;
    use crate::config::SignalTimingConfig;
    use crate::scheduler::IntersectionScheduler;

    fn run(report: &mut RunReport, scheduler: &mut IntersectionScheduler, ticks: u32) {
        for tick in 0..ticks {
            let snapshot = scheduler.advance(f64::from(tick) * 6.0);
            report.on_snapshot(&snapshot);
        }
    }

    #[test]
    fn totals_follow_the_snapshots() {
        let source = ScheduledArrivals::new()
            .with(Approach::North, 6.0, ClassCounts::new(10, 2, 1))
            .unwrap()
            .with(Approach::West, 12.0, ClassCounts::new(4, 0, 0))
            .unwrap();
        let mut scheduler =
            IntersectionScheduler::new(SignalTimingConfig::default(), Some(Box::new(source)))
                .unwrap();
        let mut report = RunReport::new(RunId::new(), 0);
        run(&mut report, &mut scheduler, 31);

        assert_eq!(report.ticks, 31);
        assert!((report.simulated_seconds - 180.0).abs() < 1e-9);

        let north = report.lane(Approach::North).unwrap();
        assert_eq!(north.arrivals, ClassCounts::new(10, 2, 1));
        assert_eq!(
            north.arrivals.total(),
            north.departures.total() + north.final_backlog.total()
        );
        // One car already left during the arrival tick.
        assert_eq!(north.peak_backlog, 12);

        // Seconds in each light add up to the simulated span.
        for stats in &report.lanes {
            let spent = stats.green_seconds + stats.yellow_seconds + stats.red_seconds;
            assert!((spent - 180.0).abs() < 1e-9);
        }
        assert!(report.history.is_empty());
    }

    #[test]
    fn cycles_and_phase_changes_are_counted() {
        let mut scheduler = IntersectionScheduler::new(SignalTimingConfig::default(), None).unwrap();
        let mut report = RunReport::new(RunId::new(), 0);
        // One full base cycle is 2 * (60 + 12 + 6) = 156 s.
        run(&mut report, &mut scheduler, 27);
        assert_eq!(report.phase_changes, 2);
        assert_eq!(report.completed_cycles, 1);
        assert_eq!(report.preemptions, 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut scheduler = IntersectionScheduler::new(SignalTimingConfig::default(), None).unwrap();
        let mut report = RunReport::new(RunId::new(), 5);
        run(&mut report, &mut scheduler, 12);
        assert_eq!(report.history.len(), 5);
        assert_eq!(report.history.front().map(|s| s.tick), Some(8));

        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"history\""));
        assert!(!json.contains("history_limit"));
    }
}
