//! Per-tick snapshot records emitted by the scheduler.
//!
//! A snapshot is the only observable output of the core. It is an owned
//! value: sinks receive it by reference, clone it if they need to keep it,
//! and can never reach back into scheduler state. Snapshots carry no
//! wall-clock values so two runs with the same inputs serialize
//! identically.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::counts::ClassCounts;
use crate::enums::{Approach, SignalState, TransitionSubstate};

/// State of one approach at the end of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LaneSnapshot {
    /// Which approach this record describes.
    pub lane: Approach,
    /// Light currently shown.
    pub signal_state: SignalState,
    /// Seconds since the lane entered `signal_state`.
    pub state_elapsed_seconds: f64,
    /// Seconds until the lane's light is next scheduled to change.
    pub seconds_until_next_change: f64,
    /// Vehicles waiting, all classes.
    pub backlog_total: u64,
    /// Vehicles waiting, per class.
    pub backlog_by_class: ClassCounts,
    /// Vehicles ingested during this tick.
    pub arrivals_this_tick: u64,
    /// Vehicles ingested during this tick, per class.
    pub arrivals_by_class: ClassCounts,
    /// Vehicles that cleared the stop line during this tick.
    pub departures_this_tick: u64,
    /// Departures during this tick, per class.
    pub departures_by_class: ClassCounts,
    /// The arrival source had no usable data for this tick's window.
    pub data_gap: bool,
}

/// A phase-sequence change that happened during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PhaseEvent {
    /// The active phase went to yellow.
    YellowStarted {
        /// Index of the outgoing phase.
        phase: usize,
        /// Set when a starved approach cut the green short.
        preempted_by: Option<Approach>,
    },
    /// Every approach went red.
    AllRedStarted {
        /// Index of the outgoing phase.
        phase: usize,
    },
    /// A new phase turned green.
    GreenStarted {
        /// Index of the new active phase.
        phase: usize,
    },
}

/// A computed value that was forced into its allowed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ClampNotice {
    /// The queue-driven extension asked for more than the maximum green.
    GreenExtensionCapped {
        /// Duration the feedback rule asked for.
        requested_seconds: f64,
        /// Duration actually applied.
        applied_seconds: f64,
    },
    /// The green duration was raised to the configured minimum.
    GreenRaisedToMinimum {
        /// Duration the feedback rule asked for.
        requested_seconds: f64,
        /// Duration actually applied.
        applied_seconds: f64,
    },
    /// `advance` was called with a time earlier than the previous call.
    TimeRegression {
        /// Time passed by the caller.
        requested_time: f64,
        /// Time the tick was evaluated at.
        applied_time: f64,
    },
    /// `advance` was called with NaN or an infinite time.
    NonFiniteTime {
        /// Time the tick was evaluated at.
        applied_time: f64,
    },
}

/// Full intersection state at the end of a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IntersectionSnapshot {
    /// Number of `advance` calls so far, starting at 1.
    pub tick: u64,
    /// Simulated time the tick was evaluated at, in seconds.
    pub time_seconds: f64,
    /// Index of the active (or outgoing, during a transition) phase.
    pub active_phase: usize,
    /// Transition substate after this tick.
    pub transition: TransitionSubstate,
    /// Green duration currently granted to the active phase.
    pub current_green_seconds: f64,
    /// One record per approach, in [`Approach::ALL`] order.
    pub lanes: Vec<LaneSnapshot>,
    /// Phase changes made during this tick, in order.
    pub events: Vec<PhaseEvent>,
    /// Values clamped during this tick.
    pub clamps: Vec<ClampNotice>,
}

impl IntersectionSnapshot {
    /// Look up the record for one approach.
    pub fn lane(&self, approach: Approach) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|lane| lane.lane == approach)
    }

    /// Total vehicles waiting across every approach.
    pub fn total_backlog(&self) -> u64 {
        self.lanes
            .iter()
            .fold(0_u64, |acc, lane| acc.saturating_add(lane.backlog_total))
    }

    /// Whether a preemption started during this tick.
    pub fn preempted(&self) -> bool {
        self.events.iter().any(|event| {
            matches!(
                event,
                PhaseEvent::YellowStarted {
                    preempted_by: Some(_),
                    ..
                }
            )
        })
    }
}
