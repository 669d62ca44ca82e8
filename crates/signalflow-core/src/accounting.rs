//! Per-tick integrity checks on emitted snapshots.
//!
//! Vehicles are conserved: for every lane and class,
//!
//! ```text
//! backlog(T) == backlog(T-1) + arrivals(T) - departures(T)
//! ```
//!
//! and departures never exceed what was queued when the drain ran. The
//! light pattern is safe: outside a transition exactly the active phase is
//! green, during yellow only the outgoing phase shows yellow, and during
//! all-red every lane is red.
//!
//! The scheduler upholds both by construction. These checks run on every
//! snapshot in the driver loop and report violations as anomalies; they
//! never stop a run.

use signalflow_types::{
    Approach, ClassCounts, IntersectionSnapshot, LaneSnapshot, SignalState, TransitionSubstate,
    VehicleClass,
};

use crate::config::SignalTimingConfig;
use crate::phase::PhasePlan;

/// The result of checking one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountingResult {
    /// Every check passed.
    Balanced,
    /// At least one check failed.
    Anomaly(AccountingAnomaly),
}

impl AccountingResult {
    /// Whether every check passed.
    pub const fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

/// One or more violations found in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountingAnomaly {
    /// Tick of the offending snapshot.
    pub tick: u64,
    /// What went wrong.
    pub violations: Vec<Violation>,
    /// Summary line for logs.
    pub message: String,
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// `backlog_total` disagrees with the per-class backlog.
    TotalMismatch {
        /// Lane concerned.
        lane: Approach,
        /// Value reported in the snapshot.
        reported: u64,
        /// Sum of the per-class counts.
        summed: u64,
    },
    /// A class backlog does not follow from the previous tick's flows.
    FlowMismatch {
        /// Lane concerned.
        lane: Approach,
        /// Vehicle class concerned.
        class: VehicleClass,
        /// `previous + arrivals - departures`.
        expected: u64,
        /// Backlog reported now.
        reported: u64,
    },
    /// More vehicles of a class departed than were waiting.
    OverDrain {
        /// Lane concerned.
        lane: Approach,
        /// Vehicle class concerned.
        class: VehicleClass,
        /// Vehicles waiting when the drain ran.
        available: u64,
        /// Vehicles reported departed.
        departed: u64,
    },
    /// A lane showed a light it must not show in the current substate.
    UnsafeSignal {
        /// Lane concerned.
        lane: Approach,
        /// Light the lane showed.
        shown: SignalState,
        /// Light it should have shown.
        expected: SignalState,
    },
    /// The granted green duration is outside its bounds.
    GreenOutOfBounds {
        /// Duration reported.
        seconds: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
}

/// Check vehicle conservation between two consecutive snapshots.
///
/// `previous` is `None` for the first tick, when every queue started
/// empty.
pub fn verify_accounting(
    previous: Option<&IntersectionSnapshot>,
    current: &IntersectionSnapshot,
) -> AccountingResult {
    let mut violations = Vec::new();

    for lane in &current.lanes {
        let summed = lane.backlog_by_class.total();
        if summed != lane.backlog_total {
            violations.push(Violation::TotalMismatch {
                lane: lane.lane,
                reported: lane.backlog_total,
                summed,
            });
        }

        let before = previous
            .and_then(|snap| snap.lane(lane.lane))
            .map_or(ClassCounts::ZERO, |prev| prev.backlog_by_class);
        check_lane_flows(lane, before, &mut violations);
    }

    finish(current.tick, violations, "vehicle accounting")
}

fn check_lane_flows(lane: &LaneSnapshot, before: ClassCounts, violations: &mut Vec<Violation>) {
    for class in VehicleClass::ALL {
        let available = before
            .get(class)
            .saturating_add(lane.arrivals_by_class.get(class));
        let departed = lane.departures_by_class.get(class);
        if departed > available {
            violations.push(Violation::OverDrain {
                lane: lane.lane,
                class,
                available,
                departed,
            });
            continue;
        }
        let expected = available.saturating_sub(departed);
        let reported = lane.backlog_by_class.get(class);
        if expected != reported {
            violations.push(Violation::FlowMismatch {
                lane: lane.lane,
                class,
                expected,
                reported,
            });
        }
    }
}

/// Check that the light pattern in `snapshot` is safe for `plan`.
pub fn verify_signal_safety(snapshot: &IntersectionSnapshot, plan: &PhasePlan) -> AccountingResult {
    let active = plan.get(snapshot.active_phase);
    let mut violations = Vec::new();

    for lane in &snapshot.lanes {
        let in_active = active.is_some_and(|phase| phase.contains(lane.lane));
        let expected = match (snapshot.transition, in_active) {
            (TransitionSubstate::None, true) => SignalState::Green,
            (TransitionSubstate::InYellow, true) => SignalState::Yellow,
            _ => SignalState::Red,
        };
        if lane.signal_state != expected {
            violations.push(Violation::UnsafeSignal {
                lane: lane.lane,
                shown: lane.signal_state,
                expected,
            });
        }
    }

    finish(snapshot.tick, violations, "signal safety")
}

/// Check that the granted green lies within the configured bounds.
pub fn verify_green_bounds(
    snapshot: &IntersectionSnapshot,
    timing: &SignalTimingConfig,
) -> AccountingResult {
    let seconds = snapshot.current_green_seconds;
    let mut violations = Vec::new();
    if !(timing.min_green_seconds..=timing.max_green_seconds).contains(&seconds) {
        violations.push(Violation::GreenOutOfBounds {
            seconds,
            min: timing.min_green_seconds,
            max: timing.max_green_seconds,
        });
    }
    finish(snapshot.tick, violations, "green bounds")
}

fn finish(tick: u64, violations: Vec<Violation>, check: &str) -> AccountingResult {
    if violations.is_empty() {
        AccountingResult::Balanced
    } else {
        let count = violations.len();
        AccountingResult::Anomaly(AccountingAnomaly {
            tick,
            violations,
            message: format!("ANOMALY at tick {tick}: {check} failed with {count} violation(s)"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SignalState::{Green, Red, Yellow};

    fn lane(approach: Approach, state: SignalState) -> LaneSnapshot {
        LaneSnapshot {
            lane: approach,
            signal_state: state,
            state_elapsed_seconds: 0.0,
            seconds_until_next_change: 0.0,
            backlog_total: 0,
            backlog_by_class: ClassCounts::ZERO,
            arrivals_this_tick: 0,
            arrivals_by_class: ClassCounts::ZERO,
            departures_this_tick: 0,
            departures_by_class: ClassCounts::ZERO,
            data_gap: false,
        }
    }

    fn snapshot(transition: TransitionSubstate, states: [SignalState; 4]) -> IntersectionSnapshot {
        IntersectionSnapshot {
            tick: 3,
            time_seconds: 18.0,
            active_phase: 0,
            transition,
            current_green_seconds: 60.0,
            lanes: Approach::ALL
                .into_iter()
                .zip(states)
                .map(|(approach, state)| lane(approach, state))
                .collect(),
            events: Vec::new(),
            clamps: Vec::new(),
        }
    }

    fn violations(result: AccountingResult) -> Vec<Violation> {
        match result {
            AccountingResult::Balanced => Vec::new(),
            AccountingResult::Anomaly(anomaly) => anomaly.violations,
        }
    }

    #[test]
    fn safe_patterns_pass() {
        let plan = PhasePlan::two_phase();
        for (transition, states) in [
            (TransitionSubstate::None, [Green, Green, Red, Red]),
            (TransitionSubstate::InYellow, [Yellow, Yellow, Red, Red]),
            (TransitionSubstate::InAllRed, [Red, Red, Red, Red]),
        ] {
            assert!(verify_signal_safety(&snapshot(transition, states), &plan).is_balanced());
        }
    }

    #[test]
    fn conflicting_greens_are_flagged() {
        let plan = PhasePlan::two_phase();
        let snap = snapshot(TransitionSubstate::None, [Green, Green, Green, Red]);
        let result = verify_signal_safety(&snap, &plan);
        assert!(matches!(&result, AccountingResult::Anomaly(a) if a.tick == 3));
        assert_eq!(
            violations(result),
            vec![Violation::UnsafeSignal {
                lane: Approach::East,
                shown: Green,
                expected: Red,
            }]
        );
    }

    #[test]
    fn green_during_all_red_is_flagged() {
        let plan = PhasePlan::two_phase();
        let snap = snapshot(TransitionSubstate::InAllRed, [Green, Red, Red, Red]);
        assert!(!verify_signal_safety(&snap, &plan).is_balanced());
    }

    #[test]
    fn flows_balance() {
        let mut prev = snapshot(TransitionSubstate::None, [Green, Green, Red, Red]);
        if let Some(north) = prev.lanes.first_mut() {
            north.backlog_by_class = ClassCounts::new(5, 1, 0);
            north.backlog_total = 6;
        }
        let mut current = prev.clone();
        current.tick = 4;
        if let Some(north) = current.lanes.first_mut() {
            north.arrivals_by_class = ClassCounts::new(2, 0, 1);
            north.departures_by_class = ClassCounts::new(3, 1, 0);
            north.backlog_by_class = ClassCounts::new(4, 0, 1);
            north.backlog_total = 5;
        }
        assert!(verify_accounting(Some(&prev), &current).is_balanced());
    }

    #[test]
    fn lost_vehicles_are_flagged() {
        let mut current = snapshot(TransitionSubstate::None, [Green, Green, Red, Red]);
        if let Some(east) = current.lanes.get_mut(2) {
            east.arrivals_by_class = ClassCounts::new(4, 0, 0);
            east.backlog_by_class = ClassCounts::new(3, 0, 0);
            east.backlog_total = 4;
        }
        let result = verify_accounting(None, &current);
        assert!(matches!(
            &result,
            AccountingResult::Anomaly(a) if a.message.contains("vehicle accounting")
        ));
        assert_eq!(violations(result).len(), 2);
    }

    #[test]
    fn over_drain_is_flagged() {
        let mut current = snapshot(TransitionSubstate::None, [Green, Green, Red, Red]);
        if let Some(south) = current.lanes.get_mut(1) {
            south.departures_by_class = ClassCounts::new(0, 0, 2);
        }
        let found = violations(verify_accounting(None, &current));
        assert!(matches!(
            found.first(),
            Some(Violation::OverDrain {
                class: VehicleClass::Truck,
                available: 0,
                departed: 2,
                ..
            })
        ));
    }

    #[test]
    fn green_bounds_are_checked() {
        let timing = SignalTimingConfig::default();
        let mut snap = snapshot(TransitionSubstate::None, [Green, Green, Red, Red]);
        assert!(verify_green_bounds(&snap, &timing).is_balanced());
        snap.current_green_seconds = 121.0;
        assert!(!verify_green_bounds(&snap, &timing).is_balanced());
    }
}
