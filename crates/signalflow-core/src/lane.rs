//! Per-approach vehicle queue.
//!
//! A [`LaneQueue`] owns one approach's backlog, split by vehicle class. It
//! ingests arrivals from an [`ArrivalSource`] and meters departures while
//! green. It never decides when it is green; the scheduler sets its signal
//! state through [`LaneQueue::set_signal`].
//!
//! Draining is tick-incremental. Each call drains only the green time
//! accumulated since the previous call. Fractional vehicle capacity left
//! over by the integer floor is carried in seconds to the next call, so a
//! green interval drains the same total whether it is sliced into 1 s or
//! 6 s ticks.

use signalflow_types::{Approach, ClassCounts, SignalState, VehicleClass};
use tracing::{debug, warn};

use crate::arrivals::{ArrivalError, ArrivalSource};

/// Result of one arrival ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestOutcome {
    /// Vehicles added to the backlog.
    pub arrivals: ClassCounts,
    /// The source had no usable data for the window.
    pub data_gap: bool,
}

impl IngestOutcome {
    /// Total vehicles ingested.
    pub const fn total(&self) -> u64 {
        self.arrivals.total()
    }
}

/// Result of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainOutcome {
    /// Vehicles that departed, per class.
    pub departures: ClassCounts,
    /// Vehicles the green time could have served, before clamping to the
    /// backlog.
    pub capacity: u64,
}

impl DrainOutcome {
    /// Total vehicles departed.
    pub const fn total(&self) -> u64 {
        self.departures.total()
    }
}

/// One approach's queue and light.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneQueue {
    lane: Approach,
    backlog: ClassCounts,
    /// High-water mark of consumed arrivals; never decreases.
    last_processed_time: f64,
    signal_state: SignalState,
    state_entered_at: f64,
    /// Green time up to here has already been drained.
    drained_through: f64,
    /// Green seconds not yet converted into a whole departure.
    carry_seconds: f64,
    /// The previous ingestion hit a data gap.
    in_data_gap: bool,
}

impl LaneQueue {
    /// A new empty lane showing `signal_state` since time `at`.
    pub const fn new(lane: Approach, signal_state: SignalState, at: f64) -> Self {
        Self {
            lane,
            backlog: ClassCounts::ZERO,
            last_processed_time: at,
            signal_state,
            state_entered_at: at,
            drained_through: at,
            carry_seconds: 0.0,
            in_data_gap: false,
        }
    }

    /// Which approach this lane serves.
    pub const fn lane(&self) -> Approach {
        self.lane
    }

    /// Vehicles waiting, per class.
    pub const fn backlog(&self) -> ClassCounts {
        self.backlog
    }

    /// Vehicles waiting, all classes.
    pub const fn backlog_total(&self) -> u64 {
        self.backlog.total()
    }

    /// Time up to which arrivals have been consumed.
    pub const fn last_processed_time(&self) -> f64 {
        self.last_processed_time
    }

    /// Light currently shown.
    pub const fn signal_state(&self) -> SignalState {
        self.signal_state
    }

    /// When the lane entered its current light.
    pub const fn state_entered_at(&self) -> f64 {
        self.state_entered_at
    }

    /// Seconds spent in the current light as of `now`.
    pub fn state_elapsed(&self, now: f64) -> f64 {
        (now - self.state_entered_at).max(0.0)
    }

    /// Switch the light. Re-setting the current light is a no-op, so
    /// `state_entered_at` only moves on a real change.
    pub fn set_signal(&mut self, state: SignalState, at: f64) {
        if state == self.signal_state {
            return;
        }
        self.signal_state = state;
        self.state_entered_at = at;
        if state == SignalState::Green {
            self.drained_through = at;
            self.carry_seconds = 0.0;
        }
    }

    /// Add arrivals in `(last_processed_time, upto_time]` to the backlog.
    ///
    /// Without a source this does nothing. A window at or before the
    /// high-water mark is ignored, so replaying a time never double counts.
    /// A data gap counts as zero arrivals and still advances the mark;
    /// malformed data leaves the mark where it is.
    pub fn ingest_arrivals(
        &mut self,
        source: Option<&dyn ArrivalSource>,
        upto_time: f64,
    ) -> IngestOutcome {
        let Some(source) = source else {
            return IngestOutcome::default();
        };
        if upto_time <= self.last_processed_time {
            return IngestOutcome::default();
        }

        match source.arrivals_between(self.lane, self.last_processed_time, upto_time) {
            Ok(arrivals) => {
                self.backlog = self.backlog.saturating_add(arrivals);
                self.last_processed_time = upto_time;
                self.in_data_gap = false;
                IngestOutcome {
                    arrivals,
                    data_gap: false,
                }
            }
            Err(err @ ArrivalError::NoData { .. }) => {
                // Warn once per gap, not once per tick.
                if self.in_data_gap {
                    debug!(lane = %self.lane, error = %err, "Arrival data gap continues");
                } else {
                    warn!(lane = %self.lane, error = %err, "Arrival data gap, counting zero arrivals");
                }
                self.in_data_gap = true;
                self.last_processed_time = upto_time;
                IngestOutcome {
                    arrivals: ClassCounts::ZERO,
                    data_gap: true,
                }
            }
            Err(err @ ArrivalError::Malformed { .. }) => {
                warn!(lane = %self.lane, error = %err, "Ignoring malformed arrival data");
                IngestOutcome {
                    arrivals: ClassCounts::ZERO,
                    data_gap: true,
                }
            }
        }
    }

    /// Drain the green time elapsed since the previous drain, up to `now`.
    ///
    /// Does nothing unless the lane is green.
    pub fn drain_green_until(&mut self, now: f64, passing_rate: f64) -> DrainOutcome {
        if self.signal_state != SignalState::Green || now <= self.drained_through {
            return DrainOutcome::default();
        }

        let seconds = self.carry_seconds + (now - self.drained_through);
        self.drained_through = now;

        let outcome = self.drain_during_green(seconds, passing_rate);
        self.carry_seconds = if self.backlog.is_empty() {
            // Idle green time is lost, not banked.
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let used = outcome.capacity as f64 / passing_rate;
            (seconds - used).max(0.0)
        };
        outcome
    }

    /// Serve `elapsed_green_seconds` of green at `passing_rate` vehicles
    /// per second.
    ///
    /// Capacity is `floor(rate * seconds)`, clamped to the backlog, and is
    /// shared across classes in proportion to each class's share of the
    /// backlog. Whatever the per-class floors leave over goes one vehicle
    /// at a time to the highest-priority class (car, bus, truck) that still
    /// has vehicles waiting.
    pub fn drain_during_green(
        &mut self,
        elapsed_green_seconds: f64,
        passing_rate: f64,
    ) -> DrainOutcome {
        let total = self.backlog.total();
        if total == 0 {
            return DrainOutcome::default();
        }

        let capacity = whole_vehicles(passing_rate * elapsed_green_seconds);
        let served = capacity.min(total);

        let mut departures = ClassCounts::ZERO;
        for class in VehicleClass::ALL {
            *departures.get_mut(class) = proportional_share(served, self.backlog.get(class), total);
        }

        // Each leftover vehicle goes to the first class with room left, so
        // car is filled before bus gets any.
        let mut remainder = served.saturating_sub(departures.total());
        for class in VehicleClass::ALL {
            let room = self.backlog.get(class).saturating_sub(departures.get(class));
            let extra = room.min(remainder);
            let slot = departures.get_mut(class);
            *slot = slot.saturating_add(extra);
            remainder = remainder.saturating_sub(extra);
        }

        self.backlog = self.backlog.saturating_sub(departures);
        DrainOutcome {
            departures,
            capacity,
        }
    }
}

/// `floor(served * part / whole)` in exact integer arithmetic.
fn proportional_share(served: u64, part: u64, whole: u64) -> u64 {
    let share = u128::from(served)
        .saturating_mul(u128::from(part))
        .checked_div(u128::from(whole))
        .unwrap_or(0);
    u64::try_from(share).unwrap_or(part).min(part)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_vehicles(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        // Saturating float-to-int cast.
        value.floor() as u64
    } else {
        0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::arrivals::ScheduledArrivals;

    fn lane_with(backlog: ClassCounts) -> LaneQueue {
        let mut lane = LaneQueue::new(Approach::North, SignalState::Green, 0.0);
        lane.backlog = backlog;
        lane
    }

    #[test]
    fn two_seconds_at_one_per_second_serves_two_cars() {
        let mut lane = lane_with(ClassCounts::new(10, 0, 0));
        let out = lane.drain_during_green(2.0, 1.0);
        assert_eq!(out.capacity, 2);
        assert_eq!(out.departures, ClassCounts::new(2, 0, 0));
        assert_eq!(lane.backlog(), ClassCounts::new(8, 0, 0));
    }

    #[test]
    fn remainder_goes_to_car_then_bus() {
        let mut lane = lane_with(ClassCounts::new(1, 1, 1));
        let out = lane.drain_during_green(2.0, 1.0);
        assert_eq!(out.departures, ClassCounts::new(1, 1, 0));
        assert_eq!(lane.backlog(), ClassCounts::new(0, 0, 1));
    }

    #[test]
    fn remainder_skips_drained_classes() {
        let mut lane = lane_with(ClassCounts::new(0, 1, 2));
        let out = lane.drain_during_green(2.0, 1.0);
        // Floors: bus 0, truck 1. One left over; car is empty, bus takes it.
        assert_eq!(out.departures, ClassCounts::new(0, 1, 1));
    }

    #[test]
    fn remainder_fills_car_before_bus() {
        let mut lane = lane_with(ClassCounts::new(10, 10, 10));
        let out = lane.drain_during_green(5.0, 1.0);
        // Floors give 1 each; both leftovers go to car.
        assert_eq!(out.departures, ClassCounts::new(3, 1, 1));
        assert_eq!(lane.backlog(), ClassCounts::new(7, 9, 9));
    }

    #[test]
    fn remainder_moves_on_once_car_is_empty() {
        let mut lane = lane_with(ClassCounts::new(1, 4, 4));
        let out = lane.drain_during_green(4.0, 1.0);
        // Floors: car 0, bus 1, truck 1. Car takes one, bus the other.
        assert_eq!(out.departures, ClassCounts::new(1, 2, 1));
    }

    #[test]
    fn allocation_is_proportional() {
        let mut lane = lane_with(ClassCounts::new(60, 20, 20));
        let out = lane.drain_during_green(10.0, 1.0);
        assert_eq!(out.departures, ClassCounts::new(6, 2, 2));
    }

    #[test]
    fn capacity_is_clamped_to_backlog() {
        let mut lane = lane_with(ClassCounts::new(2, 1, 0));
        let out = lane.drain_during_green(100.0, 1.0);
        assert_eq!(out.capacity, 100);
        assert_eq!(out.departures, ClassCounts::new(2, 1, 0));
        assert!(lane.backlog().is_empty());
    }

    #[test]
    fn empty_backlog_drains_nothing() {
        let mut lane = lane_with(ClassCounts::ZERO);
        assert_eq!(lane.drain_during_green(60.0, 1.0), DrainOutcome::default());
    }

    #[test]
    fn fractional_green_floors() {
        let mut lane = lane_with(ClassCounts::new(10, 0, 0));
        assert_eq!(lane.drain_during_green(3.9, 0.5).total(), 1);
    }

    #[test]
    fn incremental_drain_carries_fractions() {
        let mut lane = lane_with(ClassCounts::new(100, 0, 0));
        // 0.25 veh/s over 6 s ticks: 1.5 vehicles per tick.
        let served: u64 = [6.0, 12.0, 18.0, 24.0]
            .iter()
            .map(|t| lane.drain_green_until(*t, 0.25).total())
            .sum();
        assert_eq!(served, 6);
        // Repeating a time drains nothing more.
        assert_eq!(lane.drain_green_until(24.0, 0.25).total(), 0);
    }

    #[test]
    fn red_lane_does_not_drain() {
        let mut lane = lane_with(ClassCounts::new(10, 0, 0));
        lane.set_signal(SignalState::Red, 0.0);
        assert_eq!(lane.drain_green_until(30.0, 1.0).total(), 0);
    }

    #[test]
    fn green_restart_resets_drain_mark() {
        let mut lane = lane_with(ClassCounts::new(10, 0, 0));
        lane.set_signal(SignalState::Red, 5.0);
        lane.set_signal(SignalState::Green, 50.0);
        assert!((lane.state_entered_at() - 50.0).abs() < f64::EPSILON);
        // Only the 2 s since the green restart count.
        assert_eq!(lane.drain_green_until(52.0, 1.0).total(), 2);
    }

    #[test]
    fn ingest_is_replay_safe() {
        let source = ScheduledArrivals::new()
            .with(Approach::North, 3.0, ClassCounts::new(2, 1, 0))
            .unwrap()
            .with(Approach::North, 9.0, ClassCounts::new(1, 0, 1))
            .unwrap();
        let mut lane = LaneQueue::new(Approach::North, SignalState::Red, 0.0);

        assert_eq!(lane.ingest_arrivals(Some(&source), 6.0).total(), 3);
        assert_eq!(lane.ingest_arrivals(Some(&source), 6.0).total(), 0);
        assert_eq!(lane.ingest_arrivals(Some(&source), 4.0).total(), 0);
        assert_eq!(lane.ingest_arrivals(Some(&source), 9.0).total(), 2);
        assert_eq!(lane.backlog(), ClassCounts::new(3, 1, 1));
        assert!((lane.last_processed_time() - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ingest_without_source_is_noop() {
        let mut lane = LaneQueue::new(Approach::East, SignalState::Red, 0.0);
        let out = lane.ingest_arrivals(None, 60.0);
        assert_eq!(out, IngestOutcome::default());
        assert!(lane.last_processed_time().abs() < f64::EPSILON);
    }

    #[test]
    fn data_gap_advances_mark_with_zero_arrivals() {
        let source = ScheduledArrivals::new();
        let mut lane = LaneQueue::new(Approach::West, SignalState::Red, 0.0);
        let out = lane.ingest_arrivals(Some(&source), 6.0);
        assert!(out.data_gap);
        assert_eq!(out.total(), 0);
        assert!((lane.last_processed_time() - 6.0).abs() < f64::EPSILON);
    }

    struct Broken;

    impl ArrivalSource for Broken {
        fn arrivals_between(
            &self,
            lane: Approach,
            _start_exclusive: f64,
            _end_inclusive: f64,
        ) -> Result<ClassCounts, ArrivalError> {
            Err(ArrivalError::Malformed {
                lane,
                reason: "negative count".to_owned(),
            })
        }
    }

    #[test]
    fn malformed_data_is_a_true_noop() {
        let mut lane = LaneQueue::new(Approach::South, SignalState::Red, 0.0);
        let out = lane.ingest_arrivals(Some(&Broken), 6.0);
        assert!(out.data_gap);
        assert!(lane.backlog().is_empty());
        assert!(lane.last_processed_time().abs() < f64::EPSILON);
    }
}
