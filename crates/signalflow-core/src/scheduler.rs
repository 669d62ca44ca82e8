//! The intersection scheduler: phase state machine and adaptive green.
//!
//! [`IntersectionScheduler::advance`] is the only mutating entry point. One
//! call evaluates one tick:
//!
//! 1. Ingest arrivals for every lane up to the tick time.
//! 2. Drain every green lane for the green time since the previous tick.
//! 3. Recompute the active phase's green duration from queue pressure.
//! 4. Run at most one step of the phase sequence
//!    `GREEN -> YELLOW -> ALL RED -> next GREEN`.
//! 5. Return an owned [`IntersectionSnapshot`].
//!
//! Transition precedence is fixed: a running yellow or all-red always
//! completes first, then a starved red approach may preempt once the
//! minimum green has elapsed, then the green ends normally when its
//! duration is used up.
//!
//! The scheduler is synchronous and deterministic. It holds no clock of its
//! own; the caller passes the tick time in.

use std::fmt;

use signalflow_types::{
    Approach, ClampNotice, ClassCounts, IntersectionSnapshot, LaneSnapshot, PhaseEvent,
    SignalState, TransitionSubstate,
};
use tracing::{debug, info, warn};

use crate::arrivals::ArrivalSource;
use crate::config::{ConfigError, SignalTimingConfig};
use crate::lane::LaneQueue;
use crate::phase::{Phase, PhasePlan};

/// Per-lane results gathered while a tick is evaluated.
#[derive(Debug, Clone, Copy, Default)]
struct LaneTick {
    arrivals: ClassCounts,
    departures: ClassCounts,
    data_gap: bool,
}

/// Adaptive four-way intersection controller.
pub struct IntersectionScheduler {
    timing: SignalTimingConfig,
    plan: PhasePlan,
    /// One lane per approach, in [`Approach::ALL`] order.
    lanes: [LaneQueue; 4],
    source: Option<Box<dyn ArrivalSource>>,

    current_phase: usize,
    active: Phase,
    cycle_start_time: f64,
    transition_start_time: f64,
    transition: TransitionSubstate,
    current_green_seconds: f64,

    /// Time of the most recent `advance`.
    last_time: f64,
    tick: u64,
}

impl fmt::Debug for IntersectionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntersectionScheduler")
            .field("tick", &self.tick)
            .field("last_time", &self.last_time)
            .field("current_phase", &self.current_phase)
            .field("transition", &self.transition)
            .field("current_green_seconds", &self.current_green_seconds)
            .field("lanes", &self.lanes)
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl IntersectionScheduler {
    /// Build a scheduler with phase 0 green at time 0.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the timing configuration fails
    /// [`SignalTimingConfig::validate`].
    pub fn new(
        timing: SignalTimingConfig,
        source: Option<Box<dyn ArrivalSource>>,
    ) -> Result<Self, ConfigError> {
        timing.validate()?;
        let plan = timing.phase_plan()?;
        let active = plan.get(0).copied().ok_or_else(|| ConfigError::Invalid {
            reason: "phase plan is empty".to_owned(),
        })?;

        let lanes = Approach::ALL.map(|approach| {
            let state = if active.contains(approach) {
                SignalState::Green
            } else {
                SignalState::Red
            };
            LaneQueue::new(approach, state, 0.0)
        });

        info!(
            phases = plan.len(),
            base_green = timing.base_green_seconds,
            min_green = timing.min_green_seconds,
            max_green = timing.max_green_seconds,
            queue_threshold = timing.queue_threshold,
            has_source = source.is_some(),
            "Intersection scheduler initialised"
        );

        Ok(Self {
            current_green_seconds: timing.base_green_seconds,
            timing,
            plan,
            lanes,
            source,
            current_phase: 0,
            active,
            cycle_start_time: 0.0,
            transition_start_time: 0.0,
            transition: TransitionSubstate::None,
            last_time: 0.0,
            tick: 0,
        })
    }

    /// Evaluate one tick at simulated time `now` and return its snapshot.
    ///
    /// Never fails. A `now` earlier than the previous call is evaluated at
    /// the previous time and reported as a [`ClampNotice::TimeRegression`];
    /// a NaN or infinite `now` is likewise held at the previous time and
    /// reported as [`ClampNotice::NonFiniteTime`].
    pub fn advance(&mut self, now: f64) -> IntersectionSnapshot {
        let mut events = Vec::new();
        let mut clamps = Vec::new();

        let now = if !now.is_finite() {
            warn!(
                requested = now,
                applied = self.last_time,
                "Non-finite tick time, evaluating at previous time"
            );
            clamps.push(ClampNotice::NonFiniteTime {
                applied_time: self.last_time,
            });
            self.last_time
        } else if now >= self.last_time {
            now
        } else {
            warn!(
                requested = now,
                applied = self.last_time,
                "Time went backwards, evaluating at previous time"
            );
            clamps.push(ClampNotice::TimeRegression {
                requested_time: now,
                applied_time: self.last_time,
            });
            self.last_time
        };
        self.last_time = now;
        self.tick = self.tick.saturating_add(1);

        let mut ticks = [LaneTick::default(); 4];
        let source = self.source.as_deref();
        let rate = self.timing.passing_rate;
        for (lane, tick) in self.lanes.iter_mut().zip(ticks.iter_mut()) {
            let ingest = lane.ingest_arrivals(source, now);
            tick.arrivals = ingest.arrivals;
            tick.data_gap = ingest.data_gap;
        }
        for (lane, tick) in self.lanes.iter_mut().zip(ticks.iter_mut()) {
            tick.departures = lane.drain_green_until(now, rate).departures;
        }

        self.update_green_duration(&mut clamps);
        self.step_phase_sequence(now, &mut events, &mut clamps);

        self.snapshot(now, &ticks, events, clamps)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Index of the active (or outgoing) phase.
    pub const fn current_phase(&self) -> usize {
        self.current_phase
    }

    /// Transition substate.
    pub const fn transition(&self) -> TransitionSubstate {
        self.transition
    }

    /// Green duration granted to the active phase.
    pub const fn current_green_seconds(&self) -> f64 {
        self.current_green_seconds
    }

    /// When the active phase turned green.
    pub const fn cycle_start_time(&self) -> f64 {
        self.cycle_start_time
    }

    /// Number of `advance` calls so far.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Time of the most recent `advance`.
    pub const fn last_time(&self) -> f64 {
        self.last_time
    }

    /// The phase cycle.
    pub const fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    /// Timing configuration in force.
    pub const fn timing(&self) -> &SignalTimingConfig {
        &self.timing
    }

    /// One lane's queue.
    pub fn lane(&self, approach: Approach) -> Option<&LaneQueue> {
        self.lanes.iter().find(|lane| lane.lane() == approach)
    }

    /// Seconds until `approach` next changes light, as of the last tick.
    ///
    /// Green lanes count down the granted green (a preemption may end it
    /// sooner); yellow lanes count down the yellow; red lanes count the
    /// rest of the running stage plus a base-length stage for every phase
    /// that is served before theirs.
    pub fn seconds_until_next_change(&self, approach: Approach) -> f64 {
        let now = self.last_time;
        let t = &self.timing;
        let Some(lane) = self.lane(approach) else {
            return 0.0;
        };

        match lane.signal_state() {
            SignalState::Green => {
                (self.current_green_seconds - (now - self.cycle_start_time)).max(0.0)
            }
            SignalState::Yellow => (t.yellow_seconds - (now - self.transition_start_time)).max(0.0),
            SignalState::Red => {
                let Some(target) = self.plan.phase_of(approach) else {
                    return 0.0;
                };
                let since_transition = now - self.transition_start_time;
                let mut seconds = match self.transition {
                    TransitionSubstate::None => {
                        (self.current_green_seconds - (now - self.cycle_start_time)).max(0.0)
                            + t.yellow_seconds
                            + t.all_red_seconds
                    }
                    TransitionSubstate::InYellow => {
                        (t.yellow_seconds - since_transition).max(0.0) + t.all_red_seconds
                    }
                    TransitionSubstate::InAllRed => (t.all_red_seconds - since_transition).max(0.0),
                };

                let full_stage = t.base_green_seconds + t.yellow_seconds + t.all_red_seconds;
                let mut index = self.plan.next_index(self.current_phase);
                for _ in 0..self.plan.len() {
                    if index == target {
                        break;
                    }
                    seconds += full_stage;
                    index = self.plan.next_index(index);
                }
                seconds
            }
        }
    }

    // -----------------------------------------------------------------------
    // Adaptive green
    // -----------------------------------------------------------------------

    /// Longest backlog among the active phase's lanes.
    fn active_max_queue(&self) -> u64 {
        self.active
            .lanes()
            .iter()
            .filter_map(|approach| self.lane(*approach))
            .map(LaneQueue::backlog_total)
            .max()
            .unwrap_or(0)
    }

    /// Base green, stretched per vehicle above the threshold, then held
    /// within `[min_green, max_green]`.
    fn update_green_duration(&mut self, clamps: &mut Vec<ClampNotice>) {
        let t = &self.timing;
        let max_queue = self.active_max_queue();

        let requested = if max_queue > t.queue_threshold {
            let excess = vehicles_as_f64(max_queue.saturating_sub(t.queue_threshold));
            t.extension_per_vehicle_seconds.mul_add(excess, t.base_green_seconds)
        } else {
            t.base_green_seconds
        };

        let mut applied = requested;
        if applied > t.max_green_seconds {
            applied = t.max_green_seconds;
            debug!(requested, applied, max_queue, "Green extension capped at maximum");
            clamps.push(ClampNotice::GreenExtensionCapped {
                requested_seconds: requested,
                applied_seconds: applied,
            });
        }
        if applied < t.min_green_seconds {
            let before = applied;
            applied = t.min_green_seconds;
            debug!(requested = before, applied, "Green raised to minimum");
            clamps.push(ClampNotice::GreenRaisedToMinimum {
                requested_seconds: before,
                applied_seconds: applied,
            });
        }

        self.current_green_seconds = applied;
    }

    // -----------------------------------------------------------------------
    // Phase sequence
    // -----------------------------------------------------------------------

    fn step_phase_sequence(
        &mut self,
        now: f64,
        events: &mut Vec<PhaseEvent>,
        clamps: &mut Vec<ClampNotice>,
    ) {
        let since_transition = now - self.transition_start_time;
        match self.transition {
            TransitionSubstate::InYellow => {
                if since_transition >= self.timing.yellow_seconds {
                    self.begin_all_red(now, events);
                }
            }
            TransitionSubstate::InAllRed => {
                if since_transition >= self.timing.all_red_seconds {
                    self.begin_next_green(now, events, clamps);
                }
            }
            TransitionSubstate::None => {
                let green_elapsed = now - self.cycle_start_time;
                let starved = if green_elapsed >= self.timing.min_green_seconds {
                    self.starved_approach()
                } else {
                    None
                };
                if let Some(approach) = starved {
                    self.begin_yellow(now, Some(approach), events);
                } else if green_elapsed >= self.current_green_seconds {
                    self.begin_yellow(now, None, events);
                }
            }
        }
    }

    /// First red approach whose backlog exceeds the threshold.
    fn starved_approach(&self) -> Option<Approach> {
        self.lanes
            .iter()
            .filter(|lane| !self.active.contains(lane.lane()))
            .find(|lane| lane.backlog_total() > self.timing.queue_threshold)
            .map(LaneQueue::lane)
    }

    fn begin_yellow(&mut self, now: f64, preempted_by: Option<Approach>, events: &mut Vec<PhaseEvent>) {
        self.transition = TransitionSubstate::InYellow;
        self.transition_start_time = now;
        for lane in &mut self.lanes {
            if self.active.contains(lane.lane()) {
                lane.set_signal(SignalState::Yellow, now);
            }
        }

        if let Some(approach) = preempted_by {
            info!(
                tick = self.tick,
                time = now,
                phase = self.current_phase,
                preempted_by = %approach,
                green_elapsed = now - self.cycle_start_time,
                "Green cut short by starved approach"
            );
        } else {
            info!(
                tick = self.tick,
                time = now,
                phase = self.current_phase,
                green_elapsed = now - self.cycle_start_time,
                "Yellow started"
            );
        }
        events.push(PhaseEvent::YellowStarted {
            phase: self.current_phase,
            preempted_by,
        });
    }

    fn begin_all_red(&mut self, now: f64, events: &mut Vec<PhaseEvent>) {
        self.transition = TransitionSubstate::InAllRed;
        self.transition_start_time = now;
        for lane in &mut self.lanes {
            lane.set_signal(SignalState::Red, now);
        }
        debug!(tick = self.tick, time = now, phase = self.current_phase, "All-red started");
        events.push(PhaseEvent::AllRedStarted {
            phase: self.current_phase,
        });
    }

    fn begin_next_green(
        &mut self,
        now: f64,
        events: &mut Vec<PhaseEvent>,
        clamps: &mut Vec<ClampNotice>,
    ) {
        let next = self.plan.next_index(self.current_phase);
        self.current_phase = next;
        self.active = self.plan.get(next).copied().unwrap_or(self.active);
        self.cycle_start_time = now;
        self.transition = TransitionSubstate::None;

        for lane in &mut self.lanes {
            let state = if self.active.contains(lane.lane()) {
                SignalState::Green
            } else {
                SignalState::Red
            };
            lane.set_signal(state, now);
        }

        // The incoming phase's queues decide its first green duration.
        self.update_green_duration(clamps);

        let [first, second] = self.active.lanes();
        info!(
            tick = self.tick,
            time = now,
            phase = next,
            first = %first,
            second = %second,
            green_seconds = self.current_green_seconds,
            "Green started"
        );
        events.push(PhaseEvent::GreenStarted { phase: next });
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    fn snapshot(
        &self,
        now: f64,
        ticks: &[LaneTick; 4],
        events: Vec<PhaseEvent>,
        clamps: Vec<ClampNotice>,
    ) -> IntersectionSnapshot {
        let lanes = self
            .lanes
            .iter()
            .zip(ticks)
            .map(|(lane, tick)| LaneSnapshot {
                lane: lane.lane(),
                signal_state: lane.signal_state(),
                state_elapsed_seconds: lane.state_elapsed(now),
                seconds_until_next_change: self.seconds_until_next_change(lane.lane()),
                backlog_total: lane.backlog_total(),
                backlog_by_class: lane.backlog(),
                arrivals_this_tick: tick.arrivals.total(),
                arrivals_by_class: tick.arrivals,
                departures_this_tick: tick.departures.total(),
                departures_by_class: tick.departures,
                data_gap: tick.data_gap,
            })
            .collect();

        IntersectionSnapshot {
            tick: self.tick,
            time_seconds: now,
            active_phase: self.current_phase,
            transition: self.transition,
            current_green_seconds: self.current_green_seconds,
            lanes,
            events,
            clamps,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
const fn vehicles_as_f64(count: u64) -> f64 {
    // Exact for any realistic queue length.
    count as f64
}
