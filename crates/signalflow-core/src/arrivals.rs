//! Arrival sources: where queued vehicles come from.
//!
//! The scheduler never parses raw data. Each tick it asks an
//! [`ArrivalSource`] how many vehicles of each class reached an approach
//! in a half-open window `(start, end]`. Two sources ship with the core:
//!
//! - [`ScheduledArrivals`] -- an in-memory table of time-stamped counts,
//!   the programmatic equivalent of a per-minute count sheet.
//! - [`SyntheticArrivals`] -- a seeded generator with commuter peaks,
//!   noise, and occasional surges for headless runs.
//!
//! A source that cannot answer a window returns an [`ArrivalError`]; the
//! lane model treats that as zero arrivals for the tick.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use signalflow_types::{Approach, ClassCounts, VehicleClass};

use crate::config::{ArrivalConfig, FlowProfile};

/// Seconds per hour, for mapping simulated time onto the time of day.
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Hours per day.
const HOURS_PER_DAY: u64 = 24;

/// Surge multiplier range applied when a bucket spikes.
const SURGE_RANGE: core::ops::Range<f64> = 1.5..2.5;

/// Most buckets one synthetic query will generate. Wider windows are
/// reported as [`ArrivalError::NoData`].
pub const MAX_BUCKETS_PER_WINDOW: u64 = 100_000;

/// Errors an arrival source may report for a window.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArrivalError {
    /// The source has nothing for this approach and window.
    #[error("no arrival data for {lane} in ({start}, {end}]")]
    NoData {
        /// The queried approach.
        lane: Approach,
        /// Exclusive window start, seconds.
        start: f64,
        /// Inclusive window end, seconds.
        end: f64,
    },

    /// The source holds data for the window but it is unusable.
    #[error("malformed arrival data for {lane}: {reason}")]
    Malformed {
        /// The queried approach.
        lane: Approach,
        /// Description of the problem.
        reason: String,
    },
}

/// A source of time-stamped vehicle arrivals.
///
/// Implementations must answer any non-decreasing sequence of windows and
/// must be deterministic: the same window always yields the same counts.
pub trait ArrivalSource: Send {
    /// Per-class arrivals at `lane` with timestamp in
    /// `(start_exclusive, end_inclusive]`.
    fn arrivals_between(
        &self,
        lane: Approach,
        start_exclusive: f64,
        end_inclusive: f64,
    ) -> Result<ClassCounts, ArrivalError>;
}

// ---------------------------------------------------------------------------
// Scheduled arrivals
// ---------------------------------------------------------------------------

/// One time-stamped arrival record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalRecord {
    /// When the vehicles reached the stop line queue, in seconds.
    pub timestamp: f64,
    /// How many of each class arrived.
    pub counts: ClassCounts,
}

/// In-memory arrival table, kept sorted by timestamp per approach.
#[derive(Debug, Clone, Default)]
pub struct ScheduledArrivals {
    records: BTreeMap<Approach, Vec<ArrivalRecord>>,
}

impl ScheduledArrivals {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Records may be pushed in any order.
    ///
    /// # Errors
    ///
    /// Returns [`ArrivalError::Malformed`] for a negative or non-finite
    /// timestamp; the table is left unchanged.
    pub fn push(
        &mut self,
        lane: Approach,
        timestamp: f64,
        counts: ClassCounts,
    ) -> Result<(), ArrivalError> {
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(ArrivalError::Malformed {
                lane,
                reason: format!("invalid timestamp {timestamp}"),
            });
        }
        let records = self.records.entry(lane).or_default();
        // Equal timestamps keep insertion order.
        let at = records.partition_point(|r| r.timestamp <= timestamp);
        records.insert(at, ArrivalRecord { timestamp, counts });
        Ok(())
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(
        mut self,
        lane: Approach,
        timestamp: f64,
        counts: ClassCounts,
    ) -> Result<Self, ArrivalError> {
        self.push(lane, timestamp, counts)?;
        Ok(self)
    }

    /// Timestamp of the last record for `lane`.
    pub fn last_timestamp(&self, lane: Approach) -> Option<f64> {
        self.records
            .get(&lane)
            .and_then(|records| records.last())
            .map(|r| r.timestamp)
    }
}

impl ArrivalSource for ScheduledArrivals {
    fn arrivals_between(
        &self,
        lane: Approach,
        start_exclusive: f64,
        end_inclusive: f64,
    ) -> Result<ClassCounts, ArrivalError> {
        let no_data = || ArrivalError::NoData {
            lane,
            start: start_exclusive,
            end: end_inclusive,
        };

        let records = self.records.get(&lane).ok_or_else(no_data)?;
        let last = records.last().map_or(f64::NEG_INFINITY, |r| r.timestamp);
        if start_exclusive >= last {
            // Past the end of the table: the feed has run dry.
            return Err(no_data());
        }

        let lo = records.partition_point(|r| r.timestamp <= start_exclusive);
        let hi = records.partition_point(|r| r.timestamp <= end_inclusive);
        let window = records.get(lo..hi).unwrap_or_default();

        Ok(window
            .iter()
            .fold(ClassCounts::ZERO, |acc, r| acc.saturating_add(r.counts)))
    }
}

// ---------------------------------------------------------------------------
// Synthetic arrivals
// ---------------------------------------------------------------------------

/// Seeded arrival generator.
///
/// Time is cut into buckets of `bucket_seconds`; bucket `k` (k >= 1) holds
/// the vehicles arriving in `((k-1)*b, k*b]` and is stamped at `k*b`. Each
/// bucket draws from its own RNG seeded by `(seed, approach, k)`, so the
/// result does not depend on how callers slice their windows.
#[derive(Debug, Clone)]
pub struct SyntheticArrivals {
    config: ArrivalConfig,
    /// Cumulative class weights in [`VehicleClass::ALL`] order.
    class_cdf: [f64; 3],
}

impl SyntheticArrivals {
    /// Create a generator from validated configuration.
    pub fn new(config: ArrivalConfig) -> Self {
        let weight = |class: VehicleClass| config.class_mix.get(&class).copied().unwrap_or(0.0);
        let total: f64 = VehicleClass::ALL.iter().map(|c| weight(*c)).sum();
        let mut cdf = [0.0; 3];
        let mut running = 0.0;
        for (slot, class) in cdf.iter_mut().zip(VehicleClass::ALL) {
            running += weight(class);
            *slot = if total > 0.0 { running / total } else { 1.0 };
        }
        Self {
            config,
            class_cdf: cdf,
        }
    }

    /// Counts for one bucket of one approach.
    pub fn bucket(&self, lane: Approach, index: u64) -> Option<ClassCounts> {
        let flow = self.config.flows.get(&lane)?;
        let mut rng = StdRng::seed_from_u64(bucket_seed(self.config.seed, lane, index));

        let mean = if is_peak(flow, self.hour_of_bucket(index)) {
            flow.peak
        } else {
            flow.off_peak
        };

        let spread = self.config.variation;
        let mut factor = 1.0 + spread * rng.random_range(-1.0..=1.0);
        if rng.random::<f64>() < self.config.spike_chance {
            factor *= rng.random_range(SURGE_RANGE);
        }
        let vehicles = to_count(mean * factor.max(0.0));

        let mut counts = ClassCounts::ZERO;
        for _ in 0..vehicles {
            let draw: f64 = rng.random();
            let class = VehicleClass::ALL
                .into_iter()
                .zip(self.class_cdf)
                .find(|(_, edge)| draw < *edge)
                .map_or(VehicleClass::Car, |(class, _)| class);
            let slot = counts.get_mut(class);
            *slot = slot.saturating_add(1);
        }
        Some(counts)
    }

    /// Hour of day at the start of bucket `index`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn hour_of_bucket(&self, index: u64) -> u64 {
        let start = self.bucket_time(index.saturating_sub(1));
        let hours = (start / SECONDS_PER_HOUR).floor().max(0.0);
        // Saturating float-to-int cast; bounded by the modulo below.
        let elapsed_hours = hours as u64;
        elapsed_hours
            .saturating_add(u64::from(self.config.start_hour))
            .checked_rem(HOURS_PER_DAY)
            .unwrap_or(0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn bucket_time(&self, index: u64) -> f64 {
        index as f64 * self.config.bucket_seconds
    }

    /// Index of the last bucket stamped at or before `time`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn bucket_at_or_before(&self, time: f64) -> u64 {
        if time <= 0.0 {
            return 0;
        }
        // Saturating float-to-int cast.
        (time / self.config.bucket_seconds).floor() as u64
    }
}

impl ArrivalSource for SyntheticArrivals {
    fn arrivals_between(
        &self,
        lane: Approach,
        start_exclusive: f64,
        end_inclusive: f64,
    ) -> Result<ClassCounts, ArrivalError> {
        if !self.config.flows.contains_key(&lane) {
            return Err(ArrivalError::NoData {
                lane,
                start: start_exclusive,
                end: end_inclusive,
            });
        }
        if end_inclusive <= start_exclusive {
            return Ok(ClassCounts::ZERO);
        }

        let first = self.bucket_at_or_before(start_exclusive).saturating_add(1);
        let last = self.bucket_at_or_before(end_inclusive);
        if last.saturating_sub(first) >= MAX_BUCKETS_PER_WINDOW {
            return Err(ArrivalError::NoData {
                lane,
                start: start_exclusive,
                end: end_inclusive,
            });
        }

        let mut total = ClassCounts::ZERO;
        for index in first..=last {
            if let Some(counts) = self.bucket(lane, index) {
                total = total.saturating_add(counts);
            }
        }
        Ok(total)
    }
}

fn is_peak(flow: &FlowProfile, hour: u64) -> bool {
    flow.peak_hours
        .iter()
        .any(|&(from, to)| (u64::from(from)..u64::from(to)).contains(&hour))
}

/// Mix seed, approach, and bucket into one well-spread RNG seed
/// (splitmix64 finalizer).
fn bucket_seed(seed: u64, lane: Approach, index: u64) -> u64 {
    let mut z = seed
        .wrapping_add(lane.ordinal().wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(index.wrapping_mul(0xD1B5_4A32_D192_ED03));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_count(value: f64) -> u64 {
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

    fn table() -> ScheduledArrivals {
        ScheduledArrivals::new()
            .with(Approach::North, 60.0, ClassCounts::new(5, 1, 0))
            .unwrap()
            .with(Approach::North, 120.0, ClassCounts::new(3, 0, 2))
            .unwrap()
            .with(Approach::North, 30.0, ClassCounts::new(1, 0, 0))
            .unwrap()
    }

    #[test]
    fn window_is_half_open() {
        let source = table();
        let counts = source.arrivals_between(Approach::North, 30.0, 60.0).unwrap();
        assert_eq!(counts, ClassCounts::new(5, 1, 0));

        let counts = source.arrivals_between(Approach::North, 0.0, 120.0).unwrap();
        assert_eq!(counts, ClassCounts::new(9, 1, 2));
    }

    #[test]
    fn empty_window_inside_table_is_zero() {
        let source = table();
        let counts = source.arrivals_between(Approach::North, 61.0, 100.0).unwrap();
        assert!(counts.is_empty());
    }

    #[test]
    fn unknown_lane_and_exhausted_table_are_gaps() {
        let source = table();
        assert!(matches!(
            source.arrivals_between(Approach::East, 0.0, 6.0),
            Err(ArrivalError::NoData { .. })
        ));
        assert!(matches!(
            source.arrivals_between(Approach::North, 120.0, 126.0),
            Err(ArrivalError::NoData { .. })
        ));
        assert_eq!(source.last_timestamp(Approach::North), Some(120.0));
    }

    #[test]
    fn bad_timestamps_are_rejected() {
        let mut source = ScheduledArrivals::new();
        assert!(
            source
                .push(Approach::West, f64::NAN, ClassCounts::new(1, 0, 0))
                .is_err()
        );
        assert!(
            source
                .push(Approach::West, -1.0, ClassCounts::new(1, 0, 0))
                .is_err()
        );
        assert!(source.last_timestamp(Approach::West).is_none());
    }

    #[test]
    fn synthetic_is_independent_of_window_slicing() {
        let source = SyntheticArrivals::new(ArrivalConfig::default());
        let whole = source.arrivals_between(Approach::East, 0.0, 600.0).unwrap();

        let mut sliced = ClassCounts::ZERO;
        let mut start = 0.0;
        while start < 600.0 {
            let end = start + 6.0;
            sliced = sliced.saturating_add(
                source.arrivals_between(Approach::East, start, end).unwrap(),
            );
            start = end;
        }
        assert_eq!(whole, sliced);
        assert!(whole.total() > 0);
    }

    #[test]
    fn synthetic_is_seed_deterministic() {
        let a = SyntheticArrivals::new(ArrivalConfig::default());
        let b = SyntheticArrivals::new(ArrivalConfig::default());
        let c = SyntheticArrivals::new(ArrivalConfig {
            seed: 7,
            ..ArrivalConfig::default()
        });
        let window = |s: &SyntheticArrivals| {
            s.arrivals_between(Approach::North, 0.0, 3600.0).unwrap()
        };
        assert_eq!(window(&a), window(&b));
        assert_ne!(window(&a), window(&c));
    }

    #[test]
    fn synthetic_class_mix_is_respected() {
        let mut mix = BTreeMap::new();
        mix.insert(VehicleClass::Bus, 1.0);
        let source = SyntheticArrivals::new(ArrivalConfig {
            class_mix: mix,
            ..ArrivalConfig::default()
        });
        let counts = source.arrivals_between(Approach::South, 0.0, 600.0).unwrap();
        assert_eq!(counts.car, 0);
        assert_eq!(counts.truck, 0);
        assert!(counts.bus > 0);
    }

    #[test]
    fn synthetic_peak_hours_raise_flow() {
        let quiet = ArrivalConfig {
            variation: 0.0,
            spike_chance: 0.0,
            start_hour: 3,
            ..ArrivalConfig::default()
        };
        let rush = ArrivalConfig {
            start_hour: 8,
            ..quiet.clone()
        };
        let off = SyntheticArrivals::new(quiet)
            .arrivals_between(Approach::North, 0.0, 600.0)
            .unwrap();
        let peak = SyntheticArrivals::new(rush)
            .arrivals_between(Approach::North, 0.0, 600.0)
            .unwrap();
        // 10 buckets at 20 vs 40 vehicles.
        assert_eq!(off.total(), 200);
        assert_eq!(peak.total(), 400);
    }

    #[test]
    fn synthetic_refuses_oversized_windows() {
        let source = SyntheticArrivals::new(ArrivalConfig::default());
        let far = 1.0e9;
        assert!(matches!(
            source.arrivals_between(Approach::North, 0.0, far),
            Err(ArrivalError::NoData { .. })
        ));
        assert!(matches!(
            source.arrivals_between(Approach::North, 0.0, f64::INFINITY),
            Err(ArrivalError::NoData { .. })
        ));
        // A narrow window that far out is still generated.
        assert!(source.arrivals_between(Approach::North, far, far + 60.0).is_ok());
    }
}
