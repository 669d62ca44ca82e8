//! Configuration loading and typed config structures for Signalflow.
//!
//! The canonical configuration lives in `signalflow-config.yaml`. This
//! module defines strongly-typed structs that mirror the YAML structure,
//! a loader that reads the file, and [`SignalTimingConfig::validate`],
//! which every scheduler runs before it is allowed to start.
//!
//! All durations are in seconds; the passing rate is vehicles per second.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use signalflow_types::{Approach, VehicleClass};

use crate::phase::{Phase, PhasePlan};

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is outside its allowed range or contradicts another value.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `signalflow-config.yaml`. Every field has a
/// default matching the field-tested values of the original deployment.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Signal timing and adaptive-control parameters.
    #[serde(default)]
    pub signal: SignalTimingConfig,

    /// Tick length and run bounds.
    #[serde(default)]
    pub simulation: RunConfig,

    /// Synthetic arrival generator parameters.
    #[serde(default)]
    pub arrivals: ArrivalConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Local output files.
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `SIGNALFLOW_LOG` overrides `logging.level`
    /// - `SIGNALFLOW_SEED` overrides `arrivals.seed`
    ///
    /// The result is validated before it is returned.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate it.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override selected values with environment variables when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("SIGNALFLOW_LOG") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SIGNALFLOW_SEED") {
            self.arrivals.seed = val.parse().map_err(|err| ConfigError::Invalid {
                reason: format!("SIGNALFLOW_SEED is not an unsigned integer: {err}"),
            })?;
        }
        Ok(())
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.signal.validate()?;
        self.simulation.validate()?;
        self.arrivals.validate()
    }
}

// ---------------------------------------------------------------------------
// Signal timing
// ---------------------------------------------------------------------------

/// Signal timing and adaptive-control parameters, immutable for a run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalTimingConfig {
    /// Green duration when no queue exceeds the threshold.
    #[serde(default = "default_base_green_seconds")]
    pub base_green_seconds: f64,

    /// Yellow clearance interval.
    #[serde(default = "default_yellow_seconds")]
    pub yellow_seconds: f64,

    /// All-red interval between yellow and the next green.
    #[serde(default = "default_all_red_seconds")]
    pub all_red_seconds: f64,

    /// Vehicles per second that clear the stop line on green.
    #[serde(default = "default_passing_rate")]
    pub passing_rate: f64,

    /// Backlog above which a green is extended or a red approach preempts.
    #[serde(default = "default_queue_threshold")]
    pub queue_threshold: u64,

    /// Green is never shorter than this, and preemption waits for it.
    #[serde(default = "default_min_green_seconds")]
    pub min_green_seconds: f64,

    /// Green is never extended past this.
    #[serde(default = "default_max_green_seconds")]
    pub max_green_seconds: f64,

    /// Extra green granted per vehicle above the threshold.
    #[serde(default = "default_extension_per_vehicle_seconds")]
    pub extension_per_vehicle_seconds: f64,

    /// Approaches that are green together, in cycle order.
    #[serde(default = "default_phases")]
    pub phases: Vec<[Approach; 2]>,
}

impl Default for SignalTimingConfig {
    fn default() -> Self {
        Self {
            base_green_seconds: default_base_green_seconds(),
            yellow_seconds: default_yellow_seconds(),
            all_red_seconds: default_all_red_seconds(),
            passing_rate: default_passing_rate(),
            queue_threshold: default_queue_threshold(),
            min_green_seconds: default_min_green_seconds(),
            max_green_seconds: default_max_green_seconds(),
            extension_per_vehicle_seconds: default_extension_per_vehicle_seconds(),
            phases: default_phases(),
        }
    }
}

impl SignalTimingConfig {
    /// Check bounds and cross-field constraints.
    ///
    /// All durations and the passing rate must be finite and positive,
    /// `min_green <= base_green <= max_green`, and the phases must cover
    /// each approach exactly once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("base_green_seconds", self.base_green_seconds)?;
        require_positive("yellow_seconds", self.yellow_seconds)?;
        require_positive("all_red_seconds", self.all_red_seconds)?;
        require_positive("passing_rate", self.passing_rate)?;
        require_positive("min_green_seconds", self.min_green_seconds)?;
        require_positive("max_green_seconds", self.max_green_seconds)?;
        require_positive(
            "extension_per_vehicle_seconds",
            self.extension_per_vehicle_seconds,
        )?;

        if self.queue_threshold == 0 {
            return Err(invalid("queue_threshold must be at least 1"));
        }
        if self.min_green_seconds > self.max_green_seconds {
            return Err(invalid(format!(
                "min_green_seconds ({}) exceeds max_green_seconds ({})",
                self.min_green_seconds, self.max_green_seconds
            )));
        }
        if self.base_green_seconds < self.min_green_seconds {
            return Err(invalid(format!(
                "base_green_seconds ({}) is below min_green_seconds ({})",
                self.base_green_seconds, self.min_green_seconds
            )));
        }
        if self.base_green_seconds > self.max_green_seconds {
            return Err(invalid(format!(
                "base_green_seconds ({}) exceeds max_green_seconds ({})",
                self.base_green_seconds, self.max_green_seconds
            )));
        }

        self.phase_plan().map(|_| ())
    }

    /// Build the validated phase cycle.
    pub fn phase_plan(&self) -> Result<PhasePlan, ConfigError> {
        let phases = self
            .phases
            .iter()
            .map(|&[first, second]| Phase::new(first, second))
            .collect::<Result<Vec<_>, _>>()?;
        PhasePlan::new(phases)
    }
}

// ---------------------------------------------------------------------------
// Run bounds
// ---------------------------------------------------------------------------

/// Tick length and run bounds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    /// Simulated seconds per tick.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: f64,

    /// Simulated seconds to run for (0 = until stopped).
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: f64,

    /// Real-time milliseconds to wait between ticks (0 = no wait).
    #[serde(default)]
    pub tick_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            duration_seconds: default_duration_seconds(),
            tick_interval_ms: 0,
        }
    }
}

impl RunConfig {
    /// The tick must be positive; the duration must be non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("simulation.tick_seconds", self.tick_seconds)?;
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            return Err(invalid(format!(
                "simulation.duration_seconds must be finite and non-negative, got {}",
                self.duration_seconds
            )));
        }
        Ok(())
    }

    /// Number of ticks covering `duration_seconds` (0 = unbounded).
    ///
    /// The original tick loop ran while `time <= duration`, so tick 0 and
    /// the tick landing exactly on the duration are both evaluated.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn max_ticks(&self) -> u64 {
        if self.duration_seconds <= 0.0 {
            return 0;
        }
        let ticks = (self.duration_seconds / self.tick_seconds).floor();
        if ticks >= u64::MAX as f64 {
            u64::MAX
        } else {
            // Non-negative and below u64::MAX: checked above.
            (ticks as u64).saturating_add(1)
        }
    }
}

// ---------------------------------------------------------------------------
// Synthetic arrivals
// ---------------------------------------------------------------------------

/// Rush-hour and off-peak vehicles per bucket for one approach.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlowProfile {
    /// Mean vehicles per bucket during the approach's peak hours.
    pub peak: f64,
    /// Mean vehicles per bucket outside the peak.
    pub off_peak: f64,
    /// Hours of the day (0-23) that count as peak, as half-open ranges.
    pub peak_hours: Vec<(u32, u32)>,
}

/// Parameters of the deterministic synthetic arrival generator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArrivalConfig {
    /// Seed for reproducible arrivals.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Width of one arrival record in seconds.
    #[serde(default = "default_bucket_seconds")]
    pub bucket_seconds: f64,

    /// Hour of day that simulated time zero corresponds to.
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,

    /// Relative spread of the per-bucket noise (0 = exact means).
    #[serde(default = "default_variation")]
    pub variation: f64,

    /// Probability that a bucket is a surge of 1.5x-2.5x.
    #[serde(default = "default_spike_chance")]
    pub spike_chance: f64,

    /// Per-approach flow profiles.
    #[serde(default = "default_flows")]
    pub flows: BTreeMap<Approach, FlowProfile>,

    /// Relative weight of each vehicle class in generated traffic.
    #[serde(default = "default_class_mix")]
    pub class_mix: BTreeMap<VehicleClass, f64>,
}

impl Default for ArrivalConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            bucket_seconds: default_bucket_seconds(),
            start_hour: default_start_hour(),
            variation: default_variation(),
            spike_chance: default_spike_chance(),
            flows: default_flows(),
            class_mix: default_class_mix(),
        }
    }
}

impl ArrivalConfig {
    /// Check generator parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("arrivals.bucket_seconds", self.bucket_seconds)?;
        if self.start_hour > 23 {
            return Err(invalid(format!(
                "arrivals.start_hour must be 0-23, got {}",
                self.start_hour
            )));
        }
        if !(0.0..=1.0).contains(&self.spike_chance) {
            return Err(invalid(format!(
                "arrivals.spike_chance must be within [0, 1], got {}",
                self.spike_chance
            )));
        }
        if !self.variation.is_finite() || self.variation < 0.0 {
            return Err(invalid("arrivals.variation must be finite and non-negative"));
        }
        for (approach, flow) in &self.flows {
            if !(flow.peak.is_finite() && flow.peak >= 0.0)
                || !(flow.off_peak.is_finite() && flow.off_peak >= 0.0)
            {
                return Err(invalid(format!(
                    "arrivals.flows.{approach} must have finite non-negative rates"
                )));
            }
        }
        let mix_total: f64 = self.class_mix.values().sum();
        if self.class_mix.values().any(|w| !w.is_finite() || *w < 0.0) || mix_total <= 0.0 {
            return Err(invalid(
                "arrivals.class_mix weights must be non-negative with a positive sum",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging and output
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,

    /// Log a per-tick summary line every N ticks (0 = never).
    #[serde(default = "default_snapshot_log_every")]
    pub snapshot_log_every: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            snapshot_log_every: default_snapshot_log_every(),
        }
    }
}

/// Local output files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Write every snapshot as one JSON line to this file.
    #[serde(default)]
    pub snapshot_jsonl: Option<PathBuf>,

    /// Write the end-of-run report as JSON to this file.
    #[serde(default)]
    pub report_path: Option<PathBuf>,

    /// Keep at most this many snapshots in the run report history.
    #[serde(default)]
    pub history_limit: usize,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be finite and positive, got {value}")))
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_base_green_seconds() -> f64 {
    60.0
}

const fn default_yellow_seconds() -> f64 {
    12.0
}

const fn default_all_red_seconds() -> f64 {
    6.0
}

const fn default_passing_rate() -> f64 {
    0.25
}

const fn default_queue_threshold() -> u64 {
    35
}

const fn default_min_green_seconds() -> f64 {
    30.0
}

const fn default_max_green_seconds() -> f64 {
    120.0
}

const fn default_extension_per_vehicle_seconds() -> f64 {
    3.0
}

fn default_phases() -> Vec<[Approach; 2]> {
    vec![
        [Approach::North, Approach::South],
        [Approach::East, Approach::West],
    ]
}

const fn default_tick_seconds() -> f64 {
    6.0
}

const fn default_duration_seconds() -> f64 {
    900.0
}

const fn default_seed() -> u64 {
    42
}

const fn default_bucket_seconds() -> f64 {
    60.0
}

const fn default_start_hour() -> u32 {
    8
}

const fn default_variation() -> f64 {
    0.25
}

const fn default_spike_chance() -> f64 {
    0.05
}

fn default_flows() -> BTreeMap<Approach, FlowProfile> {
    let commuter = vec![(8, 10), (17, 19)];
    let mut flows = BTreeMap::new();
    flows.insert(
        Approach::North,
        FlowProfile {
            peak: 40.0,
            off_peak: 20.0,
            peak_hours: commuter.clone(),
        },
    );
    flows.insert(
        Approach::South,
        FlowProfile {
            peak: 30.0,
            off_peak: 10.0,
            peak_hours: commuter,
        },
    );
    flows.insert(
        Approach::East,
        FlowProfile {
            peak: 50.0,
            off_peak: 10.0,
            peak_hours: vec![(7, 12)],
        },
    );
    flows.insert(
        Approach::West,
        FlowProfile {
            peak: 30.0,
            off_peak: 10.0,
            peak_hours: vec![(15, 20)],
        },
    );
    flows
}

fn default_class_mix() -> BTreeMap<VehicleClass, f64> {
    let mut mix = BTreeMap::new();
    mix.insert(VehicleClass::Car, 0.8);
    mix.insert(VehicleClass::Bus, 0.08);
    mix.insert(VehicleClass::Truck, 0.12);
    mix
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_snapshot_log_every() -> u64 {
    1
}
