//! Engine binary for the Signalflow intersection scheduler.
//!
//! Wires configuration, logging, the synthetic arrival source, the
//! scheduler, and the output sinks together and runs the tick loop until
//! the configured duration is covered or Ctrl-C is pressed.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first argument, or `signalflow-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the arrival source and the scheduler
//! 4. Create the simulated clock and operator state
//! 5. Install the Ctrl-C stop handler and the operator console
//! 6. Run the simulation loop
//! 7. Log the result and final status, and write the run report

mod console;
mod error;
mod sinks;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use signalflow_core::arrivals::SyntheticArrivals;
use signalflow_core::clock::SimClock;
use signalflow_core::config::{LoggingConfig, SimulationConfig};
use signalflow_core::operator::OperatorState;
use signalflow_core::report::RunReport;
use signalflow_core::runner;
use signalflow_core::scheduler::IntersectionScheduler;
use signalflow_types::RunId;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::sinks::{EngineSinks, JsonLinesSink, TracingSink};

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG: &str = "signalflow-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, an output file cannot be
/// created, or the run fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    let run_id = RunId::new();
    info!(%run_id, "signalflow-engine starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        seed = config.arrivals.seed,
        start_hour = config.arrivals.start_hour,
        tick_seconds = config.simulation.tick_seconds,
        duration_seconds = config.simulation.duration_seconds,
        "Run parameters"
    );

    // 3. Arrival source and scheduler.
    let source = SyntheticArrivals::new(config.arrivals.clone());
    let mut scheduler = IntersectionScheduler::new(config.signal.clone(), Some(Box::new(source)))
        .map_err(EngineError::from)?;

    // 4. Clock and operator state.
    let mut clock = SimClock::new(config.simulation.tick_seconds).map_err(EngineError::from)?;
    let operator = Arc::new(OperatorState::new(
        config.simulation.tick_interval_ms,
        config.simulation.max_ticks(),
    ));
    info!(
        max_ticks = operator.max_ticks(),
        tick_interval_ms = operator.tick_interval_ms(),
        "Operator state initialized"
    );

    // 5. Ctrl-C and the `stop` console command request a clean stop
    //    between ticks.
    {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, stopping after the current tick");
                    operator.request_stop();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
    }
    console::spawn(Arc::clone(&operator));

    // 6. Run.
    let jsonl = config
        .output
        .snapshot_jsonl
        .as_deref()
        .map(JsonLinesSink::create)
        .transpose()?;
    let mut sinks = EngineSinks {
        tracing: TracingSink::new(config.logging.snapshot_log_every),
        jsonl,
        report: RunReport::new(run_id, config.output.history_limit),
    };

    let result = runner::run_simulation(&mut scheduler, &mut clock, &operator, &mut sinks)
        .await
        .map_err(EngineError::from)?;

    // 7. Results.
    runner::log_simulation_end(&result);
    console::log_status(&operator).await;
    sinks.report.log_summary();
    if let Some(path) = config.output.report_path.as_deref() {
        write_report(&sinks.report, path)?;
    }

    info!(
        end_reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        anomalies = result.anomalies,
        "signalflow-engine shutdown complete"
    );

    Ok(())
}

/// Load configuration from `path`, falling back to defaults (with
/// environment overrides) when the file does not exist. The flag tells
/// whether the file was read.
fn load_config(path: &Path) -> Result<(SimulationConfig, bool), EngineError> {
    if path.exists() {
        Ok((SimulationConfig::from_file(path)?, true))
    } else {
        let mut config = SimulationConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok((config, false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<(), EngineError> {
    let json = report.to_json_pretty()?;
    std::fs::write(path, json).map_err(|source| EngineError::Output {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "Run report written");
    Ok(())
}
