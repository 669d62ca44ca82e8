//! Snapshot sinks used by the engine.
//!
//! [`EngineSinks`] fans each snapshot out to a structured log line, an
//! optional JSON Lines file, and the [`RunReport`] that is written when
//! the run ends.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use signalflow_core::report::RunReport;
use signalflow_core::runner::SnapshotSink;
use signalflow_types::IntersectionSnapshot;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Logs a one-line summary every `every` ticks, and lane detail at debug.
pub struct TracingSink {
    every: u64,
}

impl TracingSink {
    /// Log every `every` ticks (0 = never).
    pub const fn new(every: u64) -> Self {
        Self { every }
    }
}

impl SnapshotSink for TracingSink {
    fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
        let due = snapshot
            .tick
            .checked_rem(self.every)
            .is_some_and(|rem| rem == 0);
        if !due {
            return;
        }

        info!(
            tick = snapshot.tick,
            time = snapshot.time_seconds,
            phase = snapshot.active_phase,
            transition = ?snapshot.transition,
            green_seconds = snapshot.current_green_seconds,
            total_backlog = snapshot.total_backlog(),
            "Tick"
        );
        for lane in &snapshot.lanes {
            debug!(
                tick = snapshot.tick,
                lane = %lane.lane,
                state = ?lane.signal_state,
                in_state = lane.state_elapsed_seconds,
                until_change = lane.seconds_until_next_change,
                backlog = lane.backlog_total,
                arrived = lane.arrivals_this_tick,
                departed = lane.departures_this_tick,
                data_gap = lane.data_gap,
                "Lane"
            );
        }
    }
}

/// Writes each snapshot as one JSON object per line.
///
/// Write failures are logged once and disable the sink; the run goes on.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path) -> Result<Self, EngineError> {
        let file = File::create(path).map_err(|source| EngineError::Output {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "Writing snapshots as JSON Lines");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    fn disable(&mut self, error: &dyn std::fmt::Display) {
        warn!(
            path = %self.path.display(),
            error = %error,
            "Snapshot file write failed, no further snapshots will be written"
        );
        self.writer = None;
    }
}

impl SnapshotSink for JsonLinesSink {
    fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = serde_json::to_writer(&mut *writer, snapshot)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(err) = result {
            self.disable(&err);
        }
    }

    fn finish(&mut self) {
        let flushed = self.writer.as_mut().map_or(Ok(()), Write::flush);
        if let Err(err) = flushed {
            self.disable(&err);
        }
    }
}

/// Every sink the engine feeds, in one [`SnapshotSink`].
pub struct EngineSinks {
    /// Structured log output.
    pub tracing: TracingSink,
    /// Optional snapshot file.
    pub jsonl: Option<JsonLinesSink>,
    /// End-of-run totals.
    pub report: RunReport,
}

impl SnapshotSink for EngineSinks {
    fn on_snapshot(&mut self, snapshot: &IntersectionSnapshot) {
        self.tracing.on_snapshot(snapshot);
        if let Some(jsonl) = self.jsonl.as_mut() {
            jsonl.on_snapshot(snapshot);
        }
        self.report.on_snapshot(snapshot);
    }

    fn finish(&mut self) {
        self.tracing.finish();
        if let Some(jsonl) = self.jsonl.as_mut() {
            jsonl.finish();
        }
        self.report.finish();
    }
}
