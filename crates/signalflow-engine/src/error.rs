//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: signalflow_core::config::ConfigError,
    },

    /// Simulated clock initialization failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: signalflow_core::clock::ClockError,
    },

    /// Simulation runner failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: signalflow_core::runner::RunnerError,
    },

    /// An output file could not be created or written.
    #[error("output error for {path}: {source}")]
    Output {
        /// File concerned.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The run report could not be serialized.
    #[error("report serialization error: {source}")]
    Report {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
