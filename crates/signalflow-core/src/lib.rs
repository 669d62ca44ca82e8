//! Lane queue model, phase scheduler, and tick driver for Signalflow.
//!
//! The heart of the crate is [`scheduler::IntersectionScheduler`], a
//! synchronous, deterministic state machine that turns time-stamped
//! arrivals into light changes and queue departures one tick at a time.
//! Around it sit the pieces a headless run needs.
//!
//! # Modules
//!
//! - [`accounting`] -- Vehicle conservation and signal safety checks on
//!   emitted snapshots.
//! - [`arrivals`] -- [`ArrivalSource`] trait, an in-memory schedule, and a
//!   seeded synthetic generator.
//! - [`clock`] -- Fixed-step simulated clock.
//! - [`config`] -- Configuration loading from `signalflow-config.yaml` into
//!   strongly-typed structs.
//! - [`lane`] -- Per-approach backlog, ingestion, and proportional drain.
//! - [`operator`] -- Pause, resume, stop, and tick speed controls.
//! - [`phase`] -- Phase pairs and the validated phase cycle.
//! - [`report`] -- End-of-run per-lane totals.
//! - [`runner`] -- Async tick loop and the [`SnapshotSink`] trait.
//! - [`scheduler`] -- The adaptive phase state machine.
//!
//! [`ArrivalSource`]: arrivals::ArrivalSource
//! [`SnapshotSink`]: runner::SnapshotSink

pub mod accounting;
pub mod arrivals;
pub mod clock;
pub mod config;
pub mod lane;
pub mod operator;
pub mod phase;
pub mod report;
pub mod runner;
pub mod scheduler;
