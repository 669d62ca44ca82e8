//! Shared type definitions for the Signalflow intersection scheduler.
//!
//! Everything a snapshot consumer needs lives here so that renderers,
//! log writers, and hardware bridges can depend on this crate without
//! pulling in the scheduler. Types flow downstream to `TypeScript` via
//! `ts-rs` for dashboard consumers.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for run identifiers
//! - [`enums`] -- Vehicle classes, approaches, signal and transition states
//! - [`counts`] -- Per-class vehicle counts
//! - [`snapshot`] -- Per-tick lane and intersection records

pub mod counts;
pub mod enums;
pub mod ids;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use counts::ClassCounts;
pub use enums::{Approach, SignalState, TransitionSubstate, VehicleClass};
pub use ids::RunId;
pub use snapshot::{ClampNotice, IntersectionSnapshot, LaneSnapshot, PhaseEvent};
