//! Enumeration types for the Signalflow intersection scheduler.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Vehicle classes
// ---------------------------------------------------------------------------

/// A class of vehicle waiting at an approach.
///
/// Classes only matter for arrival and queue accounting; they carry no
/// passing priority. The declaration order is also the order in which
/// rounding remainders are handed out during a green drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum VehicleClass {
    /// Passenger car.
    Car,
    /// Bus.
    Bus,
    /// Truck.
    Truck,
}

impl VehicleClass {
    /// Every class, in remainder-distribution order.
    pub const ALL: [Self; 3] = [Self::Car, Self::Bus, Self::Truck];

    /// Lowercase name used in logs and config keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Bus => "bus",
            Self::Truck => "truck",
        }
    }
}

impl core::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Approaches
// ---------------------------------------------------------------------------

/// One of the four compass approaches of the intersection.
///
/// Each approach owns exactly one lane queue for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Approach {
    /// Northbound approach.
    North,
    /// Southbound approach.
    South,
    /// Eastbound approach.
    East,
    /// Westbound approach.
    West,
}

impl Approach {
    /// All four approaches in canonical order.
    pub const ALL: [Self; 4] = [Self::North, Self::South, Self::East, Self::West];

    /// Lowercase name used in logs and config keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::North => "north",
            Self::South => "south",
            Self::East => "east",
            Self::West => "west",
        }
    }

    /// Stable small integer for seeding per-approach generators.
    pub const fn ordinal(self) -> u64 {
        match self {
            Self::North => 0,
            Self::South => 1,
            Self::East => 2,
            Self::West => 3,
        }
    }
}

impl core::fmt::Display for Approach {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signal state
// ---------------------------------------------------------------------------

/// The light currently shown to an approach.
///
/// How a state is drawn (colours, blinking) belongs to whoever renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum SignalState {
    /// Vehicles may proceed; the queue drains.
    Green,
    /// Clearance interval before red.
    Yellow,
    /// Stop.
    Red,
}

/// Where the scheduler is inside an inter-phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum TransitionSubstate {
    /// No transition: the active phase is green.
    #[default]
    None,
    /// The outgoing phase is showing yellow.
    InYellow,
    /// Every approach is red before the next phase turns green.
    InAllRed,
}

impl TransitionSubstate {
    /// Whether a yellow or all-red interval is in progress.
    pub const fn in_transition(self) -> bool {
        !matches!(self, Self::None)
    }
}
