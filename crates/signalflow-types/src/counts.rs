//! Per-class vehicle counts.
//!
//! [`ClassCounts`] is used for backlogs, arrivals, and departures alike.
//! Counts are unsigned, so a backlog can never go negative; every
//! mutation goes through saturating or checked arithmetic.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::VehicleClass;

/// A count of vehicles for each [`VehicleClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ClassCounts {
    /// Passenger cars.
    pub car: u64,
    /// Buses.
    pub bus: u64,
    /// Trucks.
    pub truck: u64,
}

impl ClassCounts {
    /// All counts zero.
    pub const ZERO: Self = Self {
        car: 0,
        bus: 0,
        truck: 0,
    };

    /// Build counts from explicit per-class values.
    pub const fn new(car: u64, bus: u64, truck: u64) -> Self {
        Self { car, bus, truck }
    }

    /// Count for a single class.
    pub const fn get(&self, class: VehicleClass) -> u64 {
        match class {
            VehicleClass::Car => self.car,
            VehicleClass::Bus => self.bus,
            VehicleClass::Truck => self.truck,
        }
    }

    /// Mutable access to a single class count.
    pub const fn get_mut(&mut self, class: VehicleClass) -> &mut u64 {
        match class {
            VehicleClass::Car => &mut self.car,
            VehicleClass::Bus => &mut self.bus,
            VehicleClass::Truck => &mut self.truck,
        }
    }

    /// Sum over all classes, saturating at `u64::MAX`.
    pub const fn total(&self) -> u64 {
        self.car.saturating_add(self.bus).saturating_add(self.truck)
    }

    /// Whether every class count is zero.
    pub const fn is_empty(&self) -> bool {
        self.car == 0 && self.bus == 0 && self.truck == 0
    }

    /// Class-wise saturating addition.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self {
            car: self.car.saturating_add(other.car),
            bus: self.bus.saturating_add(other.bus),
            truck: self.truck.saturating_add(other.truck),
        }
    }

    /// Class-wise subtraction clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self {
            car: self.car.saturating_sub(other.car),
            bus: self.bus.saturating_sub(other.bus),
            truck: self.truck.saturating_sub(other.truck),
        }
    }

    /// Iterate `(class, count)` pairs in [`VehicleClass::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (VehicleClass, u64)> + '_ {
        VehicleClass::ALL.into_iter().map(|class| (class, self.get(class)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_classes() {
        let counts = ClassCounts::new(3, 2, 1);
        assert_eq!(counts.total(), 6);
        assert!(!counts.is_empty());
        assert!(ClassCounts::ZERO.is_empty());
    }

    #[test]
    fn get_mut_targets_one_class() {
        let mut counts = ClassCounts::ZERO;
        *counts.get_mut(VehicleClass::Bus) = 4;
        assert_eq!(counts, ClassCounts::new(0, 4, 0));
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let left = ClassCounts::new(1, 5, 0);
        let right = ClassCounts::new(3, 2, 7);
        assert_eq!(left.saturating_sub(right), ClassCounts::new(0, 3, 0));
    }

    #[test]
    fn iter_follows_class_order() {
        let counts = ClassCounts::new(7, 8, 9);
        let pairs: Vec<_> = counts.iter().collect();
        assert_eq!(
            pairs,
            vec![
                (VehicleClass::Car, 7),
                (VehicleClass::Bus, 8),
                (VehicleClass::Truck, 9)
            ]
        );
    }
}
