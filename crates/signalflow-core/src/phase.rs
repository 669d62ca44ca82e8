//! Phases: pairs of approaches that are green together.
//!
//! The plan is fixed for a run and cycles in order. A valid plan has at
//! least two phases and names every approach exactly once, so each lane
//! belongs to exactly one phase and conflicting movements can never be
//! green together.

use std::collections::BTreeSet;

use signalflow_types::Approach;

use crate::config::ConfigError;

/// An ordered pair of approaches that share a green interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    lanes: [Approach; 2],
}

impl Phase {
    /// Build a phase from two distinct approaches.
    pub fn new(first: Approach, second: Approach) -> Result<Self, ConfigError> {
        if first == second {
            return Err(ConfigError::Invalid {
                reason: format!("phase lists approach {first} twice"),
            });
        }
        Ok(Self {
            lanes: [first, second],
        })
    }

    /// The two approaches of this phase.
    pub const fn lanes(&self) -> [Approach; 2] {
        self.lanes
    }

    /// Whether `approach` is green when this phase is active.
    pub fn contains(&self, approach: Approach) -> bool {
        self.lanes.contains(&approach)
    }
}

/// The cyclic list of phases for one intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlan {
    phases: Vec<Phase>,
}

impl PhasePlan {
    /// Validate and build a plan.
    pub fn new(phases: Vec<Phase>) -> Result<Self, ConfigError> {
        if phases.len() < 2 {
            return Err(ConfigError::Invalid {
                reason: format!("at least two phases are required, got {}", phases.len()),
            });
        }

        let mut seen = BTreeSet::new();
        for approach in phases.iter().flat_map(|phase| phase.lanes) {
            if !seen.insert(approach) {
                return Err(ConfigError::Invalid {
                    reason: format!("approach {approach} appears in more than one phase"),
                });
            }
        }
        if let Some(missing) = Approach::ALL.iter().find(|a| !seen.contains(*a)) {
            return Err(ConfigError::Invalid {
                reason: format!("approach {missing} is not served by any phase"),
            });
        }

        Ok(Self { phases })
    }

    /// North-south then east-west.
    pub fn two_phase() -> Self {
        Self {
            phases: vec![
                Phase {
                    lanes: [Approach::North, Approach::South],
                },
                Phase {
                    lanes: [Approach::East, Approach::West],
                },
            ],
        }
    }

    /// Number of phases in the cycle.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// A valid plan is never empty; provided for API completeness.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Phase at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }

    /// Index of the phase that follows `index` in the cycle.
    pub fn next_index(&self, index: usize) -> usize {
        index
            .checked_add(1)
            .and_then(|next| next.checked_rem(self.phases.len()))
            .unwrap_or(0)
    }

    /// Index of the phase that serves `approach`.
    pub fn phase_of(&self, approach: Approach) -> Option<usize> {
        self.phases.iter().position(|phase| phase.contains(approach))
    }

    /// Iterate phases in cycle order.
    pub fn iter(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter()
    }
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self::two_phase()
    }
}
