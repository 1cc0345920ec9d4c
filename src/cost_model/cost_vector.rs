//! The multi-dimensional arc cost bundle and its flattening.

use serde::{Deserialize, Serialize};

/// Number of cost dimensions; bounds the flattened cost at
/// `omega * COST_DIMENSIONS`.
pub const COST_DIMENSIONS: i64 = 4;

/// Per-arc cost bundle. `cpu_mem` and `balanced_res` are usage costs
/// saturated at omega by their producers; the two soft dimensions are
/// penalties (`omega - normalized_score`), so a higher preference yields a
/// lower cost. All dimensions are non-negative.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CostVector {
    pub cpu_mem: i64,
    pub balanced_res: i64,
    pub node_affinity_soft: i64,
    pub pod_affinity_soft: i64,
}

impl CostVector {
    pub fn flatten(&self) -> i64 {
        self.cpu_mem + self.balanced_res + self.node_affinity_soft + self.pod_affinity_soft
    }
}

/// Flattens cost vectors while maintaining the model's running upper cost
/// bound, which the solver uses for unreachable arcs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CostFlattener {
    omega: i64,
    infinity: i64,
}

impl CostFlattener {
    pub fn new(omega: i64) -> Self {
        Self {
            omega,
            infinity: omega * COST_DIMENSIONS + 1,
        }
    }

    pub fn flatten(&mut self, cost_vector: &CostVector) -> i64 {
        let cost = cost_vector.flatten();
        self.infinity = self.infinity.max(cost + 1);
        cost
    }

    /// Strict upper bound on every cost flattened so far.
    pub fn infinity(&self) -> i64 {
        self.infinity
    }

    pub fn omega(&self) -> i64 {
        self.omega
    }
}
