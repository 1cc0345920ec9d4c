//! Identifiers and resource vectors shared by every component.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a task known to the task store.
pub type TaskId = u64;

/// Identifier of the job a task belongs to.
pub type JobId = u64;

/// Identifier of a node in the resource topology. 128-bit UUID with order
/// and equality, assigned by the surrounding system.
pub type ResourceId = Uuid;

/// Identifier of an equivalence-class aggregator in the flow graph. A 64-bit
/// hash; collision probability is treated as negligible and indices are keyed
/// by this id directly.
pub type EquivClassId = u64;

/// A cpu/memory request or capacity. Cpu is in millicores, ram in bytes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Resources {
    pub cpu: u64,
    pub ram: u64,
}

impl Resources {
    pub fn new(cpu: u64, ram: u64) -> Self {
        Self { cpu, ram }
    }

    /// True when both dimensions of `self` fit within `other`.
    pub fn fits_within(&self, other: &Resources) -> bool {
        self.cpu <= other.cpu && self.ram <= other.ram
    }

    /// Both dimensions multiplied by `factor`, saturating at the type bound.
    pub fn scaled(&self, factor: u64) -> Resources {
        Resources {
            cpu: self.cpu.saturating_mul(factor),
            ram: self.ram.saturating_mul(factor),
        }
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, other: Resources) -> Resources {
        Resources {
            cpu: self.cpu + other.cpu,
            ram: self.ram + other.ram,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Resources) {
        self.cpu += other.cpu;
        self.ram += other.ram;
    }
}

/// Hash of an arbitrary hashable value with the process-stable default
/// hasher. Equivalence-class identity is derived from these hashes, so two
/// equal inputs must always produce the same id within a scheduler instance.
pub fn hash_value<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Folds `hash` into `seed`, order-sensitively.
pub fn hash_combine(seed: u64, hash: u64) -> u64 {
    seed ^ (hash
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

#[cfg(test)]
mod tests {
    use super::{hash_combine, hash_value, Resources};

    #[test]
    fn test_fits_within_per_dimension() {
        let request = Resources::new(1000, 2048);
        assert!(request.fits_within(&Resources::new(1000, 2048)));
        assert!(!request.fits_within(&Resources::new(999, 4096)));
        assert!(!request.fits_within(&Resources::new(2000, 2047)));
    }

    #[test]
    fn test_scaled_saturates() {
        let request = Resources::new(u64::MAX / 2, 1);
        assert_eq!(request.scaled(3).cpu, u64::MAX);
        assert_eq!(request.scaled(3).ram, 3);
    }

    #[test]
    fn test_hashing_is_stable_and_order_sensitive() {
        assert_eq!(hash_value("1000cpumem2048"), hash_value("1000cpumem2048"));
        let a = hash_combine(hash_value("m1"), 0);
        let b = hash_combine(hash_value("m1"), 1);
        assert_ne!(a, b);
        assert_ne!(hash_combine(a, 1), hash_combine(b, 0));
    }
}
