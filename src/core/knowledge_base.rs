//! In-memory store of machine telemetry samples.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::common::ResourceId;

/// Number of samples retained per machine.
const MAX_SAMPLES_PER_MACHINE: usize = 100;

/// Telemetry for a single processing unit.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CpuStats {
    /// Capacity of the PU in millicores.
    pub cpu_capacity: u64,
    /// Fraction of the capacity currently in use, in [0, 1].
    pub cpu_utilization: f64,
}

/// One telemetry sample for a machine, covering all of its PUs and memory.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ResourceStats {
    pub cpus_stats: Vec<CpuStats>,
    /// Memory capacity in bytes.
    pub mem_capacity: u64,
    /// Fraction of memory currently in use, in [0, 1].
    pub mem_utilization: f64,
}

/// Holds the recent telemetry history for every machine. Reads are
/// synchronous and never block; a machine without samples simply yields
/// nothing, which stat gathering treats as "no new information".
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    machine_samples: HashMap<ResourceId, VecDeque<ResourceStats>>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_machine_sample(&mut self, machine_id: ResourceId, stats: ResourceStats) {
        let samples = self.machine_samples.entry(machine_id).or_default();
        if samples.len() == MAX_SAMPLES_PER_MACHINE {
            samples.pop_front();
        }
        samples.push_back(stats);
    }

    pub fn get_latest_stats_for_machine(&self, machine_id: ResourceId) -> Option<ResourceStats> {
        self.machine_samples
            .get(&machine_id)
            .and_then(|samples| samples.back())
            .cloned()
    }

    pub fn drop_machine(&mut self, machine_id: ResourceId) {
        self.machine_samples.remove(&machine_id);
    }
}

pub type SharedKnowledgeBase = Rc<RefCell<KnowledgeBase>>;

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{CpuStats, KnowledgeBase, ResourceStats, MAX_SAMPLES_PER_MACHINE};

    #[test]
    fn test_latest_sample_wins() {
        let mut kb = KnowledgeBase::new();
        let machine = Uuid::from_u128(7);
        assert_eq!(kb.get_latest_stats_for_machine(machine), None);

        kb.add_machine_sample(
            machine,
            ResourceStats {
                mem_utilization: 0.1,
                ..Default::default()
            },
        );
        kb.add_machine_sample(
            machine,
            ResourceStats {
                mem_utilization: 0.9,
                ..Default::default()
            },
        );
        let latest = kb.get_latest_stats_for_machine(machine).unwrap();
        assert_eq!(latest.mem_utilization, 0.9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut kb = KnowledgeBase::new();
        let machine = Uuid::from_u128(8);
        for i in 0..(MAX_SAMPLES_PER_MACHINE + 10) {
            kb.add_machine_sample(
                machine,
                ResourceStats {
                    cpus_stats: vec![CpuStats {
                        cpu_capacity: i as u64,
                        cpu_utilization: 0.0,
                    }],
                    ..Default::default()
                },
            );
        }
        let latest = kb.get_latest_stats_for_machine(machine).unwrap();
        assert_eq!(
            latest.cpus_stats[0].cpu_capacity,
            (MAX_SAMPLES_PER_MACHINE + 9) as u64
        );
        assert_eq!(
            kb.machine_samples.get(&machine).unwrap().len(),
            MAX_SAMPLES_PER_MACHINE
        );
    }
}
