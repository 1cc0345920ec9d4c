//! Type definitions for nodes of the machine resource topology.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::common::{ResourceId, Resources, TaskId};

/// Kind of a node in the resource topology tree.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ResourceType {
    Coordinator,
    Machine,
    Numa,
    Socket,
    Core,
    Pu,
    #[default]
    Other,
}

/// A node in the machine topology. Parents are referenced by id, never by
/// pointer; the resource map is the single owner of descriptors.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResourceDescriptor {
    pub uuid: ResourceId,
    pub friendly_name: String,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Total resources of the subtree rooted here.
    pub capacity: Resources,
    /// Resources currently available; recomputed by the stat traversal each
    /// scheduling round.
    #[serde(default)]
    pub available: Resources,
    /// Upper bound on concurrent placements, meaningful on machines. Used
    /// both as the equivalence-class fan-out and as leaf-to-sink capacity.
    #[serde(default)]
    pub max_pods: u64,
    #[serde(default)]
    pub num_running_tasks_below: u64,
    #[serde(default)]
    pub num_slots_below: u64,
    #[serde(default)]
    pub current_running_tasks: Vec<TaskId>,
    #[serde(default)]
    pub parent: Option<ResourceId>,
}

impl ResourceDescriptor {
    pub fn new(
        uuid: ResourceId,
        friendly_name: String,
        resource_type: ResourceType,
        capacity: Resources,
    ) -> Self {
        Self {
            uuid,
            friendly_name,
            resource_type,
            labels: Default::default(),
            capacity,
            available: capacity,
            max_pods: 0,
            num_running_tasks_below: 0,
            num_slots_below: 0,
            current_running_tasks: Default::default(),
            parent: None,
        }
    }
}

/// Store of every descriptor in the topology, shared between the surrounding
/// system and the cost model. Entries are individually shared so that a stat
/// traversal can mutate an accumulator while reading its child.
pub type ResourceMap = Rc<RefCell<HashMap<ResourceId, Rc<RefCell<ResourceDescriptor>>>>>;

/// Inserts a descriptor into a resource map, handing back its id.
pub fn insert_resource(resource_map: &ResourceMap, rd: ResourceDescriptor) -> ResourceId {
    let uuid = rd.uuid;
    resource_map
        .borrow_mut()
        .insert(uuid, Rc::new(RefCell::new(rd)));
    uuid
}
