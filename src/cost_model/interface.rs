//! The cost model interface consumed by the flow-graph manager.
//!
//! A cost model answers one question: for a pair of flow-graph node roles,
//! what are the cost, capacity and minimum flow of the arc between them? The
//! flow-graph manager drives a model through this trait once per scheduling
//! round: a stat traversal over the resource topology first, then the arc
//! sweep. Models are selected per deployment by name from the registry.

use std::collections::HashMap;

use downcast_rs::{impl_downcast, Downcast};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::config::CostModelConfig;
use crate::core::common::{EquivClassId, JobId, ResourceId, TaskId};
use crate::core::knowledge_base::SharedKnowledgeBase;
use crate::core::labels::SharedLabelIndex;
use crate::core::resource::{ResourceDescriptor, ResourceMap};
use crate::core::task::TaskMap;
use crate::cost_model::cpu_cost_model::CpuMemCostModel;
use crate::cost_model::trivial_cost_model::TrivialCostModel;

/// Cost, capacity and minimum flow of a single arc in the flow graph.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ArcDescriptor {
    pub cost: i64,
    pub capacity: u64,
    pub min_flow: u64,
}

impl ArcDescriptor {
    pub fn new(cost: i64, capacity: u64, min_flow: u64) -> Self {
        Self {
            cost,
            capacity,
            min_flow,
        }
    }
}

/// Role of a flow-graph node as seen by the stat callbacks.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum FlowNodeType {
    ResourceNode,
    Sink,
    TaskNode,
    EquivClassNode,
    UnscheduledAgg,
}

/// A flow-graph node handed to the cost model by the flow-graph manager.
/// Resource nodes carry the id of their descriptor in the resource map.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FlowGraphNode {
    pub node_type: FlowNodeType,
    pub resource_id: Option<ResourceId>,
}

impl FlowGraphNode {
    pub fn resource(resource_id: ResourceId) -> Self {
        Self {
            node_type: FlowNodeType::ResourceNode,
            resource_id: Some(resource_id),
        }
    }

    pub fn sink() -> Self {
        Self {
            node_type: FlowNodeType::Sink,
            resource_id: None,
        }
    }

    pub fn task() -> Self {
        Self {
            node_type: FlowNodeType::TaskNode,
            resource_id: None,
        }
    }

    pub fn equiv_class() -> Self {
        Self {
            node_type: FlowNodeType::EquivClassNode,
            resource_id: None,
        }
    }

    pub fn is_resource(&self) -> bool {
        self.node_type == FlowNodeType::ResourceNode
    }
}

/// Trait which should implement any cost model selectable by the flow-graph
/// manager. Methods take `&mut self`: a model is driven by a single thread
/// and keeps round-local caches behind these calls.
pub trait CostModel: Downcast {
    /// Arc from a task to its job's unscheduled aggregator; its cost is the
    /// price of leaving the task unscheduled and must exceed every feasible
    /// placement cost.
    fn task_to_unscheduled_agg(&mut self, task_id: TaskId) -> ArcDescriptor;

    fn unscheduled_agg_to_sink(&mut self, job_id: JobId) -> ArcDescriptor;

    /// Direct task-to-resource preference arc.
    fn task_to_resource_node(&mut self, task_id: TaskId, resource_id: ResourceId) -> ArcDescriptor;

    /// Structural arc between two nodes of the resource topology.
    fn resource_node_to_resource_node(
        &mut self,
        source: &ResourceDescriptor,
        destination: &ResourceDescriptor,
    ) -> ArcDescriptor;

    /// Arc from a leaf (PU) resource node to the sink; its capacity bounds
    /// placements per machine.
    fn leaf_resource_node_to_sink(&mut self, resource_id: ResourceId) -> ArcDescriptor;

    /// Reserved for preemption support.
    fn task_continuation(&mut self, task_id: TaskId) -> ArcDescriptor;

    /// Reserved for preemption support.
    fn task_preemption(&mut self, task_id: TaskId) -> ArcDescriptor;

    fn task_to_equiv_class_aggregator(
        &mut self,
        task_id: TaskId,
        ec: EquivClassId,
    ) -> ArcDescriptor;

    fn equiv_class_to_resource_node(
        &mut self,
        ec: EquivClassId,
        resource_id: ResourceId,
    ) -> ArcDescriptor;

    /// Arc from a task-side equivalence class to a machine placement slot.
    fn equiv_class_to_equiv_class(
        &mut self,
        ec1: EquivClassId,
        ec2: EquivClassId,
    ) -> ArcDescriptor;

    /// The equivalence classes aggregating this task.
    fn get_task_equiv_classes(&mut self, task_id: TaskId) -> Vec<EquivClassId>;

    /// Resource nodes an equivalence class prefers to connect to directly.
    fn get_outgoing_equiv_class_pref_arcs(&mut self, ec: EquivClassId) -> Vec<ResourceId>;

    /// Resource nodes a task prefers to connect to directly.
    fn get_task_preference_arcs(&mut self, task_id: TaskId) -> Vec<ResourceId>;

    /// Candidate machine-slot equivalence classes for a task-side class.
    fn get_equiv_class_to_equiv_classes_arcs(&mut self, ec: EquivClassId) -> Vec<EquivClassId>;

    fn add_machine(&mut self, rtnd: &ResourceDescriptor);
    fn add_task(&mut self, task_id: TaskId);
    fn remove_machine(&mut self, resource_id: ResourceId);
    fn remove_task(&mut self, task_id: TaskId);

    /// Pre-order reset of a resource node's accumulators. The first call of
    /// a scheduling round also resets the model's round-local caches.
    fn prepare_stats(&mut self, node: &FlowGraphNode);

    /// Post-order roll-up of one parent-child pair.
    fn gather_stats(&mut self, accumulator: &FlowGraphNode, other: &FlowGraphNode);

    /// Reserved for top-down propagation after gathering.
    fn update_stats(&mut self, accumulator: &FlowGraphNode, other: &FlowGraphNode);
}
impl_downcast!(CostModel);

/// Constructor signature every registered cost model provides.
pub type CostModelFactory = fn(
    ResourceMap,
    TaskMap,
    SharedKnowledgeBase,
    SharedLabelIndex,
    CostModelConfig,
) -> Box<dyn CostModel>;

lazy_static! {
    /// Cost models selectable per deployment, keyed by name.
    pub static ref COST_MODEL_REGISTRY: HashMap<&'static str, CostModelFactory> = {
        HashMap::from([
            ("CpuMem", CpuMemCostModel::create as CostModelFactory),
            ("Trivial", TrivialCostModel::create as CostModelFactory),
        ])
    };
}
