//! A fixed-cost model with no placement semantics, useful as a baseline
//! deployment variant and as a harness for exercising the flow graph.

use crate::config::CostModelConfig;
use crate::core::common::{hash_value, EquivClassId, JobId, ResourceId, TaskId};
use crate::core::knowledge_base::SharedKnowledgeBase;
use crate::core::labels::SharedLabelIndex;
use crate::core::resource::{ResourceDescriptor, ResourceMap, ResourceType};
use crate::core::task::TaskMap;
use crate::cost_model::interface::{ArcDescriptor, CostModel, FlowGraphNode};

/// Leaving a task unscheduled still has to be the worst option.
const TASK_TO_UNSCHEDULED_AGG_COST: i64 = 5000;

pub struct TrivialCostModel {
    config: CostModelConfig,
}

impl TrivialCostModel {
    pub fn new(config: CostModelConfig) -> Self {
        Self { config }
    }

    /// Registry factory. The trivial model prices nothing, so it keeps none
    /// of the shared stores.
    pub fn create(
        _resource_map: ResourceMap,
        _task_map: TaskMap,
        _knowledge_base: SharedKnowledgeBase,
        _label_index: SharedLabelIndex,
        config: CostModelConfig,
    ) -> Box<dyn CostModel> {
        Box::new(Self::new(config))
    }
}

impl CostModel for TrivialCostModel {
    fn task_to_unscheduled_agg(&mut self, _task_id: TaskId) -> ArcDescriptor {
        ArcDescriptor::new(TASK_TO_UNSCHEDULED_AGG_COST, 1, 0)
    }

    fn unscheduled_agg_to_sink(&mut self, _job_id: JobId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    fn task_to_resource_node(
        &mut self,
        _task_id: TaskId,
        _resource_id: ResourceId,
    ) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    fn resource_node_to_resource_node(
        &mut self,
        _source: &ResourceDescriptor,
        destination: &ResourceDescriptor,
    ) -> ArcDescriptor {
        let capacity = if destination.resource_type == ResourceType::Pu {
            self.config.max_tasks_per_pu
        } else {
            destination.num_slots_below
        };
        ArcDescriptor::new(0, capacity, 0)
    }

    fn leaf_resource_node_to_sink(&mut self, _resource_id: ResourceId) -> ArcDescriptor {
        ArcDescriptor::new(0, self.config.max_tasks_per_pu, 0)
    }

    fn task_continuation(&mut self, _task_id: TaskId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    fn task_preemption(&mut self, _task_id: TaskId) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    fn task_to_equiv_class_aggregator(
        &mut self,
        _task_id: TaskId,
        _ec: EquivClassId,
    ) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    fn equiv_class_to_resource_node(
        &mut self,
        _ec: EquivClassId,
        _resource_id: ResourceId,
    ) -> ArcDescriptor {
        ArcDescriptor::new(0, 1, 0)
    }

    fn equiv_class_to_equiv_class(
        &mut self,
        _ec1: EquivClassId,
        _ec2: EquivClassId,
    ) -> ArcDescriptor {
        // No machine fan-out, so no class-to-class arcs exist.
        ArcDescriptor::new(0, 0, 0)
    }

    fn get_task_equiv_classes(&mut self, task_id: TaskId) -> Vec<EquivClassId> {
        vec![hash_value(&task_id)]
    }

    fn get_outgoing_equiv_class_pref_arcs(&mut self, _ec: EquivClassId) -> Vec<ResourceId> {
        Vec::new()
    }

    fn get_task_preference_arcs(&mut self, _task_id: TaskId) -> Vec<ResourceId> {
        Vec::new()
    }

    fn get_equiv_class_to_equiv_classes_arcs(&mut self, _ec: EquivClassId) -> Vec<EquivClassId> {
        Vec::new()
    }

    fn add_machine(&mut self, _rtnd: &ResourceDescriptor) {}

    fn add_task(&mut self, _task_id: TaskId) {}

    fn remove_machine(&mut self, _resource_id: ResourceId) {}

    fn remove_task(&mut self, _task_id: TaskId) {}

    fn prepare_stats(&mut self, _node: &FlowGraphNode) {}

    fn gather_stats(&mut self, _accumulator: &FlowGraphNode, _other: &FlowGraphNode) {}

    fn update_stats(&mut self, _accumulator: &FlowGraphNode, _other: &FlowGraphNode) {}
}
