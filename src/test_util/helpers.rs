//! Builders shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use uuid::Uuid;

use crate::config::CostModelConfig;
use crate::core::common::{ResourceId, Resources, TaskId};
use crate::core::knowledge_base::{KnowledgeBase, SharedKnowledgeBase};
use crate::core::labels::{LabelIndex, MatchExpression, SharedLabelIndex};
use crate::core::resource::{insert_resource, ResourceDescriptor, ResourceMap, ResourceType};
use crate::core::task::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorTerm, PreferredSchedulingTerm,
    TaskDescriptor,
};
use crate::core::task::TaskMap;
use crate::cost_model::cpu_cost_model::CpuMemCostModel;

/// A cost model wired to fresh shared stores, plus handles to those stores
/// so tests can populate them.
pub struct CostModelFixture {
    pub resource_map: ResourceMap,
    pub task_map: TaskMap,
    pub knowledge_base: SharedKnowledgeBase,
    pub label_index: SharedLabelIndex,
    pub model: CpuMemCostModel,
}

pub fn fixture_with_config(config: CostModelConfig) -> CostModelFixture {
    let resource_map: ResourceMap = Rc::new(RefCell::new(HashMap::new()));
    let task_map: TaskMap = Rc::new(RefCell::new(HashMap::new()));
    let knowledge_base: SharedKnowledgeBase = Rc::new(RefCell::new(KnowledgeBase::new()));
    let label_index: SharedLabelIndex = Rc::new(RefCell::new(LabelIndex::new()));
    let model = CpuMemCostModel::new(
        resource_map.clone(),
        task_map.clone(),
        knowledge_base.clone(),
        label_index.clone(),
        config,
    );
    CostModelFixture {
        resource_map,
        task_map,
        knowledge_base,
        label_index,
        model,
    }
}

pub fn default_fixture() -> CostModelFixture {
    fixture_with_config(CostModelConfig::default())
}

impl CostModelFixture {
    /// Puts the machine into the resource map and registers its fan-out.
    pub fn register_machine(&mut self, rd: ResourceDescriptor) -> ResourceId {
        use crate::cost_model::interface::CostModel;
        let uuid = insert_resource(&self.resource_map, rd.clone());
        self.model.add_machine(&rd);
        uuid
    }

    /// Puts the task into the task map and the label index, then registers
    /// its resource request.
    pub fn register_task(&mut self, td: TaskDescriptor) -> TaskId {
        use crate::cost_model::interface::CostModel;
        let uid = td.uid;
        self.label_index.borrow_mut().add_task(uid, &td.labels);
        self.task_map.borrow_mut().insert(uid, td);
        self.model.add_task(uid);
        uid
    }
}

pub fn make_machine(name: &str, uuid_seed: u128, capacity: Resources, max_pods: u64) -> ResourceDescriptor {
    let mut rd = ResourceDescriptor::new(
        Uuid::from_u128(uuid_seed),
        name.to_string(),
        ResourceType::Machine,
        capacity,
    );
    rd.max_pods = max_pods;
    rd
}

pub fn make_pu(name: &str, uuid_seed: u128, parent: ResourceId, cpu_capacity: u64) -> ResourceDescriptor {
    let mut rd = ResourceDescriptor::new(
        Uuid::from_u128(uuid_seed),
        name.to_string(),
        ResourceType::Pu,
        Resources::new(cpu_capacity, 0),
    );
    rd.parent = Some(parent);
    rd
}

pub fn make_task(uid: TaskId, job_id: u64, request: Resources) -> TaskDescriptor {
    TaskDescriptor {
        uid,
        name: format!("task_{}", uid),
        job_id,
        state: Default::default(),
        resource_request: request,
        namespace: "default".to_string(),
        labels: Default::default(),
        node_selector: Default::default(),
        label_selectors: Default::default(),
        affinity: None,
        scheduled_to_resource: None,
    }
}

pub fn make_expression(key: &str, operator: &str, values: &[&str]) -> MatchExpression {
    MatchExpression {
        key: key.to_string(),
        operator: operator.to_string(),
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

pub fn labels_from(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// An affinity block with a single required node-selector term.
pub fn required_node_affinity(expressions: Vec<MatchExpression>) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: expressions,
                }],
            }),
            preferred_during_scheduling_ignored_during_execution: Vec::new(),
        }),
        pod_affinity: None,
        pod_anti_affinity: None,
    }
}

/// An affinity block with weighted preferred node-selector terms.
pub fn preferred_node_affinity(terms: Vec<(i64, MatchExpression)>) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: None,
            preferred_during_scheduling_ignored_during_execution: terms
                .into_iter()
                .map(|(weight, expression)| PreferredSchedulingTerm {
                    weight,
                    preference: NodeSelectorTerm {
                        match_expressions: vec![expression],
                    },
                })
                .collect(),
        }),
        pod_affinity: None,
        pod_anti_affinity: None,
    }
}
