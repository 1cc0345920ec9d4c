//! Type definitions for task descriptors and their placement constraints.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::common::{JobId, ResourceId, Resources, TaskId};
use crate::core::labels::{LabelSelector, MatchExpression};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Created,
    Runnable,
    Assigned,
    Running,
    Completed,
    Failed,
}

/// A conjunction of expressions evaluated against a machine's labels.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<MatchExpression>,
}

/// A node-selector term with a weight, contributing its weight to the soft
/// node-affinity score of every machine it matches.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PreferredSchedulingTerm {
    pub weight: i64,
    pub preference: NodeSelectorTerm,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NodeSelector {
    #[serde(default)]
    pub node_selector_terms: Vec<NodeSelectorTerm>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct NodeAffinity {
    #[serde(default)]
    pub required_during_scheduling_ignored_during_execution: Option<NodeSelector>,
    #[serde(default)]
    pub preferred_during_scheduling_ignored_during_execution: Vec<PreferredSchedulingTerm>,
}

/// Selects pods, by label, inside a set of namespaces. An empty namespace
/// list means the namespace of the task the term belongs to.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PodAffinityTerm {
    #[serde(default)]
    pub label_selector: Option<LabelSelector>,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WeightedPodAffinityTerm {
    pub weight: i64,
    pub pod_affinity_term: PodAffinityTerm,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PodAffinity {
    #[serde(default)]
    pub required_during_scheduling_ignored_during_execution: Vec<PodAffinityTerm>,
    #[serde(default)]
    pub preferred_during_scheduling_ignored_during_execution: Vec<WeightedPodAffinityTerm>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PodAntiAffinity {
    #[serde(default)]
    pub required_during_scheduling_ignored_during_execution: Vec<PodAffinityTerm>,
    #[serde(default)]
    pub preferred_during_scheduling_ignored_during_execution: Vec<WeightedPodAffinityTerm>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Affinity {
    #[serde(default)]
    pub node_affinity: Option<NodeAffinity>,
    #[serde(default)]
    pub pod_affinity: Option<PodAffinity>,
    #[serde(default)]
    pub pod_anti_affinity: Option<PodAntiAffinity>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TaskDescriptor {
    pub uid: TaskId,
    pub name: String,
    pub job_id: JobId,
    #[serde(default)]
    pub state: TaskState,
    pub resource_request: Resources,
    #[serde(default)]
    pub namespace: String,
    /// The task's own labels, matched by other tasks' pod-affinity terms.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Every (key, value) here must appear in a machine's labels for the
    /// machine to be a placement candidate.
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
    #[serde(default)]
    pub label_selectors: Vec<LabelSelector>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub scheduled_to_resource: Option<ResourceId>,
}

impl TaskDescriptor {
    pub fn has_affinity(&self) -> bool {
        self.affinity.is_some()
    }

    pub fn required_node_selector_terms(&self) -> &[NodeSelectorTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|na| {
                na.required_during_scheduling_ignored_during_execution
                    .as_ref()
            })
            .map_or(&[], |ns| ns.node_selector_terms.as_slice())
    }

    pub fn preferred_node_affinity_terms(&self) -> &[PreferredSchedulingTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .map_or(&[], |na| {
                na.preferred_during_scheduling_ignored_during_execution
                    .as_slice()
            })
    }

    pub fn required_pod_affinity_terms(&self) -> &[PodAffinityTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.pod_affinity.as_ref())
            .map_or(&[], |pa| {
                pa.required_during_scheduling_ignored_during_execution
                    .as_slice()
            })
    }

    pub fn preferred_pod_affinity_terms(&self) -> &[WeightedPodAffinityTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.pod_affinity.as_ref())
            .map_or(&[], |pa| {
                pa.preferred_during_scheduling_ignored_during_execution
                    .as_slice()
            })
    }

    pub fn required_pod_anti_affinity_terms(&self) -> &[PodAffinityTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.pod_anti_affinity.as_ref())
            .map_or(&[], |pa| {
                pa.required_during_scheduling_ignored_during_execution
                    .as_slice()
            })
    }

    pub fn preferred_pod_anti_affinity_terms(&self) -> &[WeightedPodAffinityTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.pod_anti_affinity.as_ref())
            .map_or(&[], |pa| {
                pa.preferred_during_scheduling_ignored_during_execution
                    .as_slice()
            })
    }
}

/// Store of every task known to the scheduler, owned by the surrounding
/// system and shared read-only with the cost model.
pub type TaskMap = Rc<RefCell<HashMap<TaskId, TaskDescriptor>>>;
