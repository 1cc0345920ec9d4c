//! Label selector evaluation and the hard placement-constraint filter.
//!
//! Two evaluation paths exist. Machine-side constraints (node selectors,
//! node-affinity terms) are checked directly against a machine's label map.
//! Pod-side constraints (pod affinity and anti-affinity) are answered from
//! the externally maintained label index: every operator reduces to set
//! algebra between the index and the set of tasks running on the machine.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::common::TaskId;
use crate::core::resource::ResourceDescriptor;
use crate::core::task::{NodeSelectorTerm, PodAffinityTerm, TaskDescriptor};

/// Operator of a label match expression. Parsed from the wire string at
/// evaluation time; any other string is a fatal error, since it indicates a
/// task descriptor the surrounding system should never have accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl SelectorOperator {
    pub fn parse(operator: &str) -> Self {
        match operator {
            "In" => SelectorOperator::In,
            "NotIn" => SelectorOperator::NotIn,
            "Exists" => SelectorOperator::Exists,
            "DoesNotExist" => SelectorOperator::DoesNotExist,
            other => panic!("unknown label selector operator: {:?}", other),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct MatchExpression {
    pub key: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A label query: equality requirements plus match expressions. Kept on a
/// BTreeMap so that selector hashing is deterministic.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<MatchExpression>,
}

/// True when `labels` satisfies a single match expression.
pub fn expression_matches_labels(
    labels: &HashMap<String, String>,
    expression: &MatchExpression,
) -> bool {
    match SelectorOperator::parse(&expression.operator) {
        SelectorOperator::In => labels
            .get(&expression.key)
            .map_or(false, |v| expression.values.contains(v)),
        // A missing key matches NotIn, per label selector semantics.
        SelectorOperator::NotIn => labels
            .get(&expression.key)
            .map_or(true, |v| !expression.values.contains(v)),
        SelectorOperator::Exists => labels.contains_key(&expression.key),
        SelectorOperator::DoesNotExist => !labels.contains_key(&expression.key),
    }
}

/// True when `labels` satisfies every requirement of the selector.
pub fn selector_matches_labels(labels: &HashMap<String, String>, selector: &LabelSelector) -> bool {
    selector
        .match_labels
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
        && selector
            .match_expressions
            .iter()
            .all(|expression| expression_matches_labels(labels, expression))
}

/// True when the machine's labels satisfy every expression of the term.
pub fn node_matches_selector_term(rd: &ResourceDescriptor, term: &NodeSelectorTerm) -> bool {
    term.match_expressions
        .iter()
        .all(|expression| expression_matches_labels(&rd.labels, expression))
}

/// Index from task labels to task ids, maintained by the label store of the
/// surrounding system. The cost model reads it to answer pod (anti-)affinity
/// queries without scanning every running task's label map.
#[derive(Debug, Default)]
pub struct LabelIndex {
    by_label: HashMap<(String, String), HashSet<TaskId>>,
    by_key: HashMap<String, HashSet<TaskId>>,
}

impl LabelIndex {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_task(&mut self, task_id: TaskId, labels: &HashMap<String, String>) {
        for (key, value) in labels {
            self.by_label
                .entry((key.clone(), value.clone()))
                .or_default()
                .insert(task_id);
            self.by_key.entry(key.clone()).or_default().insert(task_id);
        }
    }

    pub fn remove_task(&mut self, task_id: TaskId, labels: &HashMap<String, String>) {
        for (key, value) in labels {
            if let Some(tasks) = self.by_label.get_mut(&(key.clone(), value.clone())) {
                tasks.remove(&task_id);
            }
            if let Some(tasks) = self.by_key.get_mut(key) {
                tasks.remove(&task_id);
            }
        }
    }

    fn tasks_with_label(&self, key: &str, value: &str) -> Option<&HashSet<TaskId>> {
        self.by_label.get(&(key.to_string(), value.to_string()))
    }

    fn tasks_with_key(&self, key: &str) -> Option<&HashSet<TaskId>> {
        self.by_key.get(key)
    }

    /// Narrows `candidates` to the tasks satisfying `expression`. Negated
    /// operators are complements over the candidate set, which makes a task
    /// without the key match NotIn/DoesNotExist.
    fn filter_by_expression(
        &self,
        candidates: &HashSet<TaskId>,
        expression: &MatchExpression,
    ) -> HashSet<TaskId> {
        let operator = SelectorOperator::parse(&expression.operator);
        let mut positive: HashSet<TaskId> = HashSet::new();
        match operator {
            SelectorOperator::In | SelectorOperator::NotIn => {
                for value in &expression.values {
                    if let Some(tasks) = self.tasks_with_label(&expression.key, value) {
                        positive.extend(tasks);
                    }
                }
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist => {
                if let Some(tasks) = self.tasks_with_key(&expression.key) {
                    positive.extend(tasks);
                }
            }
        }
        let negated = matches!(
            operator,
            SelectorOperator::NotIn | SelectorOperator::DoesNotExist
        );
        candidates
            .iter()
            .filter(|task_id| positive.contains(task_id) != negated)
            .copied()
            .collect()
    }

    /// Narrows `candidates` to the tasks satisfying the whole selector.
    fn filter_by_selector(
        &self,
        candidates: HashSet<TaskId>,
        selector: &LabelSelector,
    ) -> HashSet<TaskId> {
        let mut matching = candidates;
        for (key, value) in &selector.match_labels {
            let with_label = self.tasks_with_label(key, value);
            matching.retain(|task_id| with_label.map_or(false, |tasks| tasks.contains(task_id)));
        }
        for expression in &selector.match_expressions {
            matching = self.filter_by_expression(&matching, expression);
        }
        matching
    }
}

pub type SharedLabelIndex = Rc<RefCell<LabelIndex>>;

/// Tasks running on the machine that satisfy the pod-affinity term under its
/// namespace scope. A term without a label selector matches no pods; a term
/// without namespaces is scoped to `task_namespace`.
pub fn pods_matching_term(
    rd: &ResourceDescriptor,
    term: &PodAffinityTerm,
    task_namespace: &str,
    tasks: &HashMap<TaskId, TaskDescriptor>,
    label_index: &LabelIndex,
) -> HashSet<TaskId> {
    let selector = match &term.label_selector {
        Some(selector) => selector,
        None => return HashSet::new(),
    };
    let in_scope: HashSet<TaskId> = rd
        .current_running_tasks
        .iter()
        .filter(|task_id| {
            let td = tasks
                .get(task_id)
                .expect("running task is missing from the task map");
            if term.namespaces.is_empty() {
                td.namespace == task_namespace
            } else {
                term.namespaces.contains(&td.namespace)
            }
        })
        .copied()
        .collect();
    label_index.filter_by_selector(in_scope, selector)
}

/// True when every (key, value) the task demands appears in the machine's
/// labels.
pub fn satisfies_node_selector(rd: &ResourceDescriptor, td: &TaskDescriptor) -> bool {
    td.node_selector
        .iter()
        .all(|(key, value)| rd.labels.get(key) == Some(value))
}

/// True when the machine satisfies every label selector the task carries.
pub fn satisfies_label_selectors(rd: &ResourceDescriptor, td: &TaskDescriptor) -> bool {
    td.label_selectors
        .iter()
        .all(|selector| selector_matches_labels(&rd.labels, selector))
}

/// True when the machine matches every required node-affinity term.
pub fn satisfies_required_node_affinity(rd: &ResourceDescriptor, td: &TaskDescriptor) -> bool {
    td.required_node_selector_terms()
        .iter()
        .all(|term| node_matches_selector_term(rd, term))
}

/// True when, for every required pod-affinity term, at least one pod running
/// on the machine satisfies it.
pub fn satisfies_required_pod_affinity(
    rd: &ResourceDescriptor,
    td: &TaskDescriptor,
    tasks: &HashMap<TaskId, TaskDescriptor>,
    label_index: &LabelIndex,
) -> bool {
    td.required_pod_affinity_terms().iter().all(|term| {
        !pods_matching_term(rd, term, &td.namespace, tasks, label_index).is_empty()
    })
}

/// True when no pod running on the machine satisfies any required
/// anti-affinity term. A machine with no candidate pods satisfies every term
/// trivially.
pub fn satisfies_required_pod_anti_affinity(
    rd: &ResourceDescriptor,
    td: &TaskDescriptor,
    tasks: &HashMap<TaskId, TaskDescriptor>,
    label_index: &LabelIndex,
) -> bool {
    td.required_pod_anti_affinity_terms().iter().all(|term| {
        pods_matching_term(rd, term, &td.namespace, tasks, label_index).is_empty()
    })
}

/// The full hard-constraint filter: a machine failing any predicate is not a
/// placement candidate for the task and grows no arcs at all.
pub fn satisfies_hard_constraints(
    rd: &ResourceDescriptor,
    td: &TaskDescriptor,
    tasks: &HashMap<TaskId, TaskDescriptor>,
    label_index: &LabelIndex,
) -> bool {
    if !satisfies_node_selector(rd, td)
        || !satisfies_label_selectors(rd, td)
        || !satisfies_required_node_affinity(rd, td)
    {
        debug!(
            "machine {:?} rejected for task {}: node selector or node affinity",
            rd.friendly_name, td.uid
        );
        return false;
    }
    if !satisfies_required_pod_affinity(rd, td, tasks, label_index)
        || !satisfies_required_pod_anti_affinity(rd, td, tasks, label_index)
    {
        debug!(
            "machine {:?} rejected for task {}: pod (anti-)affinity",
            rd.friendly_name, td.uid
        );
        return false;
    }
    true
}
