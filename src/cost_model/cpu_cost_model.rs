//! CPU/memory cost model: bin-packing priorities and Kubernetes-style
//! placement constraints encoded as arc costs.
//!
//! Tasks with identical placement constraints share one equivalence class;
//! every machine fans out into one class per placement slot, so the arc
//! between a task-side class and slot k prices "the (k+1)-th copy of this
//! request on this machine". Slot arcs only exist while the machine has room
//! for that many copies, which bounds placements without the solver knowing
//! anything about resources.
//!
//! Costs are computed in two passes per scheduling round: enumerating
//! candidate arcs records every machine's raw soft-constraint scores and the
//! per-class score bounds, and only the later per-arc cost queries normalize
//! against those bounds.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use average::{Estimate, Mean, Variance};
use log::warn;

use crate::config::CostModelConfig;
use crate::core::common::{
    hash_combine, hash_value, EquivClassId, JobId, ResourceId, Resources, TaskId,
};
use crate::core::knowledge_base::SharedKnowledgeBase;
use crate::core::labels::{self, LabelIndex, SharedLabelIndex};
use crate::core::resource::{ResourceDescriptor, ResourceMap, ResourceType};
use crate::core::task::{TaskDescriptor, TaskMap};
use crate::cost_model::cost_vector::{CostFlattener, CostVector};
use crate::cost_model::interface::{
    ArcDescriptor, CostModel, FlowGraphNode, FlowNodeType,
};
use crate::cost_model::priority::{
    normalize_against_max, normalize_against_span, MinMaxScores, PriorityScore,
    PriorityScoreList, UNSET_SCORE,
};

/// Cost of the arc from any task to its unscheduled aggregator. Far above
/// the flattened cost of any placement arc, so the solver schedules a task
/// whenever a feasible machine exists.
pub const TASK_TO_UNSCHEDULED_AGG_COST: i64 = 2_560_000;

/// Where the model currently is within a scheduling round. Rounds open with
/// the stat traversal and end with the arc sweep; the transition back to
/// stats is the boundary at which round-local caches are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RoundPhase {
    Stats,
    Arcs,
}

pub struct CpuMemCostModel {
    resource_map: ResourceMap,
    task_map: TaskMap,
    knowledge_base: SharedKnowledgeBase,
    label_index: SharedLabelIndex,
    config: CostModelConfig,
    flattener: CostFlattener,

    /// Resource request of every task that has been added.
    task_request: HashMap<TaskId, Resources>,
    /// Resource request shared by all tasks of an equivalence class. Stable
    /// for the life of the class.
    ec_request: HashMap<EquivClassId, Resources>,
    /// Snapshot of the task descriptor a class was derived from; supplies
    /// the constraints evaluated against machines.
    ec_task_template: HashMap<EquivClassId, TaskDescriptor>,
    ec_to_machine: HashMap<EquivClassId, ResourceId>,
    ec_to_index: HashMap<EquivClassId, u64>,
    /// Slot classes of every machine, ordered by slot index. BTreeMap keeps
    /// candidate enumeration deterministic across rounds.
    machine_ecs: BTreeMap<ResourceId, Vec<EquivClassId>>,

    /// Round-local: raw and normalized scores per (class, machine).
    ec_node_scores: HashMap<EquivClassId, HashMap<ResourceId, PriorityScoreList>>,
    /// Round-local: normalization bounds per class.
    ec_minmax: HashMap<EquivClassId, MinMaxScores>,
    phase: RoundPhase,
    multi_arc_cap_warned: bool,
}

impl CpuMemCostModel {
    pub fn new(
        resource_map: ResourceMap,
        task_map: TaskMap,
        knowledge_base: SharedKnowledgeBase,
        label_index: SharedLabelIndex,
        config: CostModelConfig,
    ) -> Self {
        let flattener = CostFlattener::new(config.omega);
        Self {
            resource_map,
            task_map,
            knowledge_base,
            label_index,
            config,
            flattener,
            task_request: Default::default(),
            ec_request: Default::default(),
            ec_task_template: Default::default(),
            ec_to_machine: Default::default(),
            ec_to_index: Default::default(),
            machine_ecs: Default::default(),
            ec_node_scores: Default::default(),
            ec_minmax: Default::default(),
            phase: RoundPhase::Arcs,
            multi_arc_cap_warned: false,
        }
    }

    /// Registry factory.
    pub fn create(
        resource_map: ResourceMap,
        task_map: TaskMap,
        knowledge_base: SharedKnowledgeBase,
        label_index: SharedLabelIndex,
        config: CostModelConfig,
    ) -> Box<dyn CostModel> {
        Box::new(Self::new(
            resource_map,
            task_map,
            knowledge_base,
            label_index,
            config,
        ))
    }

    /// Strict upper bound on every cost emitted so far; the flow-graph
    /// manager uses it for arcs that must never carry flow.
    pub fn infinity(&self) -> i64 {
        self.flattener.infinity()
    }

    /// Identity of the k-th placement slot on a machine.
    fn machine_ec(machine_name: &str, slot_index: u64) -> EquivClassId {
        hash_combine(hash_value(machine_name), hash_value(&slot_index))
    }

    fn resource(&self, resource_id: ResourceId) -> Rc<RefCell<ResourceDescriptor>> {
        self.resource_map
            .borrow()
            .get(&resource_id)
            .unwrap_or_else(|| panic!("resource {} is missing from the resource map", resource_id))
            .clone()
    }

    /// Walks parent links up to the machine that owns `resource_id`.
    fn machine_res_id_for_resource(&self, resource_id: ResourceId) -> ResourceId {
        let resource_map = self.resource_map.clone();
        let resources = resource_map.borrow();
        let mut current = resources
            .get(&resource_id)
            .unwrap_or_else(|| panic!("resource {} is missing from the resource map", resource_id))
            .clone();
        loop {
            let parent = {
                let rd = current.borrow();
                if rd.resource_type == ResourceType::Machine {
                    return rd.uuid;
                }
                rd.parent.unwrap_or_else(|| {
                    panic!("non-machine resource {} has no parent", rd.uuid)
                })
            };
            current = resources
                .get(&parent)
                .unwrap_or_else(|| panic!("resource {} is missing from the resource map", parent))
                .clone();
        }
    }

    /// Capacity of the structural arc from a resource node to its parent.
    fn capacity_from_res_node_to_parent(&self, rd: &ResourceDescriptor) -> u64 {
        if rd.resource_type == ResourceType::Pu {
            self.config.max_tasks_per_pu
        } else {
            rd.num_slots_below
        }
    }

    /// Records the machine's raw soft node-affinity score for the class and
    /// widens the class's normalization bounds.
    fn calculate_priorities_cost(
        &mut self,
        ec: EquivClassId,
        rd: &ResourceDescriptor,
        td: &TaskDescriptor,
    ) {
        let terms = td.preferred_node_affinity_terms();
        if terms.is_empty() {
            return;
        }
        let mut sum_of_weights = 0;
        for term in terms {
            if term.weight == 0 {
                continue;
            }
            if labels::node_matches_selector_term(rd, &term.preference) {
                sum_of_weights += term.weight;
            }
        }
        let scores = self
            .ec_node_scores
            .entry(ec)
            .or_default()
            .entry(rd.uuid)
            .or_default();
        scores.node_affinity = PriorityScore {
            satisfies: sum_of_weights > 0,
            raw: sum_of_weights,
            final_score: UNSET_SCORE,
        };
        self.ec_minmax
            .entry(ec)
            .or_default()
            .node_affinity
            .update(sum_of_weights);
    }

    /// Records the machine's raw soft pod-affinity score. Preferred
    /// anti-affinity terms contribute their weight when they hold, i.e. when
    /// the machine is free of the pods they describe.
    fn calculate_pod_affinity_anti_affinity_preference(
        &mut self,
        ec: EquivClassId,
        rd: &ResourceDescriptor,
        td: &TaskDescriptor,
        tasks: &HashMap<TaskId, TaskDescriptor>,
        label_index: &LabelIndex,
    ) {
        let affinity_terms = td.preferred_pod_affinity_terms();
        let anti_affinity_terms = td.preferred_pod_anti_affinity_terms();
        if affinity_terms.is_empty() && anti_affinity_terms.is_empty() {
            return;
        }
        let mut sum_of_weights = 0;
        for term in affinity_terms {
            if term.weight == 0 {
                continue;
            }
            let matching = labels::pods_matching_term(
                rd,
                &term.pod_affinity_term,
                &td.namespace,
                tasks,
                label_index,
            );
            if !matching.is_empty() {
                sum_of_weights += term.weight;
            }
        }
        for term in anti_affinity_terms {
            if term.weight == 0 {
                continue;
            }
            let matching = labels::pods_matching_term(
                rd,
                &term.pod_affinity_term,
                &td.namespace,
                tasks,
                label_index,
            );
            if matching.is_empty() {
                sum_of_weights += term.weight;
            }
        }
        let scores = self
            .ec_node_scores
            .entry(ec)
            .or_default()
            .entry(rd.uuid)
            .or_default();
        scores.pod_affinity = PriorityScore {
            satisfies: sum_of_weights > 0,
            raw: sum_of_weights,
            final_score: UNSET_SCORE,
        };
        self.ec_minmax
            .entry(ec)
            .or_default()
            .pod_affinity
            .update(sum_of_weights);
    }

    /// Normalized node-affinity score of the machine for the class, cached
    /// on first use. A machine with no recorded score keeps the full
    /// penalty.
    fn normalized_node_affinity_score(&mut self, ec: EquivClassId, machine_id: ResourceId) -> i64 {
        let minmax = match self.ec_minmax.get(&ec) {
            Some(scores) => scores.node_affinity,
            None => return 0,
        };
        let omega = self.config.omega;
        let scores = match self
            .ec_node_scores
            .get_mut(&ec)
            .and_then(|machines| machines.get_mut(&machine_id))
        {
            Some(scores) => scores,
            None => return 0,
        };
        if scores.node_affinity.final_score == UNSET_SCORE {
            scores.node_affinity.final_score =
                normalize_against_max(scores.node_affinity.raw, &minmax, omega);
        }
        scores.node_affinity.final_score
    }

    /// Normalized pod-affinity score, against the round's (max - min) span.
    fn normalized_pod_affinity_score(&mut self, ec: EquivClassId, machine_id: ResourceId) -> i64 {
        let minmax = match self.ec_minmax.get(&ec) {
            Some(scores) => scores.pod_affinity,
            None => return 0,
        };
        let omega = self.config.omega;
        let scores = match self
            .ec_node_scores
            .get_mut(&ec)
            .and_then(|machines| machines.get_mut(&machine_id))
        {
            Some(scores) => scores,
            None => return 0,
        };
        if scores.pod_affinity.final_score == UNSET_SCORE {
            scores.pod_affinity.final_score =
                normalize_against_span(scores.pod_affinity.raw, &minmax, omega);
        }
        scores.pod_affinity.final_score
    }

    /// Leaf gather: a PU pulls its counters and the latest telemetry of its
    /// enclosing machine.
    fn gather_leaf_stats(&mut self, pu_rc: &Rc<RefCell<ResourceDescriptor>>) {
        let machine_id = self.machine_res_id_for_resource(pu_rc.borrow().uuid);
        let max_pods = self.resource(machine_id).borrow().max_pods;
        let mut pu = pu_rc.borrow_mut();
        pu.num_running_tasks_below = pu.current_running_tasks.len() as u64;
        pu.num_slots_below = max_pods;

        let sample = self
            .knowledge_base
            .borrow()
            .get_latest_stats_for_machine(machine_id);
        let sample = match sample {
            Some(sample) => sample,
            // No sample means no new information.
            None => return,
        };
        let core_id = match parse_core_id(&pu.friendly_name) {
            Some(core_id) => core_id,
            None => return,
        };
        if let Some(cpu) = sample.cpus_stats.get(core_id) {
            pu.available.cpu =
                (cpu.cpu_capacity as f64 * (1.0 - cpu.cpu_utilization)) as u64;
        }
    }

    /// Refreshes a machine's available memory from its latest sample. Cpu
    /// rolls up from the PUs below instead.
    fn sample_machine_memory(&mut self, machine_rc: &Rc<RefCell<ResourceDescriptor>>) {
        let machine_id = machine_rc.borrow().uuid;
        let sample = self
            .knowledge_base
            .borrow()
            .get_latest_stats_for_machine(machine_id);
        if let Some(sample) = sample {
            machine_rc.borrow_mut().available.ram =
                (sample.mem_capacity as f64 * (1.0 - sample.mem_utilization)) as u64;
        }
    }

    fn accumulate_resource_stats(
        acc_rc: &Rc<RefCell<ResourceDescriptor>>,
        other_rc: &Rc<RefCell<ResourceDescriptor>>,
    ) {
        let other = other_rc.borrow();
        let mut acc = acc_rc.borrow_mut();
        acc.available += other.available;
        acc.num_running_tasks_below += other.num_running_tasks_below;
        acc.num_slots_below += other.num_slots_below;
    }
}

impl CostModel for CpuMemCostModel {
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
        ArcDescriptor::new(0, self.capacity_from_res_node_to_parent(destination), 0)
    }

    fn leaf_resource_node_to_sink(&mut self, resource_id: ResourceId) -> ArcDescriptor {
        let machine_id = self.machine_res_id_for_resource(resource_id);
        let max_pods = self.resource(machine_id).borrow().max_pods;
        let capacity = if max_pods > 0 {
            max_pods
        } else {
            self.config.max_tasks_per_pu
        };
        ArcDescriptor::new(0, capacity, 0)
    }

    // Preemption cost modeling is deferred.
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
        // A slot class feeds its machine with unit flow.
        ArcDescriptor::new(0, 1, 0)
    }

    fn equiv_class_to_equiv_class(
        &mut self,
        ec1: EquivClassId,
        ec2: EquivClassId,
    ) -> ArcDescriptor {
        let request = *self
            .ec_request
            .get(&ec1)
            .expect("equivalence class has no resource request");
        let machine_id = *self
            .ec_to_machine
            .get(&ec2)
            .expect("equivalence class is not mapped to a machine");
        let slot_index = *self
            .ec_to_index
            .get(&ec2)
            .expect("equivalence class has no slot index");
        let rd_rc = self.resource(machine_id);
        let rd = rd_rc.borrow();
        assert_eq!(
            rd.resource_type,
            ResourceType::Machine,
            "slot equivalence class maps to a non-machine resource"
        );

        // The arc prices the (slot_index + 1)-th copy of the request; it is
        // absent while the machine lacks room for that many copies.
        let usage = request.scaled(slot_index + 1);
        if !usage.fits_within(&rd.available) {
            return ArcDescriptor::new(0, 0, 0);
        }

        let cpu_fraction = fraction(usage.cpu, rd.capacity.cpu);
        let ram_fraction = fraction(usage.ram, rd.capacity.ram);
        let omega = self.config.omega;

        let mut mean = Mean::new();
        mean.add(cpu_fraction);
        mean.add(ram_fraction);
        let cpu_mem = ((mean.mean() * omega as f64) as i64).min(omega);

        let mut variance = Variance::new();
        variance.add(cpu_fraction);
        variance.add(ram_fraction);
        let balanced_res = ((variance.population_variance() * omega as f64) as i64).min(omega);

        let node_affinity_soft = omega - self.normalized_node_affinity_score(ec1, machine_id);
        let pod_affinity_soft = omega - self.normalized_pod_affinity_score(ec1, machine_id);

        let cost_vector = CostVector {
            cpu_mem,
            balanced_res,
            node_affinity_soft,
            pod_affinity_soft,
        };
        ArcDescriptor::new(self.flattener.flatten(&cost_vector), 1, 0)
    }

    fn get_task_equiv_classes(&mut self, task_id: TaskId) -> Vec<EquivClassId> {
        let task_map = self.task_map.clone();
        let tasks = task_map.borrow();
        let td = tasks
            .get(&task_id)
            .expect("task is missing from the task map");
        let request = *self
            .task_request
            .get(&task_id)
            .expect("task has no resource request; was add_task called?");
        let cpu_mem_tag = format!("{}cpumem{}", request.cpu, request.ram);
        let seed = if td.has_affinity() {
            // Affinity constraints are job-specific, so tasks only share a
            // class within their job.
            hash_value(&td.job_id)
        } else if !td.label_selectors.is_empty() {
            hash_combine(
                hash_value(&td.label_selectors[..]),
                hash_value(cpu_mem_tag.as_str()),
            )
        } else {
            hash_combine(0, hash_value(cpu_mem_tag.as_str()))
        };
        let ec = seed as EquivClassId;
        match self.ec_request.get(&ec) {
            Some(existing) => assert_eq!(
                *existing, request,
                "equivalence class re-registered with a different resource request"
            ),
            None => {
                self.ec_request.insert(ec, request);
                self.ec_task_template.insert(ec, td.clone());
            }
        }
        vec![ec]
    }

    fn get_outgoing_equiv_class_pref_arcs(&mut self, ec: EquivClassId) -> Vec<ResourceId> {
        self.ec_to_machine.get(&ec).copied().into_iter().collect()
    }

    fn get_task_preference_arcs(&mut self, _task_id: TaskId) -> Vec<ResourceId> {
        Vec::new()
    }

    fn get_equiv_class_to_equiv_classes_arcs(&mut self, ec: EquivClassId) -> Vec<EquivClassId> {
        self.phase = RoundPhase::Arcs;
        let mut pref_ecs = Vec::new();
        let request = match self.ec_request.get(&ec) {
            Some(request) => *request,
            None => return pref_ecs,
        };
        let td = self.ec_task_template.get(&ec).cloned();
        let resource_map = self.resource_map.clone();
        let task_map = self.task_map.clone();
        let label_index = self.label_index.clone();
        let resources = resource_map.borrow();
        let tasks = task_map.borrow();
        let index = label_index.borrow();

        let machine_ids: Vec<ResourceId> = self.machine_ecs.keys().copied().collect();
        for machine_id in machine_ids {
            let rd_rc = resources
                .get(&machine_id)
                .unwrap_or_else(|| {
                    panic!("machine {} is missing from the resource map", machine_id)
                })
                .clone();
            let rd = rd_rc.borrow();
            if let Some(td) = &td {
                if !labels::satisfies_hard_constraints(&rd, td, &tasks, &index) {
                    continue;
                }
                self.calculate_priorities_cost(ec, &rd, td);
                self.calculate_pod_affinity_anti_affinity_preference(ec, &rd, td, &tasks, &index);
            }
            let slots = self
                .machine_ecs
                .get(&machine_id)
                .expect("machine fan-out vanished mid-enumeration");
            let mut cumulative = request;
            let mut slot = 0;
            while cumulative.fits_within(&rd.available) && slot < slots.len() {
                pref_ecs.push(slots[slot]);
                cumulative += request;
                slot += 1;
            }
        }
        pref_ecs
    }

    fn add_machine(&mut self, rtnd: &ResourceDescriptor) {
        assert_eq!(
            rtnd.resource_type,
            ResourceType::Machine,
            "add_machine called with a non-machine resource"
        );
        let mut slots = rtnd.max_pods;
        if slots > self.config.max_multi_arcs_for_cpu {
            if !self.multi_arc_cap_warned {
                warn!(
                    "machine {:?} asks for {} placement slots, clamping to {}",
                    rtnd.friendly_name, slots, self.config.max_multi_arcs_for_cpu
                );
                self.multi_arc_cap_warned = true;
            }
            slots = self.config.max_multi_arcs_for_cpu;
        }
        let machine_ecs: Vec<EquivClassId> = (0..slots)
            .map(|slot_index| Self::machine_ec(&rtnd.friendly_name, slot_index))
            .collect();
        // Validate everything before committing, so a failed registration
        // never leaves a partially populated fan-out behind.
        assert!(
            !self.machine_ecs.contains_key(&rtnd.uuid),
            "machine {} registered twice",
            rtnd.uuid
        );
        for ec in &machine_ecs {
            assert!(
                !self.ec_to_machine.contains_key(ec),
                "slot equivalence class {} already exists",
                ec
            );
        }
        for (slot_index, ec) in machine_ecs.iter().enumerate() {
            self.ec_to_index.insert(*ec, slot_index as u64);
            self.ec_to_machine.insert(*ec, rtnd.uuid);
        }
        self.machine_ecs.insert(rtnd.uuid, machine_ecs);
    }

    fn add_task(&mut self, task_id: TaskId) {
        let task_map = self.task_map.clone();
        let tasks = task_map.borrow();
        let td = tasks
            .get(&task_id)
            .expect("task is missing from the task map");
        let previous = self.task_request.insert(task_id, td.resource_request);
        assert!(previous.is_none(), "task {} added twice", task_id);
    }

    fn remove_machine(&mut self, resource_id: ResourceId) {
        let machine_ecs = self
            .machine_ecs
            .remove(&resource_id)
            .unwrap_or_else(|| panic!("machine {} was never added", resource_id));
        for ec in machine_ecs {
            assert!(self.ec_to_machine.remove(&ec).is_some());
            assert!(self.ec_to_index.remove(&ec).is_some());
        }
    }

    fn remove_task(&mut self, task_id: TaskId) {
        assert!(
            self.task_request.remove(&task_id).is_some(),
            "task {} was never added",
            task_id
        );
    }

    fn prepare_stats(&mut self, node: &FlowGraphNode) {
        if self.phase == RoundPhase::Arcs {
            // Round boundary: scores recorded last round must not survive
            // into this one.
            self.ec_node_scores.clear();
            self.ec_minmax.clear();
            self.phase = RoundPhase::Stats;
        }
        if !node.is_resource() {
            return;
        }
        let resource_id = node
            .resource_id
            .expect("resource node carries no resource id");
        let rd_rc = self.resource(resource_id);
        let mut rd = rd_rc.borrow_mut();
        rd.num_running_tasks_below = 0;
        rd.num_slots_below = 0;
        rd.available = Resources::default();
    }

    fn gather_stats(&mut self, accumulator: &FlowGraphNode, other: &FlowGraphNode) {
        if !accumulator.is_resource() {
            return;
        }
        let acc_id = accumulator
            .resource_id
            .expect("resource node carries no resource id");
        let acc_rc = self.resource(acc_id);
        if !other.is_resource() {
            if other.node_type == FlowNodeType::Sink {
                let acc_type = acc_rc.borrow().resource_type;
                if acc_type == ResourceType::Pu {
                    self.gather_leaf_stats(&acc_rc);
                }
            }
            return;
        }
        let other_id = other
            .resource_id
            .expect("resource node carries no resource id");
        let other_rc = self.resource(other_id);
        let acc_type = acc_rc.borrow().resource_type;
        match acc_type {
            ResourceType::Machine => {
                self.sample_machine_memory(&acc_rc);
                Self::accumulate_resource_stats(&acc_rc, &other_rc);
            }
            ResourceType::Coordinator => {}
            _ => Self::accumulate_resource_stats(&acc_rc, &other_rc),
        }
    }

    fn update_stats(&mut self, _accumulator: &FlowGraphNode, _other: &FlowGraphNode) {}
}

fn fraction(used: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        used as f64 / capacity as f64
    }
}

/// Extracts the core number from a PU's friendly name, e.g. "PU #3".
fn parse_core_id(friendly_name: &str) -> Option<usize> {
    let start = friendly_name.find("PU #")? + 4;
    friendly_name[start..].trim().parse().ok()
}
