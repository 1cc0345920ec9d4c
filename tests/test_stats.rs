use flowsched::core::common::Resources;
use flowsched::core::knowledge_base::{CpuStats, ResourceStats};
use flowsched::core::resource::{insert_resource, ResourceDescriptor, ResourceType};
use flowsched::cost_model::interface::{CostModel, FlowGraphNode};
use flowsched::test_util::helpers::{default_fixture, make_machine, make_pu, CostModelFixture};

fn machine_sample(cpu_capacity: u64, cpu_utilization: f64) -> ResourceStats {
    ResourceStats {
        cpus_stats: vec![CpuStats {
            cpu_capacity,
            cpu_utilization,
        }],
        mem_capacity: 8192,
        mem_utilization: 0.5,
    }
}

/// Machine uuid 1 with one PU (uuid 10) below it.
fn machine_with_pu(max_pods: u64) -> (CostModelFixture, uuid::Uuid, uuid::Uuid) {
    let mut fixture = default_fixture();
    let machine_id =
        fixture.register_machine(make_machine("machine_a", 1, Resources::new(8000, 8192), max_pods));
    let pu_id = insert_resource(
        &fixture.resource_map,
        make_pu("machine_a PU #0", 10, machine_id, 4000),
    );
    (fixture, machine_id, pu_id)
}

fn descriptor(fixture: &CostModelFixture, id: uuid::Uuid) -> ResourceDescriptor {
    fixture
        .resource_map
        .borrow()
        .get(&id)
        .unwrap()
        .borrow()
        .clone()
}

#[test]
fn test_prepare_stats_zeroes_accumulators() {
    let (mut fixture, machine_id, _) = machine_with_pu(5);
    {
        let resources = fixture.resource_map.borrow();
        let mut rd = resources.get(&machine_id).unwrap().borrow_mut();
        rd.num_running_tasks_below = 3;
        rd.num_slots_below = 7;
        rd.available = Resources::new(123, 456);
    }
    fixture.model.prepare_stats(&FlowGraphNode::resource(machine_id));

    let rd = descriptor(&fixture, machine_id);
    assert_eq!(rd.num_running_tasks_below, 0);
    assert_eq!(rd.num_slots_below, 0);
    assert_eq!(rd.available, Resources::new(0, 0));

    // Non-resource nodes are left alone.
    fixture.model.prepare_stats(&FlowGraphNode::sink());
    fixture.model.prepare_stats(&FlowGraphNode::task());
}

#[test]
fn test_leaf_gather_pulls_telemetry() {
    let (mut fixture, machine_id, pu_id) = machine_with_pu(5);
    {
        let resources = fixture.resource_map.borrow();
        resources.get(&pu_id).unwrap().borrow_mut().current_running_tasks = vec![1, 2];
    }
    fixture
        .knowledge_base
        .borrow_mut()
        .add_machine_sample(machine_id, machine_sample(4000, 0.25));

    fixture
        .model
        .gather_stats(&FlowGraphNode::resource(pu_id), &FlowGraphNode::sink());

    let pu = descriptor(&fixture, pu_id);
    assert_eq!(pu.available.cpu, 3000);
    assert_eq!(pu.num_running_tasks_below, 2);
    assert_eq!(pu.num_slots_below, 5);
}

#[test]
fn test_leaf_gather_without_a_sample_leaves_resources_unchanged() {
    let (mut fixture, _, pu_id) = machine_with_pu(5);
    {
        let resources = fixture.resource_map.borrow();
        resources.get(&pu_id).unwrap().borrow_mut().available.cpu = 1234;
    }

    fixture
        .model
        .gather_stats(&FlowGraphNode::resource(pu_id), &FlowGraphNode::sink());

    let pu = descriptor(&fixture, pu_id);
    // No sample means no new information, but the counters still settle.
    assert_eq!(pu.available.cpu, 1234);
    assert_eq!(pu.num_slots_below, 5);
}

#[test]
fn test_machine_gather_samples_memory_and_accumulates() {
    let (mut fixture, machine_id, pu_id) = machine_with_pu(5);
    fixture
        .knowledge_base
        .borrow_mut()
        .add_machine_sample(machine_id, machine_sample(4000, 0.25));

    fixture.model.prepare_stats(&FlowGraphNode::resource(machine_id));
    fixture
        .model
        .gather_stats(&FlowGraphNode::resource(pu_id), &FlowGraphNode::sink());
    fixture.model.gather_stats(
        &FlowGraphNode::resource(machine_id),
        &FlowGraphNode::resource(pu_id),
    );

    let machine = descriptor(&fixture, machine_id);
    // Ram comes from the sample, cpu and the counters roll up from the PU.
    assert_eq!(machine.available.ram, 4096);
    assert_eq!(machine.available.cpu, 3000);
    assert_eq!(machine.num_running_tasks_below, 0);
    assert_eq!(machine.num_slots_below, 5);
}

#[test]
fn test_intermediate_nodes_accumulate_children() {
    let (mut fixture, machine_id, _) = machine_with_pu(5);
    let numa_id = insert_resource(&fixture.resource_map, {
        let mut rd = ResourceDescriptor::new(
            uuid::Uuid::from_u128(20),
            "machine_a NUMA #0".to_string(),
            ResourceType::Numa,
            Resources::new(0, 0),
        );
        rd.parent = Some(machine_id);
        rd
    });
    let pu_id = insert_resource(&fixture.resource_map, {
        let mut pu = make_pu("machine_a PU #1", 21, numa_id, 4000);
        pu.available = Resources::new(2500, 0);
        pu.num_running_tasks_below = 1;
        pu.num_slots_below = 5;
        pu
    });

    fixture.model.gather_stats(
        &FlowGraphNode::resource(numa_id),
        &FlowGraphNode::resource(pu_id),
    );

    let numa = descriptor(&fixture, numa_id);
    assert_eq!(numa.available.cpu, 2500);
    assert_eq!(numa.num_running_tasks_below, 1);
    assert_eq!(numa.num_slots_below, 5);
}

#[test]
fn test_coordinator_gather_is_identity() {
    let mut fixture = default_fixture();
    let coordinator_id = insert_resource(
        &fixture.resource_map,
        ResourceDescriptor::new(
            uuid::Uuid::from_u128(30),
            "coordinator".to_string(),
            ResourceType::Coordinator,
            Resources::new(0, 0),
        ),
    );
    let machine_id =
        fixture.register_machine(make_machine("machine_a", 1, Resources::new(8000, 8192), 5));
    {
        let resources = fixture.resource_map.borrow();
        resources.get(&machine_id).unwrap().borrow_mut().num_slots_below = 5;
    }

    fixture.model.gather_stats(
        &FlowGraphNode::resource(coordinator_id),
        &FlowGraphNode::resource(machine_id),
    );

    let coordinator = descriptor(&fixture, coordinator_id);
    assert_eq!(coordinator.available, Resources::new(0, 0));
    assert_eq!(coordinator.num_slots_below, 0);
}

#[test]
fn test_update_stats_is_identity() {
    let (mut fixture, machine_id, pu_id) = machine_with_pu(5);
    let before = descriptor(&fixture, machine_id);
    fixture.model.update_stats(
        &FlowGraphNode::resource(machine_id),
        &FlowGraphNode::resource(pu_id),
    );
    assert_eq!(before, descriptor(&fixture, machine_id));
}

#[test]
#[should_panic(expected = "has no parent")]
fn test_orphaned_non_machine_resource_is_fatal() {
    let mut fixture = default_fixture();
    let pu_id = insert_resource(&fixture.resource_map, {
        let mut pu = make_pu("stray PU #0", 40, uuid::Uuid::from_u128(41), 4000);
        pu.parent = None;
        pu
    });
    fixture
        .model
        .gather_stats(&FlowGraphNode::resource(pu_id), &FlowGraphNode::sink());
}

#[test]
fn test_leaf_to_sink_capacity_is_the_machines_pod_cap() {
    let (mut fixture, _, pu_id) = machine_with_pu(5);
    assert_eq!(fixture.model.leaf_resource_node_to_sink(pu_id).capacity, 5);

    // Without a pod cap the configured per-PU bound applies.
    let (mut fixture, _, pu_id) = machine_with_pu(0);
    assert_eq!(fixture.model.leaf_resource_node_to_sink(pu_id).capacity, 100);
}

#[test]
fn test_structural_arc_capacities() {
    let (mut fixture, machine_id, pu_id) = machine_with_pu(5);
    {
        let resources = fixture.resource_map.borrow();
        resources.get(&machine_id).unwrap().borrow_mut().num_slots_below = 10;
    }
    let machine = descriptor(&fixture, machine_id);
    let pu = descriptor(&fixture, pu_id);

    // Arcs into a PU carry the per-PU bound; arcs into anything else carry
    // the aggregated slot count.
    assert_eq!(
        fixture
            .model
            .resource_node_to_resource_node(&machine, &pu)
            .capacity,
        100
    );
    assert_eq!(
        fixture
            .model
            .resource_node_to_resource_node(&pu, &machine)
            .capacity,
        10
    );
}
