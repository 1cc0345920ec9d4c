use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use flowsched::config::CostModelConfig;
use flowsched::core::common::Resources;
use flowsched::core::knowledge_base::KnowledgeBase;
use flowsched::core::labels::LabelIndex;
use flowsched::core::resource::ResourceMap;
use flowsched::core::task::TaskMap;
use flowsched::cost_model::cpu_cost_model::CpuMemCostModel;
use flowsched::cost_model::interface::{CostModel, FlowGraphNode, COST_MODEL_REGISTRY};
use flowsched::test_util::helpers::{
    default_fixture, fixture_with_config, labels_from, make_expression, make_machine, make_task,
    preferred_node_affinity,
};

#[test]
fn test_machine_lifecycle_restores_the_indices() {
    let mut fixture = default_fixture();
    let machine = make_machine("machine_a", 1, Resources::new(4000, 8192), 2);
    let machine_id = fixture.register_machine(machine.clone());
    let task_id = fixture.register_task(make_task(1, 1, Resources::new(1000, 2048)));

    let ecs = fixture.model.get_task_equiv_classes(task_id);
    let arcs = fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]);
    assert_eq!(arcs.len(), 2);
    for arc in &arcs {
        assert_eq!(
            fixture.model.get_outgoing_equiv_class_pref_arcs(*arc),
            vec![machine_id]
        );
    }

    fixture.model.remove_machine(machine_id);
    assert!(fixture
        .model
        .get_equiv_class_to_equiv_classes_arcs(ecs[0])
        .is_empty());
    for arc in &arcs {
        assert!(fixture
            .model
            .get_outgoing_equiv_class_pref_arcs(*arc)
            .is_empty());
    }

    // Re-registration succeeds and produces the same fan-out.
    fixture.model.add_machine(&machine);
    assert_eq!(
        fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]),
        arcs
    );
}

#[test]
#[should_panic(expected = "was never added")]
fn test_removing_an_unknown_machine_is_fatal() {
    let mut fixture = default_fixture();
    fixture.model.remove_machine(uuid::Uuid::from_u128(99));
}

#[test]
#[should_panic(expected = "registered twice")]
fn test_double_machine_registration_is_fatal() {
    let mut fixture = default_fixture();
    let machine = make_machine("machine_a", 1, Resources::new(4000, 8192), 2);
    fixture.register_machine(machine.clone());
    fixture.model.add_machine(&machine);
}

#[test]
#[should_panic(expected = "added twice")]
fn test_double_task_registration_is_fatal() {
    let mut fixture = default_fixture();
    fixture.register_task(make_task(1, 1, Resources::new(1000, 2048)));
    fixture.model.add_task(1);
}

#[test]
#[should_panic(expected = "task has no resource request")]
fn test_equiv_classes_after_remove_task_are_fatal() {
    let mut fixture = default_fixture();
    let task_id = fixture.register_task(make_task(1, 1, Resources::new(1000, 2048)));
    fixture.model.remove_task(task_id);
    fixture.model.get_task_equiv_classes(task_id);
}

#[test]
#[should_panic(expected = "re-registered with a different resource request")]
fn test_conflicting_requests_in_one_affinity_class_are_fatal() {
    let mut fixture = default_fixture();
    let affinity = preferred_node_affinity(vec![(10, make_expression("zone", "In", &["a"]))]);

    // Affinity classes hash the job id alone, so two job members with
    // different requests collide on the class.
    let mut td1 = make_task(1, 7, Resources::new(1000, 2048));
    td1.affinity = Some(affinity.clone());
    let mut td2 = make_task(2, 7, Resources::new(2000, 2048));
    td2.affinity = Some(affinity);
    let first = fixture.register_task(td1);
    let second = fixture.register_task(td2);

    fixture.model.get_task_equiv_classes(first);
    fixture.model.get_task_equiv_classes(second);
}

#[test]
fn test_slot_fan_out_is_clamped() {
    let _ = env_logger::try_init();

    let mut fixture = default_fixture();
    fixture.register_machine(make_machine(
        "machine_big",
        1,
        Resources::new(1_000_000, 1_000_000_000),
        60,
    ));
    let task_id = fixture.register_task(make_task(1, 1, Resources::new(1, 1)));

    let ecs = fixture.model.get_task_equiv_classes(task_id);
    let arcs = fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]);
    assert_eq!(arcs.len(), 50);
}

#[test]
fn test_slot_count_never_exceeds_max_pods() {
    let mut fixture = default_fixture();
    fixture.register_machine(make_machine("machine_a", 1, Resources::new(40000, 81920), 3));
    let task_id = fixture.register_task(make_task(1, 1, Resources::new(100, 100)));

    let ecs = fixture.model.get_task_equiv_classes(task_id);
    let arcs = fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]);
    assert_eq!(arcs.len(), 3);
    let capacity_sum: u64 = arcs
        .iter()
        .map(|arc| {
            fixture
                .model
                .equiv_class_to_resource_node(*arc, uuid::Uuid::from_u128(1))
                .capacity
        })
        .sum();
    assert!(capacity_sum <= 3);
}

#[test]
fn test_round_boundary_clears_score_caches() {
    let mut fixture = default_fixture();
    let mut east = make_machine("machine_east", 1, Resources::new(4000, 8192), 1);
    east.labels = labels_from(&[("zone", "us-east")]);
    fixture.register_machine(east);
    let mut ssd = make_machine("machine_ssd", 2, Resources::new(4000, 8192), 1);
    ssd.labels = labels_from(&[("disk", "ssd")]);
    let ssd_id = fixture.register_machine(ssd);

    let mut td = make_task(1, 1, Resources::new(1000, 2048));
    td.affinity = Some(preferred_node_affinity(vec![
        (10, make_expression("zone", "In", &["us-east"])),
        (30, make_expression("disk", "In", &["ssd"])),
    ]));
    let task_id = fixture.register_task(td);

    let ecs = fixture.model.get_task_equiv_classes(task_id);
    let arcs = fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]);
    // With the round maximum at 30, machine_east carries penalty 667.
    let east_cost = fixture.model.equiv_class_to_equiv_class(ecs[0], arcs[0]).cost;
    assert_eq!(east_cost, 250 + 0 + 667 + 1000);

    // Next round: the high scorer is gone. With a fresh maximum of 10 the
    // remaining machine normalizes to the top score; a stale cache would
    // still price it at 667.
    fixture.model.remove_machine(ssd_id);
    fixture.model.prepare_stats(&FlowGraphNode::sink());
    let arcs = fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]);
    assert_eq!(arcs.len(), 1);
    let east_cost = fixture.model.equiv_class_to_equiv_class(ecs[0], arcs[0]).cost;
    assert_eq!(east_cost, 250 + 0 + 0 + 1000);
}

#[test]
fn test_infinity_bounds_emitted_costs() {
    let mut fixture = default_fixture();
    assert_eq!(fixture.model.infinity(), 4 * 1000 + 1);

    fixture.register_machine(make_machine("machine_a", 1, Resources::new(4000, 8192), 2));
    let task_id = fixture.register_task(make_task(1, 1, Resources::new(1000, 2048)));
    let ecs = fixture.model.get_task_equiv_classes(task_id);
    for arc in fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]) {
        let descriptor = fixture.model.equiv_class_to_equiv_class(ecs[0], arc);
        assert!(descriptor.cost < fixture.model.infinity());
    }
    assert_eq!(fixture.model.infinity(), 4 * 1000 + 1);
}

#[test]
fn test_registry_selects_models_by_name() {
    let resource_map: ResourceMap = Rc::new(RefCell::new(HashMap::new()));
    let task_map: TaskMap = Rc::new(RefCell::new(HashMap::new()));
    let knowledge_base = Rc::new(RefCell::new(KnowledgeBase::new()));
    let label_index = Rc::new(RefCell::new(LabelIndex::new()));

    assert!(COST_MODEL_REGISTRY.contains_key("CpuMem"));
    assert!(COST_MODEL_REGISTRY.contains_key("Trivial"));

    let factory = COST_MODEL_REGISTRY.get("CpuMem").unwrap();
    let mut model = factory(
        resource_map,
        task_map,
        knowledge_base,
        label_index,
        CostModelConfig::default(),
    );
    assert_eq!(model.task_to_unscheduled_agg(1).cost, 2_560_000);

    match model.downcast_mut::<CpuMemCostModel>() {
        Some(cpu_model) => {
            assert_eq!(cpu_model.infinity(), 4 * 1000 + 1);
        }
        None => {
            panic!("Failed to cast cost model to CpuMemCostModel")
        }
    }
}

#[test]
fn test_omega_scales_every_dimension() {
    let mut fixture = fixture_with_config(CostModelConfig {
        omega: 100,
        ..Default::default()
    });
    fixture.register_machine(make_machine("machine_a", 1, Resources::new(4000, 8192), 1));
    let task_id = fixture.register_task(make_task(1, 1, Resources::new(1000, 2048)));

    let ecs = fixture.model.get_task_equiv_classes(task_id);
    let arcs = fixture.model.get_equiv_class_to_equiv_classes_arcs(ecs[0]);
    let descriptor = fixture.model.equiv_class_to_equiv_class(ecs[0], arcs[0]);
    assert_eq!(descriptor.cost, 25 + 0 + 100 + 100);
    assert_eq!(fixture.model.infinity(), 4 * 100 + 1);
}
