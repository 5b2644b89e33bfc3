// crates/flownodes/tests/nodes_test.rs

use flowcore::{
    ActivationState, ExecutionEvent, GraphTemplate, NodeAddress, NodeGuid, NodeSpec, PinActivationType, Severity,
    DEFAULT_INPUT, DEFAULT_OUTPUT,
};
use flownodes::pins::{COMPLETED, FINISHED, GOAL, INCREMENT, RESET_PIN, STEP};
use flowruntime::{FlowSubsystem, NodeRegistry, RuntimeConfig};
use std::sync::{Arc, Once};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init();
    });
}

fn registry() -> Arc<NodeRegistry> {
    Arc::new(flownodes::standard_registry())
}

fn subsystem() -> FlowSubsystem {
    let config = RuntimeConfig {
        record_pin_activations: true,
        ..RuntimeConfig::default()
    };
    FlowSubsystem::with_config(registry(), config)
}

fn spec(node_type: &str) -> NodeSpec {
    flownodes::standard_registry().new_spec(node_type).unwrap()
}

fn add(template: &mut GraphTemplate, node: NodeSpec) -> NodeGuid {
    template.add_node(node).unwrap()
}

fn drain(events: &mut broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn messages(events: &[ExecutionEvent], wanted: Severity) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::Message { severity, message, .. } if *severity == wanted => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Start -> node, returning the template and both guids.
fn start_into(path: &str, node: NodeSpec, pin: &str) -> (GraphTemplate, NodeGuid, NodeGuid) {
    let mut template = GraphTemplate::new(path);
    let start = add(&mut template, spec("route.start"));
    let node = add(&mut template, node);
    template.connect(start, DEFAULT_OUTPUT, node, pin).unwrap();
    (template, start, node)
}

#[test]
fn test_sequence_fires_outputs_in_order_within_one_call() {
    init_tracing();
    let mut subsystem = subsystem();
    let (mut template, _, sequence) = start_into(
        "tests/sequence",
        spec("route.sequence").with_numbered_outputs(0, 2),
        DEFAULT_INPUT,
    );
    let targets: Vec<NodeGuid> = (0..3).map(|_| add(&mut template, spec("route.reroute"))).collect();
    for (i, target) in targets.iter().enumerate() {
        template.connect(sequence, i.to_string(), *target, DEFAULT_INPUT).unwrap();
    }
    let path = subsystem.register_template(template);
    let mut events = subsystem.subscribe_events();

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let activated: Vec<NodeGuid> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ExecutionEvent::NodeActivated { node_guid, .. } if targets.contains(&node_guid) => Some(node_guid),
            _ => None,
        })
        .collect();
    assert_eq!(activated, targets);

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(sequence), Some(ActivationState::Completed));
    assert!(instance.active_nodes().is_empty());
}

fn and_graph(path: &str, first: &str, second: &str) -> (GraphTemplate, NodeGuid, NodeGuid) {
    let (mut template, _, sequence) = start_into(path, spec("route.sequence"), DEFAULT_INPUT);
    let and = add(&mut template, spec("operator.and"));
    let out = add(&mut template, spec("route.reroute"));
    template.connect(sequence, "0", and, first).unwrap();
    template.connect(sequence, "1", and, second).unwrap();
    template.connect(and, DEFAULT_OUTPUT, out, DEFAULT_INPUT).unwrap();
    (template, and, out)
}

#[test]
fn test_and_waits_for_every_input() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, and, out) = and_graph("tests/and_same", "0", "0");
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert!(instance.is_node_active(and), "Same input twice must not satisfy AND");
    assert_eq!(instance.node_state(out), Some(ActivationState::NeverActivated));
}

#[test]
fn test_and_fires_once_when_all_inputs_seen() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, and, out) = and_graph("tests/and_both", "0", "1");
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(and), Some(ActivationState::Completed));
    assert_eq!(instance.output_records(and, DEFAULT_OUTPUT).len(), 1);
    assert_eq!(instance.node_state(out), Some(ActivationState::Completed));
}

#[test]
fn test_or_fires_on_any_input() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, or) = start_into("tests/or", spec("operator.or"), "1");
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(or), Some(ActivationState::Completed));
    assert_eq!(instance.output_records(or, DEFAULT_OUTPUT).len(), 1);
}

#[test]
fn test_counter_reaches_goal() {
    init_tracing();
    let mut subsystem = subsystem();
    let (mut template, _, sequence) = start_into("tests/counter", spec("route.sequence"), DEFAULT_INPUT);
    let counter = add(&mut template, spec("route.counter").with_config("goal", 2));
    template.connect(sequence, "0", counter, INCREMENT).unwrap();
    template.connect(sequence, "1", counter, INCREMENT).unwrap();
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.output_records(counter, STEP).len(), 1);
    assert_eq!(instance.output_records(counter, GOAL).len(), 1);
    assert_eq!(instance.node_state(counter), Some(ActivationState::Completed));
}

#[test]
fn test_counter_reports_progress_while_counting() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, counter) = start_into("tests/counter_status", spec("route.counter"), INCREMENT);
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let address = NodeAddress::new(id, counter);
    assert!(subsystem.is_node_active(address));
    assert_eq!(subsystem.node_status(address).as_deref(), Some("1/2"));
}

#[test]
fn test_invalid_counter_goal_is_rejected() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, _) = start_into(
        "tests/counter_invalid",
        spec("route.counter").with_config("goal", "two"),
        INCREMENT,
    );
    let path = subsystem.register_template(template);

    assert!(subsystem.start_root_flow("player", &path).is_err());
    assert_eq!(subsystem.instance_count(), 0);
}

#[test]
fn test_counter_goal_below_one_is_rejected() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, _) = start_into(
        "tests/counter_zero_goal",
        spec("route.counter").with_config("goal", 0),
        INCREMENT,
    );
    let path = subsystem.register_template(template);

    assert!(subsystem.start_root_flow("player", &path).is_err());
}

#[test]
fn test_undeclared_input_passes_through_without_node_logic() {
    init_tracing();
    let mut subsystem = subsystem();
    let (mut template, _, _) = start_into("tests/counter_bogus", spec("route.reroute"), DEFAULT_INPUT);
    let counter = add(&mut template, spec("route.counter"));
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();
    let mut events = subsystem.subscribe_events();

    let address = NodeAddress::new(id, counter);
    subsystem.trigger_input(address, "Bogus");

    let errors = messages(&drain(&mut events), Severity::Error);
    assert_eq!(errors, vec!["Input pin 'Bogus' is not declared on this node".to_string()]);
    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(counter), Some(ActivationState::Completed));
    assert!(instance.active_nodes().is_empty());
    assert_eq!(instance.input_records(counter, "Bogus").len(), 1);
    assert!(instance.output_records(counter, STEP).is_empty());
    assert!(instance.output_records(counter, GOAL).is_empty());
}

#[test]
fn test_undeclared_input_leaves_active_node_alone() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, counter) = start_into("tests/counter_bogus_active", spec("route.counter"), INCREMENT);
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();

    let address = NodeAddress::new(id, counter);
    subsystem.trigger_input(address, "Bogus");

    assert!(subsystem.is_node_active(address));
    assert_eq!(subsystem.node_status(address).as_deref(), Some("1/2"));
}

fn delay_graph(path: &str, seconds: f64) -> (GraphTemplate, NodeGuid, NodeGuid) {
    let (mut template, _, delay) = start_into(path, spec("route.delay").with_config("delay_seconds", seconds), DEFAULT_INPUT);
    let out = add(&mut template, spec("route.reroute"));
    template.connect(delay, FINISHED, out, DEFAULT_INPUT).unwrap();
    (template, delay, out)
}

#[test]
fn test_delay_fires_after_its_time() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, delay, out) = delay_graph("tests/delay", 0.5);
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();
    assert!(subsystem.instance(id).unwrap().is_node_active(delay));
    assert_eq!(subsystem.active_timer_count(), 1);

    subsystem.tick(0.25);
    assert!(subsystem.instance(id).unwrap().is_node_active(delay));

    subsystem.tick(0.25);
    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(delay), Some(ActivationState::Completed));
    assert_eq!(instance.node_state(out), Some(ActivationState::Completed));
    assert_eq!(subsystem.active_timer_count(), 0);
}

#[test]
fn test_tiny_delay_fires_instantly() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, delay, out) = delay_graph("tests/delay_instant", 0.0);
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(delay), Some(ActivationState::Completed));
    assert_eq!(instance.node_state(out), Some(ActivationState::Completed));
    assert_eq!(subsystem.active_timer_count(), 0);
}

#[test]
fn test_force_finished_delay_passes_through_and_clears_timer() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, delay, out) = delay_graph("tests/delay_forced", 5.0);
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();

    subsystem.force_finish_node(NodeAddress::new(id, delay));

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(delay), Some(ActivationState::Completed));
    assert_eq!(instance.node_state(out), Some(ActivationState::Completed));
    let records = instance.output_records(delay, FINISHED);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].activation_type, PinActivationType::Forced);
    assert_eq!(subsystem.active_timer_count(), 0);

    subsystem.tick(10.0);
    assert_eq!(subsystem.instance(id).unwrap().output_records(delay, FINISHED).len(), 1);
}

fn timer_spec(completion: f64, step: f64) -> NodeSpec {
    spec("route.timer")
        .with_config("completion_time", completion)
        .with_config("step_time", step)
}

#[test]
fn test_timer_steps_then_completes() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, timer) = start_into("tests/timer", timer_spec(1.0, 0.25), DEFAULT_INPUT);
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();

    for _ in 0..3 {
        subsystem.tick(0.25);
    }
    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.output_records(timer, STEP).len(), 3);
    assert!(instance.is_node_active(timer));

    subsystem.tick(0.25);
    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.output_records(timer, COMPLETED).len(), 1);
    assert_eq!(instance.output_records(timer, STEP).len(), 3);
    assert_eq!(instance.node_state(timer), Some(ActivationState::Completed));
    assert_eq!(subsystem.active_timer_count(), 0);
}

#[test]
fn test_timer_rejects_second_start() {
    init_tracing();
    let mut subsystem = subsystem();
    let (mut template, _, sequence) = start_into("tests/timer_twice", spec("route.sequence"), DEFAULT_INPUT);
    let timer = add(&mut template, timer_spec(1.0, 0.0));
    template.connect(sequence, "0", timer, DEFAULT_INPUT).unwrap();
    template.connect(sequence, "1", timer, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);
    let mut events = subsystem.subscribe_events();

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let errors = messages(&drain(&mut events), Severity::Error);
    assert_eq!(errors, vec!["Timer already active".to_string()]);
    assert!(subsystem.instance(id).unwrap().is_node_active(timer));
    assert_eq!(subsystem.active_timer_count(), 1);
}

#[test]
fn test_timer_skip_clears_timers() {
    init_tracing();
    let mut subsystem = subsystem();
    let (mut template, _, sequence) = start_into("tests/timer_skip", spec("route.sequence"), DEFAULT_INPUT);
    let timer = add(&mut template, timer_spec(1.0, 0.1));
    template.connect(sequence, "0", timer, DEFAULT_INPUT).unwrap();
    template.connect(sequence, "1", timer, "Skip").unwrap();
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.output_records(timer, "Skipped").len(), 1);
    assert_eq!(instance.node_state(timer), Some(ActivationState::Completed));
    assert_eq!(subsystem.active_timer_count(), 0);
}

#[test]
fn test_timer_without_completion_time_completes_with_error() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, timer) = start_into("tests/timer_invalid", timer_spec(0.0, 0.0), DEFAULT_INPUT);
    let path = subsystem.register_template(template);
    let mut events = subsystem.subscribe_events();

    let id = subsystem.start_root_flow("player", &path).unwrap();

    assert_eq!(messages(&drain(&mut events), Severity::Error).len(), 1);
    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.output_records(timer, COMPLETED).len(), 1);
}

#[test]
fn test_next_tick_completes_on_following_tick() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, next_tick) = start_into("tests/next_tick", spec("route.next_tick"), DEFAULT_INPUT);
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();
    assert!(subsystem.instance(id).unwrap().is_node_active(next_tick));

    subsystem.tick(0.016);

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.output_records(next_tick, COMPLETED).len(), 1);
    assert_eq!(instance.node_state(next_tick), Some(ActivationState::Completed));
}

fn gate_graph(path: &str, gate: NodeSpec) -> (FlowSubsystem, flowcore::InstanceId, NodeGuid) {
    let mut subsystem = subsystem();
    let mut template = GraphTemplate::new(path);
    add(&mut template, spec("route.start"));
    let gate = add(&mut template, gate.with_numbered_outputs(0, 2));
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();
    (subsystem, id, gate)
}

fn fired(subsystem: &FlowSubsystem, id: flowcore::InstanceId, gate: NodeGuid) -> Vec<usize> {
    let instance = subsystem.instance(id).unwrap();
    (0..3).map(|i| instance.output_records(gate, &i.to_string()).len()).collect()
}

#[test]
fn test_multi_gate_fires_each_output_once() {
    init_tracing();
    let (mut subsystem, id, gate) = gate_graph("tests/gate", spec("route.multi_gate"));
    let address = NodeAddress::new(id, gate);

    subsystem.trigger_input(address, DEFAULT_INPUT);
    assert_eq!(fired(&subsystem, id, gate), vec![1, 0, 0]);
    subsystem.trigger_input(address, DEFAULT_INPUT);
    subsystem.trigger_input(address, DEFAULT_INPUT);
    assert_eq!(fired(&subsystem, id, gate), vec![1, 1, 1]);

    subsystem.trigger_input(address, DEFAULT_INPUT);
    assert_eq!(fired(&subsystem, id, gate), vec![1, 1, 1], "Exhausted gate stays closed");
    assert!(subsystem.is_node_active(address));

    subsystem.trigger_input(address, RESET_PIN);
    assert_eq!(subsystem.node_state(address), Some(ActivationState::Completed));
}

#[test]
fn test_looping_multi_gate_starts_over() {
    init_tracing();
    let (mut subsystem, id, gate) = gate_graph(
        "tests/gate_loop",
        spec("route.multi_gate").with_config("loop", true).with_config("start_index", 1),
    );
    let address = NodeAddress::new(id, gate);

    subsystem.trigger_input(address, DEFAULT_INPUT);
    assert_eq!(fired(&subsystem, id, gate), vec![0, 1, 0]);
    subsystem.trigger_input(address, DEFAULT_INPUT);
    subsystem.trigger_input(address, DEFAULT_INPUT);
    assert_eq!(fired(&subsystem, id, gate), vec![1, 1, 1]);
    assert_eq!(subsystem.node_state(address), Some(ActivationState::Completed));

    subsystem.trigger_input(address, DEFAULT_INPUT);
    assert_eq!(fired(&subsystem, id, gate), vec![1, 2, 1]);
}

#[test]
fn test_random_multi_gate_covers_every_output() {
    init_tracing();
    let (mut subsystem, id, gate) = gate_graph("tests/gate_random", spec("route.multi_gate").with_config("random", true));
    let address = NodeAddress::new(id, gate);

    for _ in 0..3 {
        subsystem.trigger_input(address, DEFAULT_INPUT);
    }

    assert_eq!(fired(&subsystem, id, gate), vec![1, 1, 1]);
}

#[test]
fn test_random_fires_exactly_one_output() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, random) = start_into("tests/random", spec("route.random").with_numbered_outputs(0, 2), DEFAULT_INPUT);
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let total: usize = fired(&subsystem, id, random).iter().sum();
    assert_eq!(total, 1);
    assert_eq!(subsystem.instance(id).unwrap().node_state(random), Some(ActivationState::Completed));
}

#[test]
fn test_log_reports_message_and_passes_through() {
    init_tracing();
    let mut subsystem = subsystem();
    let (template, _, log) = start_into(
        "tests/log",
        spec("utils.log").with_config("message", "door opened").with_config("severity", "note"),
        DEFAULT_INPUT,
    );
    let path = subsystem.register_template(template);
    let mut events = subsystem.subscribe_events();

    let id = subsystem.start_root_flow("player", &path).unwrap();

    assert_eq!(messages(&drain(&mut events), Severity::Note), vec!["door opened".to_string()]);
    assert_eq!(subsystem.instance(id).unwrap().node_state(log), Some(ActivationState::Completed));
}

#[test]
fn test_custom_input_starts_named_branch() {
    init_tracing();
    let mut subsystem = subsystem();
    let mut template = GraphTemplate::new("tests/custom_input").with_custom_inputs(["Open"]);
    add(&mut template, spec("route.start"));
    let input = add(&mut template, spec("route.custom_input").with_config("event_name", "Open"));
    let out = add(&mut template, spec("route.reroute"));
    template.connect(input, DEFAULT_OUTPUT, out, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();

    subsystem.trigger_custom_event(id, "Close");
    assert_eq!(subsystem.instance(id).unwrap().node_state(out), Some(ActivationState::NeverActivated));

    subsystem.trigger_custom_event(id, "Open");
    assert_eq!(subsystem.instance(id).unwrap().node_state(out), Some(ActivationState::Completed));
}

#[test]
fn test_finish_node_ends_root_flow() {
    init_tracing();
    let mut subsystem = subsystem();
    let (mut template, delay, _) = delay_graph("tests/finish", 1.0);
    let finish = add(&mut template, spec("route.finish"));
    template.connect(delay, FINISHED, finish, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);
    let id = subsystem.start_root_flow("player", &path).unwrap();

    subsystem.tick(1.0);

    assert!(subsystem.instance(id).is_none());
    assert!(!subsystem.is_template_active(&path));
}

#[test]
fn test_registry_lists_standard_nodes() {
    let registry = flownodes::standard_registry();
    let types = registry.list_node_types();

    for node_type in [
        "route.start",
        "route.finish",
        "route.sub_graph",
        "route.timer",
        "operator.and",
        "utils.checkpoint",
    ] {
        assert!(types.iter().any(|t| t == node_type), "{} should be registered", node_type);
    }
    let counter = registry.get_metadata("route.counter").unwrap();
    assert_eq!(counter.outputs.len(), 4);
}
