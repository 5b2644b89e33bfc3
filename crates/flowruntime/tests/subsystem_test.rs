// crates/flowruntime/tests/subsystem_test.rs

use flowcore::{
    ActivationState, EntryPoint, ExecutionEvent, FinishPolicy, FlowError, FlowNode, GraphTemplate, InstanceError,
    NodeAddress, NodeContext, NodeError, NodeSpec, OwnerId, TemplateError, TemplateRef, TimerHandle, DEFAULT_INPUT,
    DEFAULT_OUTPUT,
};
use flowruntime::{FlowSubsystem, NodeFactory, NodeRegistry, RuntimeConfig};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init();
    });
}

struct Start;

impl FlowNode for Start {
    fn node_type(&self) -> &str {
        "test.start"
    }

    fn entry_point(&self) -> Option<EntryPoint> {
        Some(EntryPoint::Start)
    }
}

struct Finish;

impl FlowNode for Finish {
    fn node_type(&self) -> &str {
        "test.finish"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.finish();
    }

    fn is_flow_finish(&self) -> bool {
        true
    }
}

struct Pass;

impl FlowNode for Pass {
    fn node_type(&self) -> &str {
        "test.pass"
    }
}

/// Waits one second, then passes through.
#[derive(Default)]
struct Wait {
    timer: Option<TimerHandle>,
}

impl FlowNode for Wait {
    fn node_type(&self) -> &str {
        "test.wait"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        self.timer = Some(ctx.set_timer(1.0, false));
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, _timer: TimerHandle) {
        ctx.trigger_first_output(true);
    }

    fn cleanup(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(timer) = self.timer.take() {
            ctx.clear_timer(timer);
        }
    }
}

struct SimpleFactory<F> {
    node_type: &'static str,
    make: F,
}

impl<F> NodeFactory for SimpleFactory<F>
where
    F: Fn() -> Box<dyn FlowNode> + Send + Sync,
{
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok((self.make)())
    }

    fn node_type(&self) -> &str {
        self.node_type
    }
}

fn registry() -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(SimpleFactory { node_type: "test.start", make: || Box::new(Start) as Box<dyn FlowNode> }));
    registry.register(Arc::new(SimpleFactory { node_type: "test.finish", make: || Box::new(Finish) as Box<dyn FlowNode> }));
    registry.register(Arc::new(SimpleFactory { node_type: "test.pass", make: || Box::new(Pass) as Box<dyn FlowNode> }));
    registry.register(Arc::new(SimpleFactory {
        node_type: "test.wait",
        make: || Box::new(Wait::default()) as Box<dyn FlowNode>,
    }));
    Arc::new(registry)
}

fn start_spec() -> NodeSpec {
    NodeSpec::new("test.start").with_inputs(Vec::<&str>::new())
}

fn finish_spec() -> NodeSpec {
    NodeSpec::new("test.finish").with_outputs(Vec::<&str>::new())
}

/// Start -> middle -> Finish
fn linear(path: &str, middle_type: &str) -> (GraphTemplate, [Uuid; 3]) {
    let mut template = GraphTemplate::new(path);
    let start = template.add_node(start_spec()).unwrap();
    let middle = template.add_node(NodeSpec::new(middle_type)).unwrap();
    let finish = template.add_node(finish_spec()).unwrap();
    template.connect(start, DEFAULT_OUTPUT, middle, DEFAULT_INPUT).unwrap();
    template.connect(middle, DEFAULT_OUTPUT, finish, DEFAULT_INPUT).unwrap();
    (template, [start, middle, finish])
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        record_pin_activations: true,
        ..RuntimeConfig::default()
    }
}

#[test]
fn test_synchronous_chain_completes_within_start_call() {
    init_tracing();
    let mut subsystem = FlowSubsystem::with_config(registry(), config());
    let (template, _) = linear("tests/linear", "test.pass");
    let path = subsystem.register_template(template);
    let mut events = subsystem.subscribe_events();

    let id = subsystem.start_root_flow("player", &path).unwrap();

    assert!(subsystem.instance(id).is_none(), "Flow should be finished and removed");
    assert!(!subsystem.is_template_active(&path));

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::FlowFinished { instance_id, root, policy, .. } = event {
            assert_eq!(instance_id, id);
            assert!(root);
            assert_eq!(policy, FinishPolicy::Keep);
            finished = true;
        }
    }
    assert!(finished, "FlowFinished should be emitted");
}

#[test]
fn test_pass_through_default_completes_node() {
    init_tracing();
    let mut subsystem = FlowSubsystem::with_config(registry(), config());
    let (mut template, [start, wait, _]) = linear("tests/pass", "test.wait");
    let pass = template.add_node(NodeSpec::new("test.pass")).unwrap();
    template.disconnect(wait, DEFAULT_OUTPUT);
    template.connect(start, DEFAULT_OUTPUT, pass, DEFAULT_INPUT).unwrap();
    template.connect(pass, DEFAULT_OUTPUT, wait, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(pass), Some(ActivationState::Completed));
    assert_eq!(instance.output_records(pass, DEFAULT_OUTPUT).len(), 1);
    assert_eq!(instance.active_nodes(), vec![wait]);
}

#[test]
fn test_unconnected_output_adds_nothing_to_active_set() {
    init_tracing();
    let mut subsystem = FlowSubsystem::with_config(registry(), config());
    let mut template = GraphTemplate::new("tests/open_end");
    let start = template.add_node(start_spec()).unwrap();
    let pass = template.add_node(NodeSpec::new("test.pass")).unwrap();
    let idle = template.add_node(NodeSpec::new("test.wait")).unwrap();
    template.connect(start, DEFAULT_OUTPUT, pass, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert!(instance.active_nodes().is_empty());
    assert_eq!(instance.node_state(pass), Some(ActivationState::Completed));
    assert_eq!(instance.node_state(idle), Some(ActivationState::NeverActivated));
    assert_eq!(instance.output_records(pass, DEFAULT_OUTPUT).len(), 1, "Unconnected output is still recorded");
}

#[test]
fn test_dangling_link_terminates_signal() {
    init_tracing();
    let mut subsystem = FlowSubsystem::with_config(registry(), config());
    let mut template = GraphTemplate::new("tests/dangling");
    let start = template.add_node(start_spec()).unwrap();
    let pass = template.add_node(NodeSpec::new("test.pass")).unwrap();
    template.compile_node_connections(&[
        flowcore::Connection {
            from_node: start,
            from_pin: DEFAULT_OUTPUT.to_string(),
            to_node: pass,
            to_pin: DEFAULT_INPUT.to_string(),
        },
        flowcore::Connection {
            from_node: pass,
            from_pin: DEFAULT_OUTPUT.to_string(),
            to_node: Uuid::new_v4(),
            to_pin: DEFAULT_INPUT.to_string(),
        },
    ]);
    assert_eq!(template.dangling_connections().len(), 1);
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();

    let instance = subsystem.instance(id).unwrap();
    assert!(instance.active_nodes().is_empty());
    assert_eq!(instance.recorded_nodes(), vec![start, pass]);
}

#[test]
fn test_missing_start_node_is_an_error() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());
    let mut template = GraphTemplate::new("tests/no_start");
    template.add_node(NodeSpec::new("test.pass")).unwrap();
    let path = subsystem.register_template(template);

    let result = subsystem.start_root_flow("player", &path);

    assert!(matches!(
        result,
        Err(FlowError::Template(TemplateError::MissingStartNode(_)))
    ));
    assert_eq!(subsystem.instance_count(), 0, "Failed instance should be torn down");
}

#[test]
fn test_two_start_nodes_are_an_error() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());
    let mut template = GraphTemplate::new("tests/two_starts");
    template.add_node(start_spec()).unwrap();
    template.add_node(start_spec()).unwrap();
    let path = subsystem.register_template(template);

    let result = subsystem.start_root_flow("player", &path);

    assert!(matches!(
        result,
        Err(FlowError::Template(TemplateError::MultipleStartNodes { count: 2, .. }))
    ));
}

#[test]
fn test_unknown_template_is_an_error() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());

    let result = subsystem.start_root_flow("player", &TemplateRef::new("tests/nowhere"));

    assert!(matches!(result, Err(FlowError::Template(TemplateError::NotFound(_)))));
}

#[test]
fn test_same_owner_and_template_returns_running_instance() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());
    let (template, _) = linear("tests/waiting", "test.wait");
    let path = subsystem.register_template(template);

    let first = subsystem.start_root_flow("player", &path).unwrap();
    let second = subsystem.start_root_flow("player", &path).unwrap();
    let other = subsystem.start_root_flow("npc", &path).unwrap();

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(subsystem.template_instances(&path), vec![first, other]);
}

#[test]
fn test_single_instance_policy() {
    init_tracing();
    let config = RuntimeConfig {
        allow_multiple_instances: false,
        ..RuntimeConfig::default()
    };
    let mut subsystem = FlowSubsystem::with_config(registry(), config);
    let (template, _) = linear("tests/single", "test.wait");
    let path = subsystem.register_template(template);

    subsystem.start_root_flow("player", &path).unwrap();
    let result = subsystem.start_root_flow("npc", &path);

    assert!(matches!(result, Err(FlowError::Instance(InstanceError::SingleInstance(_)))));
}

#[test]
fn test_instance_names_and_inspection() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());
    let (template, _) = linear("quests/waiting", "test.wait");
    let path = subsystem.register_template(template);

    let first = subsystem.start_root_flow("a", &path).unwrap();
    let second = subsystem.start_root_flow("b", &path).unwrap();

    assert_eq!(subsystem.instance_display_names(&path), vec!["waiting_1", "waiting_2"]);
    assert_eq!(subsystem.inspected_instance(&path), Some(first));

    assert!(subsystem.set_inspected_instance(&path, "waiting_2"));
    assert_eq!(subsystem.inspected_instance(&path), Some(second));

    subsystem.finish_root_flow(&OwnerId::from("b"), &path, FinishPolicy::Abort);
    assert_eq!(subsystem.inspected_instance(&path), None);
    assert_eq!(subsystem.template_instances(&path), vec![first]);
}

#[test]
fn test_latent_node_completes_on_tick() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());
    let (template, [_, wait, _]) = linear("tests/latent", "test.wait");
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();
    let address = NodeAddress::new(id, wait);
    assert!(subsystem.is_node_active(address));

    subsystem.tick(0.5);
    assert!(subsystem.is_node_active(address));

    subsystem.tick(0.5);
    assert!(subsystem.instance(id).is_none(), "Flow should reach Finish after the timer");
    assert_eq!(subsystem.active_timer_count(), 0);
}

#[test]
fn test_force_finish_triggers_default_output() {
    init_tracing();
    let mut subsystem = FlowSubsystem::with_config(registry(), config());
    let mut template = GraphTemplate::new("tests/force");
    let start = template.add_node(start_spec()).unwrap();
    let wait = template.add_node(NodeSpec::new("test.wait")).unwrap();
    let after = template.add_node(NodeSpec::new("test.wait")).unwrap();
    template.connect(start, DEFAULT_OUTPUT, wait, DEFAULT_INPUT).unwrap();
    template.connect(wait, DEFAULT_OUTPUT, after, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();
    subsystem.force_finish_node(NodeAddress::new(id, wait));

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(wait), Some(ActivationState::Completed));
    assert_eq!(instance.active_nodes(), vec![after]);
    let records = instance.output_records(wait, DEFAULT_OUTPUT);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].activation_type, flowcore::PinActivationType::Forced);

    // Only the downstream timer is left.
    assert_eq!(subsystem.active_timer_count(), 1);
}

#[test]
fn test_abort_active_flows_clears_everything() {
    init_tracing();
    let mut subsystem = FlowSubsystem::new(registry());
    let (template, _) = linear("tests/abort", "test.wait");
    let path = subsystem.register_template(template);
    subsystem.start_root_flow("a", &path).unwrap();
    subsystem.start_root_flow("b", &path).unwrap();

    subsystem.abort_active_flows();

    assert_eq!(subsystem.instance_count(), 0);
    assert_eq!(subsystem.active_timer_count(), 0);
    assert!(subsystem.active_templates().is_empty());
}

#[test]
fn test_retrigger_of_completed_node_starts_new_cycle() {
    init_tracing();
    let mut subsystem = FlowSubsystem::with_config(registry(), config());
    let mut template = GraphTemplate::new("tests/retrigger");
    let start = template.add_node(start_spec()).unwrap();
    let pass = template.add_node(NodeSpec::new("test.pass")).unwrap();
    template.connect(start, DEFAULT_OUTPUT, pass, DEFAULT_INPUT).unwrap();
    let path = subsystem.register_template(template);

    let id = subsystem.start_root_flow("player", &path).unwrap();
    subsystem.trigger_input(NodeAddress::new(id, pass), DEFAULT_INPUT);

    let instance = subsystem.instance(id).unwrap();
    assert_eq!(instance.node_state(pass), Some(ActivationState::Completed));
    assert_eq!(instance.input_records(pass, DEFAULT_INPUT).len(), 2);
    assert!(instance.active_nodes().is_empty());
}
