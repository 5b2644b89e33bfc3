use crate::events::{EventBus, EventEmitter};
use crate::timer::{TimerHandle, TimerManager};
use crate::{NodeError, NodeGuid, NodeSpec, TemplateRef};
use crate::pin::FlowPin;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type InstanceId = Uuid;

/// One node inside one live graph instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub instance: InstanceId,
    pub node: NodeGuid,
}

impl NodeAddress {
    pub fn new(instance: InstanceId, node: NodeGuid) -> Self {
        Self { instance, node }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.node)
    }
}

/// External owner of a root flow (an actor, a level, an editor session...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(name: &str) -> Self {
        OwnerId(name.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(name: String) -> Self {
        OwnerId(name)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationState {
    #[default]
    NeverActivated,
    Active,
    Completed,
}

impl ActivationState {
    /// Legal moves of one activation cycle. Leaving `Completed` needs a reset first.
    pub fn can_transition_to(self, next: ActivationState) -> bool {
        matches!(
            (self, next),
            (ActivationState::NeverActivated, ActivationState::Active)
                | (ActivationState::Active, ActivationState::Completed)
        )
    }
}

/// How a graph instance is torn down. The teardown itself is identical; the
/// policy tells listeners whether the work done by the flow should stick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FinishPolicy {
    #[default]
    Keep,
    Abort,
}

/// Ways into a graph instance besides pin connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    Start,
    CustomInput(String),
}

/// Requests a node hook leaves for the runtime.
///
/// Commands are applied in the order they were pushed, right after the hook
/// returns and inside the same call chain.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCommand {
    TriggerOutput { pin: String, finish: bool },
    Finish,
    CreateSubFlow { template: TemplateRef, preload_only: bool },
    RemoveSubFlow { policy: FinishPolicy },
    LoadSubFlow { template: TemplateRef, instance_name: String },
    /// Fire a custom input on the child flow spawned by this node.
    TriggerCustomEvent { event: String },
    /// Fire a named output on the sub-graph node that owns this flow.
    TriggerCustomOutput { event: String },
    Checkpoint,
}

/// Behaviour of one node type.
///
/// Instances are created per graph instance by a node factory and never shared.
/// Every hook gets a [`NodeContext`] through which it triggers outputs,
/// finishes, arms timers and reports diagnostics.
pub trait FlowNode: Send {
    /// Unique type identifier (e.g., "route.sequence", "operator.and")
    fn node_type(&self) -> &str;

    /// Called once when the owning graph instance is created.
    fn initialize_instance(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Called when an input pin is triggered. Defaults to pass-through.
    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.trigger_first_output(true);
    }

    /// Reset per-activation state. Runs on every finish and on forced teardown.
    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_force_finished(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.trigger_first_output(true);
    }

    fn can_preload(&self) -> bool {
        false
    }

    fn preload_content(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn flush_content(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn on_timer(&mut self, _ctx: &mut NodeContext<'_>, _timer: TimerHandle) {}

    /// Capture derived state right before [`save_state`](Self::save_state).
    fn on_save(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Restore live behaviour right after [`load_state`](Self::load_state).
    fn on_load(&mut self, _ctx: &mut NodeContext<'_>) {}

    /// Persisted fields of this node.
    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        Ok(serde_json::Value::Null)
    }

    fn load_state(&mut self, _data: serde_json::Value) -> Result<(), NodeError> {
        Ok(())
    }

    fn entry_point(&self) -> Option<EntryPoint> {
        None
    }

    /// Reaching this node finishes the graph, or returns control to the parent.
    fn is_flow_finish(&self) -> bool {
        false
    }

    /// Short runtime status for inspection, e.g. remaining time.
    fn status(&self) -> Option<String> {
        None
    }
}

/// Execution context passed to each node hook
pub struct NodeContext<'a> {
    address: NodeAddress,
    spec: &'a NodeSpec,
    template: &'a TemplateRef,
    timers: &'a mut TimerManager,
    events: &'a EventBus,
    sub_flow: Option<&'a str>,
    commands: Vec<NodeCommand>,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        address: NodeAddress,
        spec: &'a NodeSpec,
        template: &'a TemplateRef,
        timers: &'a mut TimerManager,
        events: &'a EventBus,
        sub_flow: Option<&'a str>,
    ) -> Self {
        Self {
            address,
            spec,
            template,
            timers,
            events,
            sub_flow,
            commands: Vec::new(),
        }
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn guid(&self) -> NodeGuid {
        self.address.node
    }

    pub fn instance_id(&self) -> InstanceId {
        self.address.instance
    }

    pub fn spec(&self) -> &NodeSpec {
        self.spec
    }

    pub fn template(&self) -> &TemplateRef {
        self.template
    }

    pub fn inputs(&self) -> &[FlowPin] {
        &self.spec.inputs
    }

    pub fn outputs(&self) -> &[FlowPin] {
        &self.spec.outputs
    }

    pub fn trigger_output(&mut self, pin: impl Into<String>, finish: bool) {
        self.commands.push(NodeCommand::TriggerOutput {
            pin: pin.into(),
            finish,
        });
    }

    /// Trigger the first declared output; a node without outputs just finishes if asked to.
    pub fn trigger_first_output(&mut self, finish: bool) {
        match self.spec.first_output() {
            Some(pin) => {
                let pin = pin.name.clone();
                self.trigger_output(pin, finish);
            }
            None if finish => self.finish(),
            None => {}
        }
    }

    pub fn finish(&mut self) {
        self.commands.push(NodeCommand::Finish);
    }

    pub fn now(&self) -> f64 {
        self.timers.now()
    }

    pub fn set_timer(&mut self, seconds: f64, looping: bool) -> TimerHandle {
        self.timers.set_timer(self.address, seconds, looping)
    }

    pub fn set_timer_with_delay(&mut self, first_delay: f64, interval: f64, looping: bool) -> TimerHandle {
        self.timers
            .set_timer_with_delay(self.address, first_delay, interval, looping)
    }

    pub fn set_timer_for_next_tick(&mut self) -> TimerHandle {
        self.timers.set_timer_for_next_tick(self.address)
    }

    pub fn clear_timer(&mut self, handle: TimerHandle) {
        self.timers.clear(handle);
    }

    pub fn timer_remaining(&self, handle: TimerHandle) -> Option<f64> {
        self.timers.remaining(handle)
    }

    pub fn timer_elapsed(&self, handle: TimerHandle) -> Option<f64> {
        self.timers.elapsed(handle)
    }

    pub fn create_sub_flow(&mut self, template: TemplateRef) {
        self.commands.push(NodeCommand::CreateSubFlow {
            template,
            preload_only: false,
        });
    }

    pub fn preload_sub_flow(&mut self, template: TemplateRef) {
        self.commands.push(NodeCommand::CreateSubFlow {
            template,
            preload_only: true,
        });
    }

    pub fn remove_sub_flow(&mut self, policy: FinishPolicy) {
        self.commands.push(NodeCommand::RemoveSubFlow { policy });
    }

    pub fn load_sub_flow(&mut self, template: TemplateRef, instance_name: impl Into<String>) {
        self.commands.push(NodeCommand::LoadSubFlow {
            template,
            instance_name: instance_name.into(),
        });
    }

    /// Instance name of the child flow this node currently owns.
    pub fn sub_flow_instance_name(&self) -> Option<&str> {
        self.sub_flow
    }

    pub fn trigger_custom_event(&mut self, event: impl Into<String>) {
        self.commands.push(NodeCommand::TriggerCustomEvent { event: event.into() });
    }

    pub fn trigger_custom_output(&mut self, event: impl Into<String>) {
        self.commands.push(NodeCommand::TriggerCustomOutput { event: event.into() });
    }

    pub fn request_checkpoint(&mut self) {
        self.commands.push(NodeCommand::Checkpoint);
    }

    pub fn emitter(&self) -> EventEmitter {
        self.events
            .create_emitter(self.address.instance, self.template.clone(), Some(self.address.node))
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.emitter().error(message);
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.emitter().warn(message);
    }

    pub fn log_note(&self, message: impl Into<String>) {
        self.emitter().note(message);
    }

    pub fn commands(&self) -> &[NodeCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<NodeCommand> {
        self.commands
    }
}
