//! Activation dispatch.
//!
//! Every trigger is one synchronous call chain: an input runs the node's hook,
//! the commands the hook left behind are applied in order, and each triggered
//! output recurses into the next node's input before the following command runs.

use crate::subsystem::FlowSubsystem;
use chrono::Utc;
use flowcore::{
    ActivationState, EventEmitter, ExecutionEvent, FinishPolicy, FlowNode, InstanceId, NodeAddress, NodeCommand,
    NodeContext, NodeGuid, PinActivationType, TemplateError, TemplateRef,
};
use indexmap::IndexSet;

impl FlowSubsystem {
    /// Run `f` against the behaviour of the node at `address` and return the commands it left.
    pub(crate) fn with_node<F>(&mut self, address: NodeAddress, f: F) -> Option<Vec<NodeCommand>>
    where
        F: FnOnce(&mut Box<dyn FlowNode>, &mut NodeContext<'_>),
    {
        let sub_flow_name = self
            .instances
            .get(&address.instance)?
            .child_flow(address.node)
            .and_then(|child| self.instances.get(&child))
            .map(|child| child.name.clone());

        let instance = self.instances.get_mut(&address.instance)?;
        let template = instance.template.clone();
        let spec = template.node(address.node)?;
        let node = instance.nodes.get_mut(&address.node)?;

        let mut ctx = NodeContext::new(
            address,
            spec,
            &template.path,
            &mut self.timers,
            &self.events,
            sub_flow_name.as_deref(),
        );
        f(&mut node.behavior, &mut ctx);
        Some(ctx.into_commands())
    }

    pub(crate) fn apply_commands(&mut self, address: NodeAddress, commands: Vec<NodeCommand>) {
        for command in commands {
            match command {
                NodeCommand::TriggerOutput { pin, finish } => self.trigger_output(address, &pin, finish),
                NodeCommand::Finish => self.finish_node(address),
                NodeCommand::CreateSubFlow { template, preload_only } => {
                    self.create_sub_flow(address, &template, preload_only)
                }
                NodeCommand::RemoveSubFlow { policy } => self.remove_sub_flow(address, policy),
                NodeCommand::LoadSubFlow { template, instance_name } => {
                    self.load_sub_flow(address, &template, &instance_name)
                }
                NodeCommand::TriggerCustomEvent { event } => self.trigger_sub_flow_event(address, &event),
                NodeCommand::TriggerCustomOutput { event } => self.trigger_custom_output(address.instance, &event),
                NodeCommand::Checkpoint => self.checkpoint(address),
            }
        }
    }

    fn run_hook<F>(&mut self, address: NodeAddress, f: F)
    where
        F: FnOnce(&mut Box<dyn FlowNode>, &mut NodeContext<'_>),
    {
        if let Some(commands) = self.with_node(address, f) {
            self.apply_commands(address, commands);
        }
    }

    /// Diagnostics channel of the node at `address`.
    pub(crate) fn emitter(&self, address: NodeAddress) -> EventEmitter {
        let template = self
            .instances
            .get(&address.instance)
            .map(|i| i.template_path().clone())
            .unwrap_or_else(|| TemplateRef::new(""));
        self.events
            .create_emitter(address.instance, template, Some(address.node))
    }

    pub(crate) fn initialize_node(&mut self, address: NodeAddress) {
        self.run_hook(address, |node, ctx| node.initialize_instance(ctx));
    }

    /// Mark a node active and recorded. Returns false if the node cannot be activated.
    fn activate_node(&mut self, address: NodeAddress, pin: Option<&str>) -> bool {
        let record = self.config.record_pin_activations;
        let now = self.timers.now();

        let Some(instance) = self.instances.get_mut(&address.instance) else {
            return false;
        };
        if instance.finishing {
            tracing::debug!("Ignoring trigger of {} while its flow finishes", address);
            return false;
        }
        let Some(node) = instance.nodes.get_mut(&address.node) else {
            tracing::debug!("Ignoring trigger of unknown node {}", address);
            return false;
        };

        node.activate();
        if let (true, Some(pin)) = (record, pin) {
            node.record_input(pin, now);
        }
        let node_type = node.behavior.node_type().to_string();
        instance.active.insert(address.node);
        instance.recorded.insert(address.node);

        tracing::debug!("Activating {} ({}) on '{}'", address, node_type, pin.unwrap_or_default());
        self.events.emit(ExecutionEvent::NodeActivated {
            instance_id: address.instance,
            node_guid: address.node,
            node_type,
            pin: pin.unwrap_or_default().to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Trigger input `pin` of the node at `address`.
    ///
    /// Unknown nodes are ignored, so a link to a removed node simply ends the signal.
    ///
    /// An undeclared pin is recorded but never reaches the node's own logic. A node
    /// it activates passes through, one that was already active is left alone.
    pub fn trigger_input(&mut self, address: NodeAddress, pin: &str) {
        let was_active = self.is_node_active(address);
        if !self.activate_node(address, Some(pin)) {
            return;
        }

        let valid = self
            .instances
            .get(&address.instance)
            .and_then(|i| i.template.node(address.node))
            .is_some_and(|spec| spec.has_input(pin));
        if valid {
            self.run_hook(address, |node, ctx| node.execute_input(ctx, pin));
            return;
        }

        self.emitter(address)
            .error(format!("Input pin '{}' is not declared on this node", pin));
        if !was_active {
            self.run_hook(address, |_, ctx| ctx.trigger_first_output(true));
        }
    }

    /// Record output `pin`, finish the node if asked, then follow the pin's link.
    pub(crate) fn trigger_output(&mut self, address: NodeAddress, pin: &str, finish: bool) {
        let record = self.config.record_pin_activations;
        let now = self.timers.now();

        let Some(instance) = self.instances.get_mut(&address.instance) else {
            return;
        };
        let Some(spec) = instance.template.node(address.node) else {
            return;
        };
        let declared = spec.has_output(pin);
        let connection = spec.connection(pin).cloned();
        let activation_type = if instance.forcing == Some(address.node) {
            PinActivationType::Forced
        } else {
            PinActivationType::Default
        };
        if record {
            if let Some(node) = instance.nodes.get_mut(&address.node) {
                node.record_output(pin, now, activation_type);
            }
        }

        if !declared {
            self.emitter(address)
                .error(format!("Output pin '{}' is not declared on this node", pin));
        }
        self.events.emit(ExecutionEvent::OutputTriggered {
            instance_id: address.instance,
            node_guid: address.node,
            pin: pin.to_string(),
            timestamp: Utc::now(),
        });

        if finish {
            self.finish_node(address);
        }

        if let Some(connection) = connection {
            self.trigger_input(NodeAddress::new(address.instance, connection.node_guid), &connection.pin_name);
        }
    }

    /// Clean up an active node and take it out of the active set.
    ///
    /// Finishing a flow-finish node ends the flow, or hands control back to the
    /// parent sub-graph node if this flow is a child.
    pub(crate) fn finish_node(&mut self, address: NodeAddress) {
        let Some(instance) = self.instances.get(&address.instance) else {
            return;
        };
        if instance.finishing || instance.node_state(address.node) != Some(ActivationState::Active) {
            return;
        }

        self.run_hook(address, |node, ctx| node.cleanup(ctx));

        let Some(instance) = self.instances.get_mut(&address.instance) else {
            return;
        };
        let Some(node) = instance.nodes.get_mut(&address.node) else {
            return;
        };
        node.complete();
        let is_flow_finish = node.behavior.is_flow_finish();
        instance.active.shift_remove(&address.node);

        self.events.emit(ExecutionEvent::NodeFinished {
            instance_id: address.instance,
            node_guid: address.node,
            timestamp: Utc::now(),
        });

        if !is_flow_finish {
            return;
        }

        let owning_node = instance.owning_node;
        match owning_node {
            Some(parent) => {
                if instance.completion_reported {
                    return;
                }
                instance.completion_reported = true;
                tracing::debug!("Sub flow {} reached its finish, returning to {}", address.instance, parent);
                self.finish_sub_graph_node(parent);
            }
            None => self.finish_flow(address.instance, FinishPolicy::Keep),
        }
    }

    /// Terminate an active node now. Its force-finish hook decides what runs downstream.
    pub fn force_finish_node(&mut self, address: NodeAddress) {
        let Some(instance) = self.instances.get_mut(&address.instance) else {
            return;
        };
        if !instance.is_node_active(address.node) {
            tracing::debug!("Force finish of inactive node {} ignored", address);
            return;
        }

        instance.forcing = Some(address.node);
        self.run_hook(address, |node, ctx| node.on_force_finished(ctx));
        if let Some(instance) = self.instances.get_mut(&address.instance) {
            if instance.forcing == Some(address.node) {
                instance.forcing = None;
            }
        }

        if self.is_node_active(address) {
            self.finish_node(address);
        }
    }

    /// Activate an entry node and fire its first output.
    fn activate_entry(&mut self, address: NodeAddress) {
        if self.activate_node(address, None) {
            self.run_hook(address, |_, ctx| ctx.trigger_first_output(true));
        }
    }

    /// Reset node records and fire the Start node.
    pub(crate) fn start_flow(&mut self, id: InstanceId) -> Result<(), TemplateError> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| TemplateError::Invalid(format!("instance {} is gone", id)))?;
        instance.reset_nodes();
        instance.started = true;

        let Some(start) = instance.start_node else {
            tracing::error!("Cannot start {}: template has no Start node", instance.template_path());
            return Err(TemplateError::MissingStartNode(instance.template_path().to_string()));
        };

        tracing::info!("Starting flow {} ({})", instance.name, instance.template_path());
        self.events.emit(ExecutionEvent::FlowStarted {
            instance_id: id,
            template: instance.template_path().clone(),
            instance_name: instance.name.clone(),
            root: instance.is_root(),
            timestamp: Utc::now(),
        });

        self.activate_entry(NodeAddress::new(id, start));
        Ok(())
    }

    /// Fire the custom input node named `event` of an instance.
    pub fn trigger_custom_event(&mut self, instance: InstanceId, event: &str) {
        let Some(target) = self.instances.get(&instance) else {
            tracing::debug!("Custom event '{}' for missing instance {}", event, instance);
            return;
        };
        match target.custom_input_node(event) {
            Some(guid) => self.activate_entry(NodeAddress::new(instance, guid)),
            None => self
                .events
                .create_emitter(instance, target.template_path().clone(), None)
                .warn(format!("No custom input named '{}'", event)),
        }
    }

    /// Tear an instance down: children first, then still-active nodes, then preloads.
    pub fn finish_flow(&mut self, id: InstanceId, policy: FinishPolicy) {
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };
        if instance.finishing {
            return;
        }
        instance.finishing = true;
        let children = instance.child_flows();
        tracing::info!("Finishing flow {} ({:?})", instance.name, policy);

        for child in children {
            self.finish_flow(child, policy);
        }

        let active: Vec<NodeGuid> = self
            .instances
            .get(&id)
            .map(|i| i.active_nodes())
            .unwrap_or_default();
        for guid in active {
            let address = NodeAddress::new(id, guid);
            self.run_hook(address, |node, ctx| node.cleanup(ctx));
            if let Some(instance) = self.instances.get_mut(&id) {
                if let Some(node) = instance.nodes.get_mut(&guid) {
                    node.complete();
                }
                instance.active.shift_remove(&guid);
            }
        }

        self.flush_preload(id);
        self.timers.clear_instance(id);

        let Some(instance) = self.instances.shift_remove(&id) else {
            return;
        };
        if let Some(parent) = instance.owning_node {
            if let Some(owner) = self.instances.get_mut(&parent.instance) {
                if owner.child_flows.get(&parent.node) == Some(&id) {
                    owner.child_flows.shift_remove(&parent.node);
                }
            }
        }
        self.unregister_instance(instance.template_path(), id);

        self.events.emit(ExecutionEvent::FlowFinished {
            instance_id: id,
            template: instance.template_path().clone(),
            root: instance.is_root(),
            policy,
            timestamp: Utc::now(),
        });
    }

    /// Warm the content of nodes close enough to the entry points.
    ///
    /// Each node type is preloaded up to its configured link distance from the
    /// Start node or any custom input. Already preloaded nodes are skipped.
    pub fn preload_nodes(&mut self, id: InstanceId) {
        let Some(instance) = self.instances.get(&id) else {
            return;
        };
        let graph = instance.template.connection_graph();
        let entries: Vec<NodeGuid> = instance
            .start_node
            .into_iter()
            .chain(instance.custom_inputs.values().copied())
            .collect();

        let mut targets = IndexSet::new();
        for entry in entries {
            for (guid, distance) in graph.distances_from(entry) {
                let Some(node) = instance.nodes.get(&guid) else {
                    continue;
                };
                if node.preloaded || !node.behavior.can_preload() {
                    continue;
                }
                let in_range = self
                    .config
                    .preload_depth_for(node.behavior.node_type())
                    .map_or(true, |depth| distance <= depth);
                if in_range {
                    targets.insert(guid);
                }
            }
        }

        for guid in targets {
            let address = NodeAddress::new(id, guid);
            match self.instances.get_mut(&id).and_then(|i| i.nodes.get_mut(&guid)) {
                Some(node) if !node.preloaded => node.preloaded = true,
                _ => continue,
            }
            if let Some(instance) = self.instances.get_mut(&id) {
                instance.preloaded.insert(guid);
            }
            tracing::debug!("Preloading {}", address);
            self.run_hook(address, |node, ctx| node.preload_content(ctx));
        }
    }

    /// Flush every preloaded node of an instance. Safe on instances that never preloaded.
    pub fn flush_preload(&mut self, id: InstanceId) {
        let preloaded: Vec<NodeGuid> = match self.instances.get_mut(&id) {
            Some(instance) => instance.preloaded.drain(..).collect(),
            None => return,
        };
        for guid in preloaded {
            let address = NodeAddress::new(id, guid);
            if let Some(node) = self.instances.get_mut(&id).and_then(|i| i.nodes.get_mut(&guid)) {
                node.preloaded = false;
            }
            self.run_hook(address, |node, ctx| node.flush_content(ctx));
        }
    }

    /// Advance the clock and run every timer that became due.
    pub fn tick(&mut self, delta_seconds: f64) {
        self.timers.advance(delta_seconds);
        while let Some((handle, owner)) = self.timers.pop_due() {
            if !self.is_node_active(owner) {
                tracing::debug!("Dropping timer of inactive node {}", owner);
                continue;
            }
            self.run_hook(owner, |node, ctx| node.on_timer(ctx, handle));
        }
    }
}
