//! Live graph instances.

use crate::registry::NodeRegistry;
use flowcore::{
    ActivationState, EntryPoint, FlowNode, GraphTemplate, InstanceId, NodeAddress, NodeGuid, OwnerId,
    PinActivationType, PinRecord, TemplateError, TemplateRef, Value,
};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;

/// Runtime record of one template node.
pub(crate) struct NodeInstance {
    pub(crate) behavior: Box<dyn FlowNode>,
    pub(crate) state: ActivationState,
    pub(crate) preloaded: bool,
    pub(crate) input_records: HashMap<String, Vec<PinRecord>>,
    pub(crate) output_records: HashMap<String, Vec<PinRecord>>,
}

impl NodeInstance {
    fn new(behavior: Box<dyn FlowNode>) -> Self {
        Self {
            behavior,
            state: ActivationState::NeverActivated,
            preloaded: false,
            input_records: HashMap::new(),
            output_records: HashMap::new(),
        }
    }

    /// Move to `Active`, starting a new cycle if the previous one completed.
    pub(crate) fn activate(&mut self) {
        if self.state == ActivationState::Completed {
            self.state = ActivationState::NeverActivated;
        }
        if self.state.can_transition_to(ActivationState::Active) {
            self.state = ActivationState::Active;
        }
    }

    pub(crate) fn complete(&mut self) {
        if self.state.can_transition_to(ActivationState::Completed) {
            self.state = ActivationState::Completed;
        }
    }

    pub(crate) fn record_input(&mut self, pin: &str, time: f64) {
        self.input_records
            .entry(pin.to_string())
            .or_default()
            .push(PinRecord::new(time, PinActivationType::Default));
    }

    pub(crate) fn record_output(&mut self, pin: &str, time: f64, activation_type: PinActivationType) {
        self.output_records
            .entry(pin.to_string())
            .or_default()
            .push(PinRecord::new(time, activation_type));
    }

    pub(crate) fn reset_records(&mut self) {
        self.state = ActivationState::NeverActivated;
        self.input_records.clear();
        self.output_records.clear();
    }
}

/// One running copy of a [`GraphTemplate`].
///
/// Node behaviours are created per instance, keyed by the template node's guid.
/// Links to the parent flow and to child flows are ids into the subsystem's
/// instance table.
pub struct GraphInstance {
    pub(crate) id: InstanceId,
    pub(crate) name: String,
    pub(crate) template: Arc<GraphTemplate>,
    pub(crate) owner: Option<OwnerId>,
    pub(crate) owning_node: Option<NodeAddress>,
    pub(crate) nodes: IndexMap<NodeGuid, NodeInstance>,
    pub(crate) start_node: Option<NodeGuid>,
    pub(crate) custom_inputs: HashMap<String, NodeGuid>,
    pub(crate) active: IndexSet<NodeGuid>,
    pub(crate) recorded: IndexSet<NodeGuid>,
    pub(crate) preloaded: IndexSet<NodeGuid>,
    pub(crate) child_flows: IndexMap<NodeGuid, InstanceId>,
    pub(crate) properties: HashMap<String, Value>,
    pub(crate) started: bool,
    pub(crate) finishing: bool,
    pub(crate) completion_reported: bool,
    pub(crate) forcing: Option<NodeGuid>,
}

impl GraphInstance {
    pub(crate) fn new(
        id: InstanceId,
        name: String,
        template: Arc<GraphTemplate>,
        registry: &NodeRegistry,
    ) -> Result<Self, TemplateError> {
        let mut nodes = IndexMap::with_capacity(template.node_count());
        let mut start_nodes = Vec::new();
        let mut custom_inputs = HashMap::new();

        for spec in template.nodes() {
            let behavior = registry.create_node(spec)?;
            match behavior.entry_point() {
                Some(EntryPoint::Start) => start_nodes.push(spec.guid),
                Some(EntryPoint::CustomInput(event)) if !event.is_empty() => {
                    if custom_inputs.insert(event.clone(), spec.guid).is_some() {
                        tracing::warn!("Template {} has several custom inputs named '{}'", template.path, event);
                    }
                }
                _ => {}
            }
            nodes.insert(spec.guid, NodeInstance::new(behavior));
        }

        if start_nodes.len() > 1 {
            tracing::error!("Template {} has {} Start nodes", template.path, start_nodes.len());
            return Err(TemplateError::MultipleStartNodes {
                template: template.path.to_string(),
                count: start_nodes.len(),
            });
        }

        Ok(Self {
            id,
            name,
            properties: template.properties.clone(),
            template,
            owner: None,
            owning_node: None,
            nodes,
            start_node: start_nodes.first().copied(),
            custom_inputs,
            active: IndexSet::new(),
            recorded: IndexSet::new(),
            preloaded: IndexSet::new(),
            child_flows: IndexMap::new(),
            started: false,
            finishing: false,
            completion_reported: false,
            forcing: None,
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Arc<GraphTemplate> {
        &self.template
    }

    pub fn template_path(&self) -> &TemplateRef {
        &self.template.path
    }

    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }

    /// Sub-graph node in the parent instance that spawned this one.
    pub fn owning_node(&self) -> Option<NodeAddress> {
        self.owning_node
    }

    pub fn is_root(&self) -> bool {
        self.owning_node.is_none()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn start_node(&self) -> Option<NodeGuid> {
        self.start_node
    }

    pub fn custom_input_node(&self, event: &str) -> Option<NodeGuid> {
        self.custom_inputs.get(event).copied()
    }

    pub fn active_nodes(&self) -> Vec<NodeGuid> {
        self.active.iter().copied().collect()
    }

    pub fn recorded_nodes(&self) -> Vec<NodeGuid> {
        self.recorded.iter().copied().collect()
    }

    pub fn preloaded_nodes(&self) -> Vec<NodeGuid> {
        self.preloaded.iter().copied().collect()
    }

    pub fn is_node_active(&self, guid: NodeGuid) -> bool {
        self.active.contains(&guid)
    }

    pub fn node_state(&self, guid: NodeGuid) -> Option<ActivationState> {
        self.nodes.get(&guid).map(|n| n.state)
    }

    pub fn node_status(&self, guid: NodeGuid) -> Option<String> {
        self.nodes.get(&guid).and_then(|n| n.behavior.status())
    }

    pub fn node_type(&self, guid: NodeGuid) -> Option<&str> {
        self.nodes.get(&guid).map(|n| n.behavior.node_type())
    }

    /// Persisted fields of one node, as they would be written to a save.
    pub fn node_save_state(&self, guid: NodeGuid) -> Option<serde_json::Value> {
        self.nodes.get(&guid).and_then(|n| n.behavior.save_state().ok())
    }

    pub fn input_records(&self, guid: NodeGuid, pin: &str) -> &[PinRecord] {
        self.nodes
            .get(&guid)
            .and_then(|n| n.input_records.get(pin))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn output_records(&self, guid: NodeGuid, pin: &str) -> &[PinRecord] {
        self.nodes
            .get(&guid)
            .and_then(|n| n.output_records.get(pin))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Child flow spawned by the sub-graph node `guid`.
    pub fn child_flow(&self, guid: NodeGuid) -> Option<InstanceId> {
        self.child_flows.get(&guid).copied()
    }

    pub fn child_flows(&self) -> Vec<InstanceId> {
        self.child_flows.values().copied().collect()
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    pub(crate) fn node_address(&self, guid: NodeGuid) -> NodeAddress {
        NodeAddress::new(self.id, guid)
    }

    /// Return every recorded node to `NeverActivated` and forget its pin history.
    pub(crate) fn reset_nodes(&mut self) {
        for guid in self.recorded.drain(..) {
            if let Some(node) = self.nodes.get_mut(&guid) {
                node.reset_records();
            }
        }
        self.completion_reported = false;
    }
}
