use crate::codec;
use crate::config::{RuntimeConfig, SubFlowRestartPolicy};
use crate::instance::GraphInstance;
use crate::loader::{load_template_tree, TemplateSource};
use crate::registry::NodeRegistry;
use crate::store::SaveStore;
use flowcore::{
    ActivationState, EventBus, ExecutionEvent, FinishPolicy, FlowError, FlowSaveData, GraphTemplate, InstanceError,
    InstanceId, NodeAddress, NodeGuid, OwnerId, TemplateError, TemplateRef, TimerManager, Value,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Live instances of one template, in creation order.
#[derive(Debug, Default)]
struct TemplateInstances {
    instances: Vec<InstanceId>,
    inspected: Option<InstanceId>,
}

/// Process-wide manager of graph instances.
///
/// Owns every live instance, the template cache, the timer clock and the
/// diagnostics bus. External code starts and stops root flows here; nodes
/// reach the same object through the commands they leave on their context.
pub struct FlowSubsystem {
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) timers: TimerManager,
    pub(crate) instances: IndexMap<InstanceId, GraphInstance>,
    templates: HashMap<TemplateRef, Arc<GraphTemplate>>,
    /// Templates that came from the source and may be released when unused.
    loaded_templates: HashSet<TemplateRef>,
    template_instances: HashMap<TemplateRef, TemplateInstances>,
    instance_counters: HashMap<TemplateRef, u32>,
    source: Option<Arc<dyn TemplateSource>>,
    pub(crate) save_store: Option<Box<dyn SaveStore>>,
    pub(crate) loaded_save: Option<FlowSaveData>,
}

impl FlowSubsystem {
    /// Create a new subsystem with default settings
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    /// Create a new subsystem with custom configuration
    pub fn with_config(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            config,
            registry,
            events,
            timers: TimerManager::new(),
            instances: IndexMap::new(),
            templates: HashMap::new(),
            loaded_templates: HashSet::new(),
            template_instances: HashMap::new(),
            instance_counters: HashMap::new(),
            source: None,
            save_store: None,
            loaded_save: None,
        }
    }

    pub fn with_template_source(mut self, source: Arc<dyn TemplateSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_save_store(mut self, store: Box<dyn SaveStore>) -> Self {
        self.save_store = Some(store);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn save_store(&self) -> Option<&dyn SaveStore> {
        self.save_store.as_deref()
    }

    /// Seconds of simulated time since the subsystem was created.
    pub fn now(&self) -> f64 {
        self.timers.now()
    }

    pub fn active_timer_count(&self) -> usize {
        self.timers.active_count()
    }

    // ---- templates ----

    /// Put a template in the cache. Registered templates are never released.
    pub fn register_template(&mut self, template: GraphTemplate) -> TemplateRef {
        let path = template.path.clone();
        tracing::debug!("Registering template {}", path);
        self.loaded_templates.remove(&path);
        self.templates.insert(path.clone(), Arc::new(template));
        path
    }

    pub fn template(&self, path: &TemplateRef) -> Option<&Arc<GraphTemplate>> {
        self.templates.get(path)
    }

    pub fn is_template_loaded(&self, path: &TemplateRef) -> bool {
        self.templates.contains_key(path)
    }

    /// Resolve a template from the cache, falling back to a blocking load from the source.
    pub fn load_template(&mut self, path: &TemplateRef) -> Result<Arc<GraphTemplate>, TemplateError> {
        if path.is_empty() {
            return Err(TemplateError::NotFound(String::new()));
        }
        if let Some(template) = self.templates.get(path) {
            return Ok(Arc::clone(template));
        }

        let source = self
            .source
            .clone()
            .ok_or_else(|| TemplateError::NotFound(path.to_string()))?;
        let mut template = source.load_blocking(path)?;
        template.path = path.clone();
        tracing::info!("Loaded template {}", path);
        Ok(self.cache_loaded(template))
    }

    /// Load a template and, concurrently, every template reachable through sub-graph nodes.
    pub async fn load_template_tree(&mut self, root: &TemplateRef) -> Result<Arc<GraphTemplate>, TemplateError> {
        if let Some(source) = self.source.clone() {
            let cached: HashSet<TemplateRef> = self.templates.keys().cloned().collect();
            let loaded = load_template_tree(source.as_ref(), &self.registry, root, &cached).await?;
            for template in loaded {
                self.cache_loaded(template);
            }
        }
        self.templates
            .get(root)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(root.to_string()))
    }

    fn cache_loaded(&mut self, template: GraphTemplate) -> Arc<GraphTemplate> {
        let path = template.path.clone();
        let template = Arc::new(template);
        self.loaded_templates.insert(path.clone());
        self.templates.insert(path, Arc::clone(&template));
        template
    }

    /// A template is active while at least one instance of it is alive.
    pub fn is_template_active(&self, path: &TemplateRef) -> bool {
        self.template_instances.contains_key(path)
    }

    pub fn active_templates(&self) -> Vec<TemplateRef> {
        self.template_instances.keys().cloned().collect()
    }

    fn register_instance(&mut self, path: &TemplateRef, id: InstanceId) {
        let entry = self.template_instances.entry(path.clone()).or_default();
        entry.instances.push(id);
        if entry.inspected.is_none() {
            entry.inspected = Some(id);
        }
    }

    pub(crate) fn unregister_instance(&mut self, path: &TemplateRef, id: InstanceId) {
        let Some(entry) = self.template_instances.get_mut(path) else {
            return;
        };
        entry.instances.retain(|i| *i != id);
        if entry.inspected == Some(id) {
            entry.inspected = None;
        }
        if !entry.instances.is_empty() {
            return;
        }

        self.template_instances.remove(path);
        if self.config.release_unused_templates && self.loaded_templates.remove(path) {
            tracing::debug!("Releasing unused template {}", path);
            self.templates.remove(path);
        }
    }

    /// Next `<template name>_<n>` that no live instance uses.
    fn next_instance_name(&mut self, template: &GraphTemplate) -> String {
        loop {
            let counter = self.instance_counters.entry(template.path.clone()).or_insert(0);
            *counter += 1;
            let name = format!("{}_{}", template.name, counter);
            if self.find_instance_by_name(&name).is_none() {
                return name;
            }
        }
    }

    /// Move the naming counter past a name restored from a save.
    fn reserve_instance_name(&mut self, template: &GraphTemplate, name: &str) {
        let restored = name
            .strip_prefix(template.name.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(n) = restored {
            let counter = self.instance_counters.entry(template.path.clone()).or_insert(0);
            *counter = (*counter).max(n);
        }
    }

    // ---- inspection ----

    pub fn instance(&self, id: InstanceId) -> Option<&GraphInstance> {
        self.instances.get(&id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &GraphInstance> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn root_instances(&self) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.is_root())
            .map(|i| i.id)
            .collect()
    }

    pub fn find_instance_by_name(&self, name: &str) -> Option<InstanceId> {
        self.instances.values().find(|i| i.name == name).map(|i| i.id)
    }

    /// Live instances of `template`, oldest first.
    pub fn template_instances(&self, template: &TemplateRef) -> Vec<InstanceId> {
        self.template_instances
            .get(template)
            .map(|e| e.instances.clone())
            .unwrap_or_default()
    }

    pub fn instance_display_names(&self, template: &TemplateRef) -> Vec<String> {
        self.template_instances(template)
            .into_iter()
            .filter_map(|id| self.instances.get(&id))
            .map(|i| i.name.clone())
            .collect()
    }

    pub fn inspected_instance(&self, template: &TemplateRef) -> Option<InstanceId> {
        self.template_instances.get(template).and_then(|e| e.inspected)
    }

    /// Select the instance shown by inspection tools. An unknown name clears the selection.
    pub fn set_inspected_instance(&mut self, template: &TemplateRef, name: &str) -> bool {
        let found = self
            .template_instances(template)
            .into_iter()
            .find(|id| self.instances.get(id).is_some_and(|i| i.name == name));
        match self.template_instances.get_mut(template) {
            Some(entry) => {
                entry.inspected = found;
                found.is_some()
            }
            None => false,
        }
    }

    pub fn node_state(&self, address: NodeAddress) -> Option<ActivationState> {
        self.instances.get(&address.instance)?.node_state(address.node)
    }

    pub fn node_status(&self, address: NodeAddress) -> Option<String> {
        self.instances.get(&address.instance)?.node_status(address.node)
    }

    pub fn is_node_active(&self, address: NodeAddress) -> bool {
        self.instances
            .get(&address.instance)
            .is_some_and(|i| i.is_node_active(address.node))
    }

    pub fn child_flow(&self, address: NodeAddress) -> Option<InstanceId> {
        self.instances.get(&address.instance)?.child_flow(address.node)
    }

    pub fn property(&self, instance: InstanceId, key: &str) -> Option<&Value> {
        self.instances.get(&instance)?.property(key)
    }

    pub fn set_property(
        &mut self,
        instance: InstanceId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), InstanceError> {
        let instance = self
            .instances
            .get_mut(&instance)
            .ok_or(InstanceError::NotFound(instance))?;
        instance.properties.insert(key.into(), value.into());
        Ok(())
    }

    // ---- root flows ----

    /// Create an instance of `template` for `owner` and start it.
    ///
    /// Starting the same template twice for one owner returns the running instance.
    pub fn start_root_flow(&mut self, owner: impl Into<OwnerId>, template: &TemplateRef) -> Result<InstanceId, FlowError> {
        let owner = owner.into();
        let id = self.create_root_flow(owner, template, None)?;
        if self.instances.get(&id).is_some_and(|i| i.started) {
            return Ok(id);
        }

        if let Err(e) = self.start_flow(id) {
            self.finish_flow(id, FinishPolicy::Abort);
            return Err(e.into());
        }
        Ok(id)
    }

    pub(crate) fn create_root_flow(
        &mut self,
        owner: OwnerId,
        template: &TemplateRef,
        instance_name: Option<String>,
    ) -> Result<InstanceId, FlowError> {
        if let Some(existing) = self.find_root_flow(&owner, template) {
            tracing::warn!(
                "Attempted to start flow {} for owner {} which already runs it",
                template,
                owner
            );
            return Ok(existing);
        }

        let template = self.load_template(template)?;
        if !self.config.allow_multiple_instances && self.is_template_active(&template.path) {
            tracing::warn!("Refusing to start second instance of {}", template.path);
            return Err(InstanceError::SingleInstance(template.path.to_string()).into());
        }

        Ok(self.create_instance(template, Some(owner), None, instance_name)?)
    }

    pub fn find_root_flow(&self, owner: &OwnerId, template: &TemplateRef) -> Option<InstanceId> {
        self.instances
            .values()
            .find(|i| i.is_root() && i.owner.as_ref() == Some(owner) && i.template_path() == template)
            .map(|i| i.id)
    }

    /// Finish every root flow of `template` owned by `owner`, together with their children.
    pub fn finish_root_flow(&mut self, owner: &OwnerId, template: &TemplateRef, policy: FinishPolicy) {
        let roots: Vec<InstanceId> = self
            .instances
            .values()
            .filter(|i| i.is_root() && i.owner.as_ref() == Some(owner) && i.template_path() == template)
            .map(|i| i.id)
            .collect();
        for id in roots {
            self.finish_flow(id, policy);
        }
    }

    /// Tear every root flow down, children first.
    pub fn abort_active_flows(&mut self) {
        for id in self.root_instances() {
            self.finish_flow(id, FinishPolicy::Abort);
        }
    }

    pub(crate) fn create_instance(
        &mut self,
        template: Arc<GraphTemplate>,
        owner: Option<OwnerId>,
        owning_node: Option<NodeAddress>,
        instance_name: Option<String>,
    ) -> Result<InstanceId, TemplateError> {
        let id = Uuid::new_v4();
        let name = match instance_name {
            Some(name) => {
                self.reserve_instance_name(&template, &name);
                name
            }
            None => self.next_instance_name(&template),
        };
        let path = template.path.clone();

        let mut instance = GraphInstance::new(id, name, template, &self.registry)?;
        instance.owner = owner;
        instance.owning_node = owning_node;
        let guids: Vec<NodeGuid> = instance.nodes.keys().copied().collect();

        tracing::debug!("Created instance {} ({}) of {}", instance.name, id, path);
        self.instances.insert(id, instance);
        self.register_instance(&path, id);

        for guid in guids {
            self.initialize_node(NodeAddress::new(id, guid));
        }
        Ok(id)
    }

    // ---- sub flows ----

    /// Create, or start a preloaded, child flow of the sub-graph node at `node`.
    pub(crate) fn create_sub_flow(&mut self, node: NodeAddress, template: &TemplateRef, preload_only: bool) {
        let Some(parent) = self.instances.get(&node.instance) else {
            return;
        };
        if parent.finishing {
            return;
        }

        if let Some(child_id) = parent.child_flow(node.node) {
            let child_started = self.instances.get(&child_id).is_some_and(|c| c.started);
            if preload_only {
                return;
            }
            if !child_started {
                self.start_sub_flow(child_id);
                return;
            }
            match self.config.sub_flow_restart {
                SubFlowRestartPolicy::Reject => {
                    self.emitter(node).warn("Sub-graph already owns a running child flow, ignoring start");
                    return;
                }
                SubFlowRestartPolicy::Replace => {
                    tracing::debug!("Replacing child flow {} of {}", child_id, node);
                    self.finish_flow(child_id, FinishPolicy::Abort);
                }
            }
        }

        let resolved = self.load_template(template);
        let owner = self.instances.get(&node.instance).and_then(|p| p.owner.clone());
        let created = resolved.and_then(|t| self.create_instance(t, owner, Some(node), None));
        let child_id = match created {
            Ok(id) => id,
            Err(e) => {
                self.emitter(node)
                    .error(format!("Failed to create sub flow {}: {}", template, e));
                self.finish_sub_graph_node(node);
                return;
            }
        };

        if let Some(parent) = self.instances.get_mut(&node.instance) {
            parent.child_flows.insert(node.node, child_id);
        }

        if preload_only {
            self.preload_nodes(child_id);
        } else {
            self.start_sub_flow(child_id);
        }
    }

    pub(crate) fn start_sub_flow(&mut self, child: InstanceId) {
        let Some(instance) = self.instances.get(&child) else {
            return;
        };
        let owning_node = instance.owning_node;
        if let Err(e) = self.start_flow(child) {
            if let Some(node) = owning_node {
                self.emitter(node).error(format!("Failed to start sub flow: {}", e));
                self.finish_flow(child, FinishPolicy::Abort);
                self.finish_sub_graph_node(node);
            }
        }
    }

    /// Trigger a sub-graph node's first output and finish it, as if its child completed.
    pub(crate) fn finish_sub_graph_node(&mut self, node: NodeAddress) {
        if let Some(commands) = self.with_node(node, |_, ctx| ctx.trigger_first_output(true)) {
            self.apply_commands(node, commands);
        }
    }

    pub(crate) fn remove_sub_flow(&mut self, node: NodeAddress, policy: FinishPolicy) {
        if let Some(child) = self.child_flow(node) {
            self.finish_flow(child, policy);
        }
    }

    /// Recreate a child flow from the loaded save under its saved instance name.
    pub(crate) fn load_sub_flow(&mut self, node: NodeAddress, template: &TemplateRef, instance_name: &str) {
        let record = self
            .loaded_save
            .as_ref()
            .and_then(|save| save.find_instance(instance_name))
            .cloned();
        let Some(record) = record else {
            self.emitter(node)
                .warn(format!("No saved sub flow named '{}', starting a fresh one", instance_name));
            self.create_sub_flow(node, template, false);
            return;
        };

        if let Some(existing) = self.child_flow(node) {
            self.finish_flow(existing, FinishPolicy::Abort);
        }

        let owner = self.instances.get(&node.instance).and_then(|p| p.owner.clone());
        let created = self
            .load_template(template)
            .and_then(|t| self.create_instance(t, owner, Some(node), Some(record.instance_name.clone())));
        match created {
            Ok(child) => {
                if let Some(parent) = self.instances.get_mut(&node.instance) {
                    parent.child_flows.insert(node.node, child);
                }
                self.load_instance(child, &record);
            }
            Err(e) => {
                self.emitter(node)
                    .error(format!("Failed to load sub flow {}: {}", instance_name, e));
                self.finish_sub_graph_node(node);
            }
        }
    }

    /// Fire a custom input on the child flow of the sub-graph node at `node`.
    pub(crate) fn trigger_sub_flow_event(&mut self, node: NodeAddress, event: &str) {
        match self.child_flow(node) {
            Some(child) => self.trigger_custom_event(child, event),
            None => self
                .emitter(node)
                .warn(format!("Cannot trigger '{}', sub-graph has no running child flow", event)),
        }
    }

    /// Fire output `event` on the sub-graph node that owns `instance`.
    pub(crate) fn trigger_custom_output(&mut self, instance: InstanceId, event: &str) {
        let Some(parent) = self.instances.get(&instance).and_then(|i| i.owning_node) else {
            tracing::debug!("Custom output '{}' of root instance {} goes nowhere", event, instance);
            return;
        };
        self.trigger_output(parent, event, false);
    }

    // ---- persistence ----

    /// Snapshot every root flow and its children.
    pub fn save_game(&mut self) -> FlowSaveData {
        let mut data = FlowSaveData::new();
        for root in self.root_instances() {
            self.save_instance(root, &mut data.instances);
        }
        tracing::info!("Saved {} flow instances", data.instances.len());
        data
    }

    pub fn save_game_to_store(&mut self, slot: &str) -> Result<(), FlowError> {
        let data = self.save_game();
        let bytes = codec::encode(&data)?;
        let store = self
            .save_store
            .as_mut()
            .ok_or_else(|| flowcore::PersistenceError::SlotNotFound(slot.to_string()))?;
        store.write(slot, &bytes)?;
        Ok(())
    }

    /// Make `data` the save that subsequent load calls restore from.
    pub fn load_save_data(&mut self, data: FlowSaveData) {
        self.loaded_save = Some(data);
    }

    pub fn load_game_from_store(&mut self, slot: &str) -> Result<(), FlowError> {
        let store = self
            .save_store
            .as_ref()
            .ok_or_else(|| flowcore::PersistenceError::SlotNotFound(slot.to_string()))?;
        let bytes = store.read(slot)?;
        self.load_save_data(codec::decode(&bytes)?);
        Ok(())
    }

    pub fn loaded_save(&self) -> Option<&FlowSaveData> {
        self.loaded_save.as_ref()
    }

    /// Restore the root flow `owner` was running when the loaded save was taken.
    pub fn load_root_flow(&mut self, owner: impl Into<OwnerId>, template: &TemplateRef) -> Result<InstanceId, FlowError> {
        let owner = owner.into();
        let save = self.loaded_save.as_ref().ok_or(InstanceError::NoSaveLoaded)?;
        let record = save
            .find_root(&owner, template)
            .cloned()
            .ok_or_else(|| InstanceError::SavedInstanceNotFound(format!("{} ({})", template, owner)))?;

        if let Some(existing) = self.find_root_flow(&owner, template) {
            tracing::warn!("Flow {} already runs for owner {}, not loading it", template, owner);
            return Ok(existing);
        }

        let id = self.create_root_flow(owner, template, Some(record.instance_name.clone()))?;
        self.load_instance(id, &record);
        Ok(id)
    }

    /// Load every root flow of the loaded save.
    pub fn load_all_root_flows(&mut self) -> Result<Vec<InstanceId>, FlowError> {
        let save = self.loaded_save.as_ref().ok_or(InstanceError::NoSaveLoaded)?;
        let roots: Vec<(OwnerId, TemplateRef)> = save
            .instances
            .iter()
            .filter_map(|i| i.owner.clone().map(|o| (o, i.template_path.clone())))
            .collect();

        let mut loaded = Vec::with_capacity(roots.len());
        for (owner, template) in roots {
            loaded.push(self.load_root_flow(owner, &template)?);
        }
        Ok(loaded)
    }

    pub(crate) fn checkpoint(&mut self, node: NodeAddress) {
        let slot = self.config.save_slot.clone();
        match self.save_game_to_store(&slot) {
            Ok(()) => self.emitter(node).note(format!("Checkpoint written to '{}'", slot)),
            Err(e) => self.emitter(node).error(format!("Checkpoint failed: {}", e)),
        }
    }
}
