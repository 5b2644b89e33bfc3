use crate::pin::{ConnectedPin, FlowPin, DEFAULT_INPUT, DEFAULT_OUTPUT};
use crate::{TemplateError, Value};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::algo::dijkstra;
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type TemplateId = Uuid;
pub type NodeGuid = Uuid;

/// Asset path of a graph template, e.g. `quests/intro`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRef(pub String);

impl TemplateRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last path segment, used when naming instances.
    pub fn base_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateRef {
    fn from(path: &str) -> Self {
        TemplateRef(path.to_string())
    }
}

impl From<String> for TemplateRef {
    fn from(path: String) -> Self {
        TemplateRef(path)
    }
}

/// Immutable design-time graph definition.
///
/// Running instances are built from a template by the runtime; the template
/// itself never carries execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphTemplate {
    pub id: TemplateId,
    pub path: TemplateRef,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    nodes: IndexMap<NodeGuid, NodeSpec>,
    /// Named entry points; a sub-graph node referencing this template gets an input pin per name.
    #[serde(default)]
    pub custom_inputs: Vec<String>,
    /// Named exits; a sub-graph node referencing this template gets an output pin per name.
    #[serde(default)]
    pub custom_outputs: Vec<String>,
    /// Default values of the per-instance properties.
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl GraphTemplate {
    pub fn new(path: impl Into<TemplateRef>) -> Self {
        let path = path.into();
        Self {
            id: Uuid::new_v4(),
            name: path.base_name().to_string(),
            path,
            description: None,
            nodes: IndexMap::new(),
            custom_inputs: Vec::new(),
            custom_outputs: Vec::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_custom_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_inputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_custom_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_outputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add a node under its own guid.
    pub fn add_node(&mut self, node: NodeSpec) -> Result<NodeGuid, TemplateError> {
        let guid = node.guid;
        self.register_node(guid, node)?;
        Ok(guid)
    }

    /// Register a node under `guid`, overwriting the guid stored in the spec.
    pub fn register_node(&mut self, guid: NodeGuid, mut node: NodeSpec) -> Result<(), TemplateError> {
        if self.nodes.contains_key(&guid) {
            tracing::error!("Attempted to register node {} twice in template {}", guid, self.path);
            return Err(TemplateError::DuplicateNode(guid));
        }
        node.guid = guid;
        self.nodes.insert(guid, node);
        Ok(())
    }

    /// Remove a node and every link pointing at it.
    pub fn unregister_node(&mut self, guid: NodeGuid) -> Option<NodeSpec> {
        let removed = self.nodes.shift_remove(&guid)?;
        for node in self.nodes.values_mut() {
            node.connections.retain(|_, target| target.node_guid != guid);
        }
        Some(removed)
    }

    pub fn node(&self, guid: NodeGuid) -> Option<&NodeSpec> {
        self.nodes.get(&guid)
    }

    pub fn node_mut(&mut self, guid: NodeGuid) -> Option<&mut NodeSpec> {
        self.nodes.get_mut(&guid)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a NodeSpec> + 'a {
        self.nodes.values().filter(move |n| n.node_type == node_type)
    }

    /// Link an output pin to an input pin, replacing any previous link of that output.
    pub fn connect(
        &mut self,
        from_node: NodeGuid,
        from_pin: impl Into<String>,
        to_node: NodeGuid,
        to_pin: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let from_pin = from_pin.into();
        let to_pin = to_pin.into();

        let target = self.nodes.get(&to_node).ok_or(TemplateError::NodeNotFound(to_node))?;
        if !target.has_input(&to_pin) {
            return Err(TemplateError::InvalidConnection(format!(
                "node {} has no input pin '{}'",
                to_node, to_pin
            )));
        }

        let source = self.nodes.get_mut(&from_node).ok_or(TemplateError::NodeNotFound(from_node))?;
        if !source.has_output(&from_pin) {
            return Err(TemplateError::InvalidConnection(format!(
                "node {} has no output pin '{}'",
                from_node, from_pin
            )));
        }

        source.connections.insert(from_pin, ConnectedPin::new(to_node, to_pin));
        Ok(())
    }

    pub fn disconnect(&mut self, from_node: NodeGuid, from_pin: &str) -> Option<ConnectedPin> {
        self.nodes.get_mut(&from_node)?.connections.shift_remove(from_pin)
    }

    /// Rebuild every node's connection map from a flat list of editor links.
    ///
    /// Only the first link of each output pin is kept. Links whose source node
    /// is unknown are dropped; links to unknown nodes are kept and resolve to
    /// nothing at runtime.
    pub fn compile_node_connections(&mut self, links: &[Connection]) {
        for node in self.nodes.values_mut() {
            node.connections.clear();
        }

        for link in links {
            let Some(source) = self.nodes.get_mut(&link.from_node) else {
                tracing::warn!("Dropping link from unknown node {}", link.from_node);
                continue;
            };
            if source.connections.contains_key(&link.from_pin) {
                tracing::debug!(
                    "Output {}:{} already linked, ignoring extra link to {}",
                    link.from_node,
                    link.from_pin,
                    link.to_node
                );
                continue;
            }
            source
                .connections
                .insert(link.from_pin.clone(), ConnectedPin::new(link.to_node, link.to_pin.clone()));
        }
    }

    /// Flatten the connection maps back into editor links.
    pub fn links(&self) -> Vec<Connection> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.connections.iter().map(move |(pin, target)| Connection {
                    from_node: node.guid,
                    from_pin: pin.clone(),
                    to_node: target.node_guid,
                    to_pin: target.pin_name.clone(),
                })
            })
            .collect()
    }

    /// Append the custom inputs/outputs of `child` to a sub-graph node's pins.
    pub fn refresh_context_pins(&mut self, guid: NodeGuid, child: &GraphTemplate) -> Result<(), TemplateError> {
        let node = self.nodes.get_mut(&guid).ok_or(TemplateError::NodeNotFound(guid))?;
        for event in child.custom_inputs.iter().filter(|e| !e.is_empty()) {
            if !node.has_input(event) {
                node.inputs.push(FlowPin::new(event.clone()));
            }
        }
        for event in child.custom_outputs.iter().filter(|e| !e.is_empty()) {
            if !node.has_output(event) {
                node.outputs.push(FlowPin::new(event.clone()));
            }
        }
        Ok(())
    }

    /// Links whose destination node does not exist in this template.
    pub fn dangling_connections(&self) -> Vec<Connection> {
        self.links()
            .into_iter()
            .filter(|link| !self.nodes.contains_key(&link.to_node))
            .collect()
    }

    pub fn connection_graph(&self) -> ConnectionGraph {
        ConnectionGraph::build(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Node definition inside a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub guid: NodeGuid,
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default = "default_inputs")]
    pub inputs: Vec<FlowPin>,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<FlowPin>,
    /// Output pin name to its single destination.
    #[serde(default)]
    pub connections: IndexMap<String, ConnectedPin>,
    #[serde(default)]
    pub position: Option<Position>,
}

fn default_inputs() -> Vec<FlowPin> {
    vec![FlowPin::new(DEFAULT_INPUT)]
}

fn default_outputs() -> Vec<FlowPin> {
    vec![FlowPin::new(DEFAULT_OUTPUT)]
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            node_type: node_type.into(),
            name: None,
            config: HashMap::new(),
            inputs: default_inputs(),
            outputs: default_outputs(),
            connections: IndexMap::new(),
            position: None,
        }
    }

    pub fn with_guid(mut self, guid: NodeGuid) -> Self {
        self.guid = guid;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_inputs<I, P>(mut self, pins: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FlowPin>,
    {
        self.inputs = pins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, P>(mut self, pins: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FlowPin>,
    {
        self.outputs = pins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_numbered_inputs(mut self, first: u8, last: u8) -> Self {
        self.inputs = FlowPin::numbered(first, last);
        self
    }

    pub fn with_numbered_outputs(mut self, first: u8, last: u8) -> Self {
        self.outputs = FlowPin::numbered(first, last);
        self
    }

    pub fn add_input(&mut self, pin: impl Into<FlowPin>) {
        self.inputs.push(pin.into());
    }

    pub fn add_output(&mut self, pin: impl Into<FlowPin>) {
        self.outputs.push(pin.into());
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|p| p.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|p| p.name == name)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }

    pub fn first_output(&self) -> Option<&FlowPin> {
        self.outputs.first()
    }

    pub fn connection(&self, output: &str) -> Option<&ConnectedPin> {
        self.connections.get(output)
    }

    pub fn connected_nodes(&self) -> impl Iterator<Item = NodeGuid> + '_ {
        self.connections.values().map(|c| c.node_guid)
    }

    pub fn config(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Get config with default
    pub fn config_or(&self, key: &str, default: Value) -> Value {
        self.config.get(key).cloned().unwrap_or(default)
    }

    pub fn config_f64_or(&self, key: &str, default: f64) -> f64 {
        self.config.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn config_bool_or(&self, key: &str, default: bool) -> bool {
        self.config.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Name shown in diagnostics.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("{} ({})", self.node_type, self.guid))
    }
}

/// Editor-level link between two pins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub from_node: NodeGuid,
    pub from_pin: String,
    pub to_node: NodeGuid,
    pub to_pin: String,
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Directed node graph derived from a template's connection maps.
pub struct ConnectionGraph {
    graph: DiGraph<NodeGuid, String>,
    indices: HashMap<NodeGuid, NodeIndex>,
}

impl ConnectionGraph {
    fn build(template: &GraphTemplate) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for guid in template.nodes.keys() {
            indices.insert(*guid, graph.add_node(*guid));
        }

        for node in template.nodes.values() {
            for (pin, target) in &node.connections {
                if let (Some(from), Some(to)) = (indices.get(&node.guid), indices.get(&target.node_guid)) {
                    graph.add_edge(*from, *to, pin.clone());
                }
            }
        }

        Self { graph, indices }
    }

    /// Nodes reachable from `start` (inclusive), in breadth-first order.
    pub fn reachable_from(&self, start: NodeGuid) -> Vec<NodeGuid> {
        let Some(&index) = self.indices.get(&start) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, index);
        let mut reached = Vec::new();
        while let Some(next) = bfs.next(&self.graph) {
            reached.push(self.graph[next]);
        }
        reached
    }

    /// Number of links on the shortest path from `start` to every reachable node.
    pub fn distances_from(&self, start: NodeGuid) -> HashMap<NodeGuid, usize> {
        let Some(&index) = self.indices.get(&start) else {
            return HashMap::new();
        };
        dijkstra(&self.graph, index, None, |_| 1usize)
            .into_iter()
            .map(|(node, distance)| (self.graph[node], distance))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
