use flowcore::{FlowNode, FlowPin, NodeError, NodeSpec, TemplateError, TemplateRef};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a fresh behaviour instance for one node of one graph instance
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, pins, etc.)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }

    /// Templates a node of this type instantiates at runtime.
    fn referenced_assets(&self, _spec: &NodeSpec) -> Vec<TemplateRef> {
        Vec::new()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<FlowPin>,
    pub outputs: Vec<FlowPin>,
    pub can_user_add_input: bool,
    pub can_user_add_output: bool,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: vec![FlowPin::new(flowcore::DEFAULT_INPUT)],
            outputs: vec![FlowPin::new(flowcore::DEFAULT_OUTPUT)],
            can_user_add_input: false,
            can_user_add_output: false,
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::debug!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Create a behaviour instance for a template node
    pub fn create_node(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, TemplateError> {
        let factory = self
            .factories
            .get(&spec.node_type)
            .ok_or_else(|| TemplateError::UnknownNodeType(spec.node_type.clone()))?;

        factory
            .create(spec)
            .map_err(|e| TemplateError::Invalid(format!("Failed to create node {}: {}", spec.guid, e)))
    }

    /// New template node carrying the default pins of its type
    pub fn new_spec(&self, node_type: &str) -> Result<NodeSpec, TemplateError> {
        let metadata = self
            .get_metadata(node_type)
            .ok_or_else(|| TemplateError::UnknownNodeType(node_type.to_string()))?;

        Ok(NodeSpec::new(node_type)
            .with_inputs(metadata.inputs)
            .with_outputs(metadata.outputs))
    }

    pub fn referenced_assets(&self, spec: &NodeSpec) -> Vec<TemplateRef> {
        self.factories
            .get(&spec.node_type)
            .map(|f| f.referenced_assets(spec))
            .unwrap_or_default()
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
