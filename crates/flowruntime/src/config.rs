use flowcore::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// What happens when a sub-graph node asks for a child while it already owns one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubFlowRestartPolicy {
    /// Keep the running child and ignore the request.
    #[default]
    Reject,
    /// Abort the running child and start a new one.
    Replace,
}

/// Configuration for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Max connection distance from an entry node at which nodes of a type get preloaded.
    pub preload_depth: HashMap<String, usize>,
    /// Used for types missing from `preload_depth`. `None` preloads everything reachable.
    pub default_preload_depth: Option<usize>,
    /// Keep timestamped pin activation records.
    pub record_pin_activations: bool,
    /// Allow more than one live instance of the same template.
    pub allow_multiple_instances: bool,
    pub sub_flow_restart: SubFlowRestartPolicy,
    /// Drop templates fetched from the template source once their last instance finishes.
    pub release_unused_templates: bool,
    pub world_name: Option<String>,
    /// Slot written by checkpoint nodes.
    pub save_slot: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            preload_depth: HashMap::new(),
            default_preload_depth: None,
            record_pin_activations: cfg!(debug_assertions),
            allow_multiple_instances: true,
            sub_flow_restart: SubFlowRestartPolicy::default(),
            release_unused_templates: true,
            world_name: None,
            save_slot: "checkpoint".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_preload_depth(mut self, node_type: impl Into<String>, depth: usize) -> Self {
        self.preload_depth.insert(node_type.into(), depth);
        self
    }

    pub fn preload_depth_for(&self, node_type: &str) -> Option<usize> {
        self.preload_depth
            .get(node_type)
            .copied()
            .or(self.default_preload_depth)
    }
}
