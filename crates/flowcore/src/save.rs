//! Save-game records.
//!
//! A save is a flat list of instance records. Child flows are listed next to
//! their parents; the link between them is the child instance name stored in
//! the owning sub-graph node's own blob.

use crate::{ActivationState, NodeGuid, OwnerId, TemplateRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSaveData {
    pub node_guid: NodeGuid,
    #[serde(default)]
    pub state: ActivationState,
    /// Node-type specific fields.
    #[serde(default)]
    pub node_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInstanceSaveData {
    #[serde(default)]
    pub world_name: Option<String>,
    pub instance_name: String,
    pub template_path: TemplateRef,
    #[serde(default)]
    pub owner: Option<OwnerId>,
    /// Instance properties, serialized as a JSON object.
    #[serde(default)]
    pub instance_data: Vec<u8>,
    #[serde(default)]
    pub node_records: Vec<NodeSaveData>,
}

impl FlowInstanceSaveData {
    pub fn node_record(&self, guid: NodeGuid) -> Option<&NodeSaveData> {
        self.node_records.iter().find(|r| r.node_guid == guid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSaveData {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub instances: Vec<FlowInstanceSaveData>,
}

impl FlowSaveData {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            instances: Vec::new(),
        }
    }

    pub fn find_instance(&self, instance_name: &str) -> Option<&FlowInstanceSaveData> {
        self.instances.iter().find(|i| i.instance_name == instance_name)
    }

    /// Root record saved for `owner` running `template`.
    pub fn find_root(&self, owner: &OwnerId, template: &TemplateRef) -> Option<&FlowInstanceSaveData> {
        self.instances
            .iter()
            .find(|i| i.owner.as_ref() == Some(owner) && &i.template_path == template)
    }
}

impl Default for FlowSaveData {
    fn default() -> Self {
        Self::new()
    }
}
