//! Persistence codec: instance snapshots to and from bytes.

use crate::subsystem::FlowSubsystem;
use chrono::Utc;
use flowcore::{
    ActivationState, ExecutionEvent, FlowInstanceSaveData, FlowSaveData, InstanceId, NodeAddress, NodeGuid,
    NodeSaveData, PersistenceError, Value,
};
use std::collections::HashMap;

pub fn encode(data: &FlowSaveData) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(data).map_err(|e| PersistenceError::Corrupt(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<FlowSaveData, PersistenceError> {
    serde_json::from_slice(bytes).map_err(|e| PersistenceError::Corrupt(e.to_string()))
}

impl FlowSubsystem {
    /// Append records for `id` to `out`, its child flows first.
    pub(crate) fn save_instance(&mut self, id: InstanceId, out: &mut Vec<FlowInstanceSaveData>) {
        let Some(instance) = self.instances.get(&id) else {
            return;
        };
        for child in instance.child_flows() {
            self.save_instance(child, out);
        }

        let touched: Vec<NodeGuid> = match self.instances.get(&id) {
            Some(instance) => instance
                .nodes
                .iter()
                .filter(|(_, node)| node.state != ActivationState::NeverActivated)
                .map(|(guid, _)| *guid)
                .collect(),
            None => return,
        };

        let mut node_records = Vec::with_capacity(touched.len());
        for guid in touched {
            let address = NodeAddress::new(id, guid);
            if let Some(commands) = self.with_node(address, |node, ctx| node.on_save(ctx)) {
                if !commands.is_empty() {
                    tracing::warn!("Ignoring {} commands issued while saving {}", commands.len(), address);
                }
            }

            let Some(node) = self.instances.get(&id).and_then(|i| i.nodes.get(&guid)) else {
                continue;
            };
            let node_data = match node.behavior.save_state() {
                Ok(data) => data,
                Err(e) => {
                    self.emitter(address).error(format!("Failed to save node: {}", e));
                    serde_json::Value::Null
                }
            };
            node_records.push(NodeSaveData {
                node_guid: guid,
                state: node.state,
                node_data,
            });
        }

        let Some(instance) = self.instances.get(&id) else {
            return;
        };
        let instance_data = match serde_json::to_vec(&instance.properties) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to serialize properties of {}: {}", instance.name, e);
                Vec::new()
            }
        };

        out.push(FlowInstanceSaveData {
            world_name: self.config.world_name.clone(),
            instance_name: instance.name.clone(),
            template_path: instance.template_path().clone(),
            owner: if instance.is_root() { instance.owner.clone() } else { None },
            instance_data,
            node_records,
        });
    }

    /// Restore a freshly created instance from its save record.
    ///
    /// Fields missing from the record keep their initial values. `on_load`
    /// runs on the restored active nodes once every node has its state back.
    pub(crate) fn load_instance(&mut self, id: InstanceId, record: &FlowInstanceSaveData) {
        let Some(instance) = self.instances.get_mut(&id) else {
            return;
        };
        instance.started = true;

        if !record.instance_data.is_empty() {
            match serde_json::from_slice::<HashMap<String, serde_json::Value>>(&record.instance_data) {
                Ok(saved) => {
                    for (key, value) in saved {
                        instance.properties.insert(key, Value::from(value));
                    }
                }
                Err(e) => tracing::warn!("Keeping default properties of {}: {}", instance.name, e),
            }
        }

        let mut restored = Vec::with_capacity(record.node_records.len());
        for saved in &record.node_records {
            let Some(node) = instance.nodes.get_mut(&saved.node_guid) else {
                tracing::warn!(
                    "Saved node {} no longer exists in {}",
                    saved.node_guid,
                    instance.template_path()
                );
                continue;
            };

            node.state = saved.state;
            if let Err(e) = node.behavior.load_state(saved.node_data.clone()) {
                tracing::warn!("Node {} keeps its defaults: {}", saved.node_guid, e);
            }
            if saved.state != ActivationState::NeverActivated {
                instance.recorded.insert(saved.node_guid);
            }
            if saved.state == ActivationState::Active {
                instance.active.insert(saved.node_guid);
                restored.push(saved.node_guid);
            }
        }

        tracing::info!("Loaded flow {} with {} active nodes", instance.name, instance.active.len());
        self.events.emit(ExecutionEvent::FlowStarted {
            instance_id: id,
            template: instance.template_path().clone(),
            instance_name: instance.name.clone(),
            root: instance.is_root(),
            timestamp: Utc::now(),
        });

        for guid in restored {
            let address = NodeAddress::new(id, guid);
            if let Some(commands) = self.with_node(address, |node, ctx| node.on_load(ctx)) {
                self.apply_commands(address, commands);
            }
        }
    }
}
