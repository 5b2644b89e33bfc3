use crate::{FinishPolicy, InstanceId, NodeGuid, TemplateRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// Events emitted while graph instances run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    FlowStarted {
        instance_id: InstanceId,
        template: TemplateRef,
        instance_name: String,
        root: bool,
        timestamp: DateTime<Utc>,
    },
    FlowFinished {
        instance_id: InstanceId,
        template: TemplateRef,
        root: bool,
        policy: FinishPolicy,
        timestamp: DateTime<Utc>,
    },
    NodeActivated {
        instance_id: InstanceId,
        node_guid: NodeGuid,
        node_type: String,
        pin: String,
        timestamp: DateTime<Utc>,
    },
    OutputTriggered {
        instance_id: InstanceId,
        node_guid: NodeGuid,
        pin: String,
        timestamp: DateTime<Utc>,
    },
    NodeFinished {
        instance_id: InstanceId,
        node_guid: NodeGuid,
        timestamp: DateTime<Utc>,
    },
    Message {
        instance_id: InstanceId,
        template: TemplateRef,
        node_guid: Option<NodeGuid>,
        severity: Severity,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Diagnostics channel bound to one instance, and optionally one node in it.
///
/// Every message also goes to `tracing` at the matching level.
#[derive(Clone)]
pub struct EventEmitter {
    instance_id: InstanceId,
    template: TemplateRef,
    node_guid: Option<NodeGuid>,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        instance_id: InstanceId,
        template: TemplateRef,
        node_guid: Option<NodeGuid>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            instance_id,
            template,
            node_guid,
            sender,
        }
    }

    pub fn message(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        let node = self.node_guid.map(|g| g.to_string()).unwrap_or_default();
        match severity {
            Severity::Error => {
                tracing::error!(instance = %self.instance_id, template = %self.template, node = %node, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(instance = %self.instance_id, template = %self.template, node = %node, "{}", message)
            }
            Severity::Note => {
                tracing::info!(instance = %self.instance_id, template = %self.template, node = %node, "{}", message)
            }
        }

        let _ = self.sender.send(ExecutionEvent::Message {
            instance_id: self.instance_id,
            template: self.template.clone(),
            node_guid: self.node_guid,
            severity,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.message(Severity::Error, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.message(Severity::Warning, message);
    }

    pub fn note(&self, message: impl Into<String>) {
        self.message(Severity::Note, message);
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(
        &self,
        instance_id: InstanceId,
        template: TemplateRef,
        node_guid: Option<NodeGuid>,
    ) -> EventEmitter {
        EventEmitter::new(instance_id, template, node_guid, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
