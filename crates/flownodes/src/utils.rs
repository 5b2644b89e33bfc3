use flowcore::{FlowNode, NodeContext, NodeError, NodeSpec, Severity};
use flowruntime::{NodeFactory, NodeMetadata};

/// Logs `message` through the diagnostics channel, then passes through
pub struct LogNode {
    message: String,
    severity: Severity,
}

impl FlowNode for LogNode {
    fn node_type(&self) -> &str {
        "utils.log"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        match self.severity {
            Severity::Error => ctx.log_error(self.message.clone()),
            Severity::Warning => ctx.log_warning(self.message.clone()),
            Severity::Note => ctx.log_note(self.message.clone()),
        }
        ctx.trigger_first_output(true);
    }

    fn status(&self) -> Option<String> {
        Some(self.message.clone())
    }
}

pub struct LogNodeFactory;

impl LogNodeFactory {
    fn severity(spec: &NodeSpec) -> Result<Severity, NodeError> {
        let invalid = || NodeError::InvalidConfigType {
            field: "severity".to_string(),
            expected: "one of 'error', 'warning', 'note'".to_string(),
        };
        match spec.config("severity") {
            None => Ok(Severity::Warning),
            Some(value) => match value.as_str().ok_or_else(invalid)? {
                "error" => Ok(Severity::Error),
                "warning" => Ok(Severity::Warning),
                "note" => Ok(Severity::Note),
                _ => Err(invalid()),
            },
        }
    }
}

impl NodeFactory for LogNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        let message = match spec.config("message") {
            None => "Log!".to_string(),
            Some(value) => value
                .as_str()
                .ok_or_else(|| NodeError::InvalidConfigType {
                    field: "message".to_string(),
                    expected: "string".to_string(),
                })?
                .to_string(),
        };

        Ok(Box::new(LogNode {
            message,
            severity: Self::severity(spec)?,
        }))
    }

    fn node_type(&self) -> &str {
        "utils.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs 'message' at 'severity'".to_string(),
            category: "utils".to_string(),
            ..NodeMetadata::default()
        }
    }
}

/// Writes a save-game snapshot, then passes through.
///
/// Restoring from that snapshot resumes the flow past this node.
pub struct CheckpointNode;

impl FlowNode for CheckpointNode {
    fn node_type(&self) -> &str {
        "utils.checkpoint"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.request_checkpoint();
        ctx.trigger_first_output(true);
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        ctx.trigger_first_output(true);
    }
}

pub struct CheckpointNodeFactory;

impl NodeFactory for CheckpointNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(CheckpointNode))
    }

    fn node_type(&self) -> &str {
        "utils.checkpoint"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Saves the game, then passes through".to_string(),
            category: "utils".to_string(),
            ..NodeMetadata::default()
        }
    }
}
