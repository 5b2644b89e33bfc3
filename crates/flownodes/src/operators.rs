use flowcore::{FlowNode, FlowPin, NodeContext, NodeError, NodeSpec};
use flowruntime::{NodeFactory, NodeMetadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Default, Serialize, Deserialize)]
struct AndSave {
    #[serde(default)]
    executed_inputs: BTreeSet<String>,
}

/// Fires its output once every input has been triggered
#[derive(Default)]
pub struct LogicalAndNode {
    executed_inputs: BTreeSet<String>,
}

impl FlowNode for LogicalAndNode {
    fn node_type(&self) -> &str {
        "operator.and"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        let spec = ctx.spec();
        // restored inputs may name pins the node no longer declares
        self.executed_inputs.retain(|seen| spec.has_input(seen));
        self.executed_inputs.insert(pin.to_string());
        if self.executed_inputs.len() == ctx.inputs().len() {
            ctx.trigger_first_output(true);
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {
        self.executed_inputs.clear();
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(AndSave {
            executed_inputs: self.executed_inputs.clone(),
        })
        .map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        let saved: AndSave = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        self.executed_inputs = saved.executed_inputs;
        Ok(())
    }

    fn status(&self) -> Option<String> {
        Some(format!("{} inputs seen", self.executed_inputs.len()))
    }
}

pub struct LogicalAndNodeFactory;

impl NodeFactory for LogicalAndNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(LogicalAndNode::default()))
    }

    fn node_type(&self) -> &str {
        "operator.and"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires once all inputs were triggered".to_string(),
            category: "operators".to_string(),
            inputs: FlowPin::numbered(0, 1),
            can_user_add_input: true,
            ..NodeMetadata::default()
        }
    }
}

/// Fires its output on any input
pub struct LogicalOrNode;

impl FlowNode for LogicalOrNode {
    fn node_type(&self) -> &str {
        "operator.or"
    }
}

pub struct LogicalOrNodeFactory;

impl NodeFactory for LogicalOrNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(LogicalOrNode))
    }

    fn node_type(&self) -> &str {
        "operator.or"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires when any input is triggered".to_string(),
            category: "operators".to_string(),
            inputs: FlowPin::numbered(0, 1),
            can_user_add_input: true,
            ..NodeMetadata::default()
        }
    }
}
