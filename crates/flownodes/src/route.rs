//! Entry, exit and pass-through nodes.

use flowcore::{EntryPoint, FlowNode, FlowPin, NodeContext, NodeError, NodeSpec};
use flowruntime::{NodeFactory, NodeMetadata};

/// Entry point fired by `start_flow`
pub struct StartNode;

impl FlowNode for StartNode {
    fn node_type(&self) -> &str {
        "route.start"
    }

    fn entry_point(&self) -> Option<EntryPoint> {
        Some(EntryPoint::Start)
    }
}

pub struct StartNodeFactory;

impl NodeFactory for StartNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(StartNode))
    }

    fn node_type(&self) -> &str {
        "route.start"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Execution starts here".to_string(),
            category: "route".to_string(),
            inputs: vec![],
            ..NodeMetadata::default()
        }
    }
}

/// Finishes the graph, or returns control to the owning sub-graph node
pub struct FinishNode;

impl FlowNode for FinishNode {
    fn node_type(&self) -> &str {
        "route.finish"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        ctx.finish();
    }

    fn is_flow_finish(&self) -> bool {
        true
    }
}

pub struct FinishNodeFactory;

impl NodeFactory for FinishNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(FinishNode))
    }

    fn node_type(&self) -> &str {
        "route.finish"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Finishes the flow".to_string(),
            category: "route".to_string(),
            outputs: vec![],
            ..NodeMetadata::default()
        }
    }
}

pub struct RerouteNode;

impl FlowNode for RerouteNode {
    fn node_type(&self) -> &str {
        "route.reroute"
    }
}

pub struct RerouteNodeFactory;

impl NodeFactory for RerouteNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(RerouteNode))
    }

    fn node_type(&self) -> &str {
        "route.reroute"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Passes the signal through".to_string(),
            category: "route".to_string(),
            ..NodeMetadata::default()
        }
    }
}

fn event_name(spec: &NodeSpec) -> Result<String, NodeError> {
    match spec.config("event_name") {
        None => Ok(String::new()),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NodeError::InvalidConfigType {
                field: "event_name".to_string(),
                expected: "string".to_string(),
            }),
    }
}

/// Named entry point, fired through `trigger_custom_event`
pub struct CustomInputNode {
    event_name: String,
}

impl FlowNode for CustomInputNode {
    fn node_type(&self) -> &str {
        "route.custom_input"
    }

    fn entry_point(&self) -> Option<EntryPoint> {
        Some(EntryPoint::CustomInput(self.event_name.clone()))
    }

    fn status(&self) -> Option<String> {
        Some(self.event_name.clone())
    }
}

pub struct CustomInputNodeFactory;

impl NodeFactory for CustomInputNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(CustomInputNode {
            event_name: event_name(spec)?,
        }))
    }

    fn node_type(&self) -> &str {
        "route.custom_input"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Entry point named by 'event_name'".to_string(),
            category: "route".to_string(),
            inputs: vec![],
            ..NodeMetadata::default()
        }
    }
}

/// Fires the output named `event_name` on the sub-graph node owning this flow
pub struct CustomOutputNode {
    event_name: String,
}

impl FlowNode for CustomOutputNode {
    fn node_type(&self) -> &str {
        "route.custom_output"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        if self.event_name.is_empty() {
            ctx.log_warning("Custom output has no event name");
        } else {
            ctx.trigger_custom_output(self.event_name.clone());
        }
        ctx.finish();
    }

    fn status(&self) -> Option<String> {
        Some(self.event_name.clone())
    }
}

pub struct CustomOutputNodeFactory;

impl NodeFactory for CustomOutputNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(CustomOutputNode {
            event_name: event_name(spec)?,
        }))
    }

    fn node_type(&self) -> &str {
        "route.custom_output"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires 'event_name' on the parent sub-graph node".to_string(),
            category: "route".to_string(),
            inputs: vec![FlowPin::new(flowcore::DEFAULT_INPUT)],
            outputs: vec![],
            ..NodeMetadata::default()
        }
    }
}
