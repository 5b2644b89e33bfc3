//! Nodes choosing which of their numbered outputs fire.

use flowcore::{FlowNode, FlowPin, NodeContext, NodeError, NodeSpec};
use flowruntime::{NodeFactory, NodeMetadata};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const RESET_PIN: &str = "Reset";

fn output_names(ctx: &NodeContext<'_>) -> Vec<String> {
    ctx.outputs().iter().map(|p| p.name.clone()).collect()
}

fn numbered_outputs() -> Vec<FlowPin> {
    FlowPin::numbered(0, 1)
}

/// Fires every output in declared order, then finishes
pub struct SequenceNode;

impl FlowNode for SequenceNode {
    fn node_type(&self) -> &str {
        "route.sequence"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        for pin in output_names(ctx) {
            ctx.trigger_output(pin, false);
        }
        ctx.finish();
    }
}

pub struct SequenceNodeFactory;

impl NodeFactory for SequenceNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(SequenceNode))
    }

    fn node_type(&self) -> &str {
        "route.sequence"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires all outputs in order".to_string(),
            category: "route".to_string(),
            outputs: numbered_outputs(),
            can_user_add_output: true,
            ..NodeMetadata::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MultiGateSave {
    next_output: usize,
    completed: Vec<bool>,
}

/// Fires one output per trigger until every output fired once.
///
/// Outputs go in order, or at random when `random` is set. `start_index`
/// picks the first output. With `loop` the node finishes after the last
/// output so the next trigger starts over; `Reset` finishes it at any time.
pub struct MultiGateNode {
    random: bool,
    looping: bool,
    start_index: Option<usize>,
    next_output: usize,
    completed: Vec<bool>,
}

impl FlowNode for MultiGateNode {
    fn node_type(&self) -> &str {
        "route.multi_gate"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        if pin == RESET_PIN {
            ctx.finish();
            return;
        }

        let outputs = output_names(ctx);
        if outputs.is_empty() {
            ctx.log_error("Multi gate has no outputs");
            ctx.finish();
            return;
        }
        if self.completed.len() != outputs.len() {
            // fresh activation, or a save taken against a different set of outputs
            self.completed = vec![false; outputs.len()];
        }
        self.next_output %= outputs.len();
        if !self.completed.contains(&false) {
            tracing::debug!("Multi gate {} already fired every output", ctx.address());
            return;
        }

        let start_index = self
            .start_index
            .filter(|i| *i < self.completed.len() && !self.completed.contains(&true));

        let index = if self.random {
            match start_index {
                Some(i) => i,
                None => {
                    let available: Vec<usize> = (0..self.completed.len()).filter(|i| !self.completed[*i]).collect();
                    available[rand::rng().random_range(0..available.len())]
                }
            }
        } else {
            if let Some(i) = start_index {
                self.next_output = i;
            }
            let current = self.next_output;
            self.next_output = (current + 1) % outputs.len();
            current
        };

        self.completed[index] = true;
        let all_done = !self.completed.contains(&false);
        ctx.trigger_output(outputs[index].clone(), false);

        if all_done && self.looping {
            ctx.finish();
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {
        self.next_output = 0;
        self.completed.clear();
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(MultiGateSave {
            next_output: self.next_output,
            completed: self.completed.clone(),
        })
        .map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        let saved: MultiGateSave = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        self.next_output = saved.next_output;
        self.completed = saved.completed;
        Ok(())
    }

    fn status(&self) -> Option<String> {
        let fired = self.completed.iter().filter(|c| **c).count();
        Some(format!("{}/{}", fired, self.completed.len()))
    }
}

pub struct MultiGateNodeFactory;

impl NodeFactory for MultiGateNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        let start_index = match spec.config("start_index") {
            None => None,
            Some(value) => {
                let index = value.as_i64().ok_or_else(|| NodeError::InvalidConfigType {
                    field: "start_index".to_string(),
                    expected: "integer".to_string(),
                })?;
                usize::try_from(index).ok()
            }
        };

        Ok(Box::new(MultiGateNode {
            random: spec.config_bool_or("random", false),
            looping: spec.config_bool_or("loop", false),
            start_index,
            next_output: 0,
            completed: Vec::new(),
        }))
    }

    fn node_type(&self) -> &str {
        "route.multi_gate"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires a different output each time it is triggered".to_string(),
            category: "route".to_string(),
            inputs: vec![FlowPin::new(flowcore::DEFAULT_INPUT), FlowPin::new(RESET_PIN)],
            outputs: numbered_outputs(),
            can_user_add_output: true,
            ..NodeMetadata::default()
        }
    }
}

/// Fires one output picked at random, then finishes
pub struct RandomNode;

impl FlowNode for RandomNode {
    fn node_type(&self) -> &str {
        "route.random"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        let outputs = output_names(ctx);
        if !outputs.is_empty() {
            let index = rand::rng().random_range(0..outputs.len());
            ctx.trigger_output(outputs[index].clone(), false);
        }
        ctx.finish();
    }
}

pub struct RandomNodeFactory;

impl NodeFactory for RandomNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(RandomNode))
    }

    fn node_type(&self) -> &str {
        "route.random"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires one random output".to_string(),
            category: "route".to_string(),
            outputs: numbered_outputs(),
            can_user_add_output: true,
            ..NodeMetadata::default()
        }
    }
}
