use flowcore::{FlowNode, FlowPin, NodeContext, NodeError, NodeSpec};
use flowruntime::{NodeFactory, NodeMetadata};
use serde::{Deserialize, Serialize};

pub const INCREMENT: &str = "Increment";
pub const DECREMENT: &str = "Decrement";
pub const SKIP: &str = "Skip";
pub const ZERO: &str = "Zero";
pub const STEP: &str = "Step";
pub const GOAL: &str = "Goal";
pub const SKIPPED: &str = "Skipped";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterSave {
    #[serde(default)]
    current_sum: i64,
}

/// Counts `Increment`/`Decrement` triggers.
///
/// Reaching `goal` fires `Goal` and finishes, dropping back to zero fires
/// `Zero` and finishes; every other change fires `Step`.
pub struct CounterNode {
    goal: i64,
    current_sum: i64,
}

impl CounterNode {
    pub fn new(goal: i64) -> Self {
        Self { goal, current_sum: 0 }
    }
}

impl FlowNode for CounterNode {
    fn node_type(&self) -> &str {
        "route.counter"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        match pin {
            INCREMENT => {
                self.current_sum += 1;
                if self.current_sum == self.goal {
                    ctx.trigger_output(GOAL, true);
                } else {
                    ctx.trigger_output(STEP, false);
                }
            }
            DECREMENT => {
                self.current_sum -= 1;
                if self.current_sum == 0 {
                    ctx.trigger_output(ZERO, true);
                } else {
                    ctx.trigger_output(STEP, false);
                }
            }
            SKIP => ctx.trigger_output(SKIPPED, true),
            _ => {}
        }
    }

    fn cleanup(&mut self, _ctx: &mut NodeContext<'_>) {
        self.current_sum = 0;
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(CounterSave {
            current_sum: self.current_sum,
        })
        .map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        let saved: CounterSave = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        self.current_sum = saved.current_sum;
        Ok(())
    }

    fn status(&self) -> Option<String> {
        Some(format!("{}/{}", self.current_sum, self.goal))
    }
}

pub struct CounterNodeFactory;

impl NodeFactory for CounterNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        let goal = match spec.config("goal") {
            None => 2,
            Some(value) => value.as_i64().ok_or_else(|| NodeError::InvalidConfigType {
                field: "goal".to_string(),
                expected: "integer".to_string(),
            })?,
        };
        if goal < 1 {
            return Err(NodeError::Configuration(format!("counter goal must be at least 1, got {}", goal)));
        }
        Ok(Box::new(CounterNode::new(goal)))
    }

    fn node_type(&self) -> &str {
        "route.counter"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Counts triggers up to 'goal'".to_string(),
            category: "route".to_string(),
            inputs: vec![FlowPin::new(INCREMENT), FlowPin::new(DECREMENT), FlowPin::new(SKIP)],
            outputs: vec![
                FlowPin::new(ZERO),
                FlowPin::new(STEP),
                FlowPin::new(GOAL),
                FlowPin::new(SKIPPED),
            ],
            ..NodeMetadata::default()
        }
    }
}
