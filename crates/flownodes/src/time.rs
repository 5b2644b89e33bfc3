//! Latent nodes driven by the subsystem's timer manager.

use flowcore::{FlowNode, FlowPin, NodeContext, NodeError, NodeSpec, TimerHandle};
use flowruntime::{NodeFactory, NodeMetadata};
use serde::{Deserialize, Serialize};

pub const SKIP: &str = "Skip";
pub const COMPLETED: &str = "Completed";
pub const STEP: &str = "Step";
pub const SKIPPED: &str = "Skipped";
pub const FINISHED: &str = "Finished";

/// Delays below this fire in the same cascade.
const INSTANT_THRESHOLD: f64 = 1e-4;

fn seconds(spec: &NodeSpec, field: &str, default: f64) -> Result<f64, NodeError> {
    match spec.config(field) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| NodeError::InvalidConfigType {
            field: field.to_string(),
            expected: "number".to_string(),
        }),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct TimerSave {
    sum_of_steps: f64,
    remaining_completion_time: Option<f64>,
    remaining_step_time: Option<f64>,
}

/// Fires `Completed` after `completion_time` seconds and, when `step_time`
/// is positive, `Step` every `step_time` seconds until then.
pub struct TimerNode {
    completion_time: f64,
    step_time: f64,
    sum_of_steps: f64,
    completion_timer: Option<TimerHandle>,
    step_timer: Option<TimerHandle>,
    saved: TimerSave,
}

impl TimerNode {
    pub fn new(completion_time: f64, step_time: f64) -> Self {
        Self {
            completion_time,
            step_time,
            sum_of_steps: 0.0,
            completion_timer: None,
            step_timer: None,
            saved: TimerSave::default(),
        }
    }

    fn on_step(&mut self, ctx: &mut NodeContext<'_>) {
        self.sum_of_steps += self.step_time;
        if self.sum_of_steps >= self.completion_time {
            ctx.trigger_output(COMPLETED, true);
        } else {
            ctx.trigger_output(STEP, false);
        }
    }
}

impl FlowNode for TimerNode {
    fn node_type(&self) -> &str {
        "route.timer"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, pin: &str) {
        if self.completion_time <= 0.0 {
            ctx.log_error("Invalid Timer settings");
            ctx.trigger_output(COMPLETED, true);
            return;
        }

        match pin {
            SKIP => ctx.trigger_output(SKIPPED, true),
            flowcore::DEFAULT_INPUT => {
                if self.completion_timer.is_some() || self.step_timer.is_some() {
                    ctx.log_error("Timer already active");
                    return;
                }
                if self.step_time > 0.0 {
                    self.step_timer = Some(ctx.set_timer(self.step_time, true));
                }
                self.completion_timer = Some(ctx.set_timer(self.completion_time, false));
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerHandle) {
        if Some(timer) == self.step_timer {
            self.on_step(ctx);
        } else if Some(timer) == self.completion_timer {
            self.completion_timer = None;
            ctx.trigger_output(COMPLETED, true);
        }
    }

    fn cleanup(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(handle) = self.completion_timer.take() {
            ctx.clear_timer(handle);
        }
        if let Some(handle) = self.step_timer.take() {
            ctx.clear_timer(handle);
        }
        self.sum_of_steps = 0.0;
    }

    fn on_save(&mut self, ctx: &mut NodeContext<'_>) {
        self.saved = TimerSave {
            sum_of_steps: self.sum_of_steps,
            remaining_completion_time: self.completion_timer.and_then(|h| ctx.timer_remaining(h)),
            remaining_step_time: self.step_timer.and_then(|h| ctx.timer_remaining(h)),
        };
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        let saved = std::mem::take(&mut self.saved);
        self.sum_of_steps = saved.sum_of_steps;

        if let Some(remaining) = saved.remaining_step_time {
            if self.step_time > 0.0 {
                self.step_timer = Some(ctx.set_timer_with_delay(remaining, self.step_time, true));
            }
        }
        if let Some(remaining) = saved.remaining_completion_time {
            self.completion_timer = Some(ctx.set_timer(remaining, false));
        }
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(&self.saved).map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        self.saved = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        Ok(())
    }

    fn status(&self) -> Option<String> {
        if self.step_time > 0.0 {
            Some(format!("Progress: {:.2}", self.sum_of_steps))
        } else if self.completion_timer.is_some() {
            Some(format!("Completion: {:.2}", self.completion_time))
        } else {
            None
        }
    }
}

pub struct TimerNodeFactory;

impl NodeFactory for TimerNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(TimerNode::new(
            seconds(spec, "completion_time", 1.0)?,
            seconds(spec, "step_time", 0.0)?,
        )))
    }

    fn node_type(&self) -> &str {
        "route.timer"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Completes after 'completion_time' seconds, stepping every 'step_time'".to_string(),
            category: "route".to_string(),
            inputs: vec![FlowPin::new(flowcore::DEFAULT_INPUT), FlowPin::new(SKIP)],
            outputs: vec![FlowPin::new(COMPLETED), FlowPin::new(STEP), FlowPin::new(SKIPPED)],
            ..NodeMetadata::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct DelaySave {
    remaining_time: Option<f64>,
}

/// Fires `Finished` after `delay_seconds`
pub struct DelayNode {
    delay_seconds: f64,
    timer: Option<TimerHandle>,
    remaining: Option<f64>,
}

impl DelayNode {
    pub fn new(delay_seconds: f64) -> Self {
        Self {
            delay_seconds,
            timer: None,
            remaining: None,
        }
    }
}

impl FlowNode for DelayNode {
    fn node_type(&self) -> &str {
        "route.delay"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        if self.delay_seconds < INSTANT_THRESHOLD {
            ctx.trigger_first_output(true);
            return;
        }
        if let Some(handle) = self.timer.take() {
            ctx.clear_timer(handle);
        }
        self.timer = Some(ctx.set_timer(self.delay_seconds, false));
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerHandle) {
        if Some(timer) == self.timer {
            self.timer = None;
            ctx.trigger_first_output(true);
        }
    }

    fn cleanup(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(handle) = self.timer.take() {
            ctx.clear_timer(handle);
        }
    }

    fn on_save(&mut self, ctx: &mut NodeContext<'_>) {
        self.remaining = self.timer.and_then(|h| ctx.timer_remaining(h));
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(remaining) = self.remaining.take() {
            self.timer = Some(ctx.set_timer(remaining, false));
        }
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(DelaySave {
            remaining_time: self.remaining,
        })
        .map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        let saved: DelaySave = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        self.remaining = saved.remaining_time;
        Ok(())
    }

    fn status(&self) -> Option<String> {
        if self.delay_seconds < INSTANT_THRESHOLD {
            return None;
        }
        Some(format!("Delay: {:.2}", self.delay_seconds))
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(DelayNode::new(seconds(spec, "delay_seconds", 0.2)?)))
    }

    fn node_type(&self) -> &str {
        "route.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fires 'Finished' after 'delay_seconds'".to_string(),
            category: "route".to_string(),
            outputs: vec![FlowPin::new(FINISHED).with_description("Executes after 'delay_seconds' time")],
            ..NodeMetadata::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct NextTickSave {
    pending: bool,
}

/// Fires `Completed` on the next tick of the subsystem
#[derive(Default)]
pub struct NextTickNode {
    timer: Option<TimerHandle>,
    pending: bool,
}

impl FlowNode for NextTickNode {
    fn node_type(&self) -> &str {
        "route.next_tick"
    }

    fn execute_input(&mut self, ctx: &mut NodeContext<'_>, _pin: &str) {
        if self.timer.is_some() {
            ctx.log_warning("Already waiting for the next tick");
            ctx.trigger_output(SKIPPED, true);
            return;
        }
        self.timer = Some(ctx.set_timer_for_next_tick());
    }

    fn on_timer(&mut self, ctx: &mut NodeContext<'_>, timer: TimerHandle) {
        if Some(timer) == self.timer {
            self.timer = None;
            ctx.trigger_output(COMPLETED, true);
        }
    }

    fn cleanup(&mut self, ctx: &mut NodeContext<'_>) {
        if let Some(handle) = self.timer.take() {
            ctx.clear_timer(handle);
        }
    }

    fn on_save(&mut self, _ctx: &mut NodeContext<'_>) {
        self.pending = self.timer.is_some();
    }

    fn on_load(&mut self, ctx: &mut NodeContext<'_>) {
        if std::mem::take(&mut self.pending) {
            self.timer = Some(ctx.set_timer_for_next_tick());
        }
    }

    fn save_state(&self) -> Result<serde_json::Value, NodeError> {
        serde_json::to_value(NextTickSave { pending: self.pending }).map_err(|e| NodeError::Save(e.to_string()))
    }

    fn load_state(&mut self, data: serde_json::Value) -> Result<(), NodeError> {
        let saved: NextTickSave = serde_json::from_value(data).map_err(|e| NodeError::Load(e.to_string()))?;
        self.pending = saved.pending;
        Ok(())
    }
}

pub struct NextTickNodeFactory;

impl NodeFactory for NextTickNodeFactory {
    fn create(&self, _spec: &NodeSpec) -> Result<Box<dyn FlowNode>, NodeError> {
        Ok(Box::new(NextTickNode::default()))
    }

    fn node_type(&self) -> &str {
        "route.next_tick"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Completes on the next tick".to_string(),
            category: "route".to_string(),
            outputs: vec![
                FlowPin::new(COMPLETED).with_description("Executed in the next tick"),
                FlowPin::new(SKIPPED).with_description("Executed when the node was already waiting"),
            ],
            ..NodeMetadata::default()
        }
    }
}
