//! Standard node library
//!
//! Built-in nodes for routing, timing, logic and persistence

mod counter;
mod execution;
mod operators;
mod route;
mod sub_graph;
mod time;
mod utils;

pub use counter::{CounterNode, CounterNodeFactory};
pub use execution::{MultiGateNode, MultiGateNodeFactory, RandomNode, RandomNodeFactory, SequenceNode, SequenceNodeFactory};
pub use operators::{LogicalAndNode, LogicalAndNodeFactory, LogicalOrNode, LogicalOrNodeFactory};
pub use route::{
    CustomInputNode, CustomInputNodeFactory, CustomOutputNode, CustomOutputNodeFactory, FinishNode, FinishNodeFactory,
    RerouteNode, RerouteNodeFactory, StartNode, StartNodeFactory,
};
pub use sub_graph::{SubGraphNode, SubGraphNodeFactory};
pub use time::{DelayNode, DelayNodeFactory, NextTickNode, NextTickNodeFactory, TimerNode, TimerNodeFactory};
pub use utils::{CheckpointNode, CheckpointNodeFactory, LogNode, LogNodeFactory};

/// Pin names used by the built-in nodes
pub mod pins {
    pub use crate::counter::{DECREMENT, GOAL, INCREMENT, SKIP, SKIPPED, STEP, ZERO};
    pub use crate::execution::RESET_PIN;
    pub use crate::sub_graph::{FINISH_PIN, START_PIN};
    pub use crate::time::{COMPLETED, FINISHED};
}

use flowruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(route::StartNodeFactory));
    registry.register(Arc::new(route::FinishNodeFactory));
    registry.register(Arc::new(route::RerouteNodeFactory));
    registry.register(Arc::new(route::CustomInputNodeFactory));
    registry.register(Arc::new(route::CustomOutputNodeFactory));
    registry.register(Arc::new(sub_graph::SubGraphNodeFactory));
    registry.register(Arc::new(execution::SequenceNodeFactory));
    registry.register(Arc::new(execution::MultiGateNodeFactory));
    registry.register(Arc::new(execution::RandomNodeFactory));
    registry.register(Arc::new(counter::CounterNodeFactory));
    registry.register(Arc::new(time::TimerNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(time::NextTickNodeFactory));
    registry.register(Arc::new(operators::LogicalAndNodeFactory));
    registry.register(Arc::new(operators::LogicalOrNodeFactory));
    registry.register(Arc::new(utils::LogNodeFactory));
    registry.register(Arc::new(utils::CheckpointNodeFactory));
}

/// Registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
