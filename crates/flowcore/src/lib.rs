//! Core abstractions for the flow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: pins, templates, the node behaviour trait, timers,
//! diagnostics and save records. It knows nothing about how instances run.

mod error;
pub mod events;
mod node;
pub mod pin;
mod save;
mod template;
mod timer;
mod value;

pub use error::{FlowError, InstanceError, NodeError, PersistenceError, TemplateError};
pub use events::*;
pub use node::{
    ActivationState, EntryPoint, FinishPolicy, FlowNode, InstanceId, NodeAddress, NodeCommand, NodeContext,
    OwnerId,
};
pub use pin::{ConnectedPin, FlowPin, PinActivationType, PinRecord, DEFAULT_INPUT, DEFAULT_OUTPUT};
pub use save::{FlowInstanceSaveData, FlowSaveData, NodeSaveData};
pub use template::{Connection, ConnectionGraph, GraphTemplate, NodeGuid, NodeSpec, Position, TemplateId, TemplateRef};
pub use timer::{TimerHandle, TimerManager};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
