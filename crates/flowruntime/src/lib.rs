//! Flow execution runtime
//!
//! This crate runs graph templates: it owns the node registry, the live
//! graph instances and their sub-flows, activation dispatch, timers,
//! template loading and save/load of execution state.

pub mod codec;
mod config;
mod executor;
mod instance;
mod loader;
mod registry;
mod store;
mod subsystem;

pub use config::{RuntimeConfig, SubFlowRestartPolicy};
pub use instance::GraphInstance;
pub use loader::{load_template_tree, JsonDirectorySource, MemoryTemplateSource, TemplateSource};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry};
pub use store::{DirectorySaveStore, MemorySaveStore, SaveStore};
pub use subsystem::FlowSubsystem;
