use crate::{InstanceId, NodeGuid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Instance error: {0}")]
    Instance(#[from] InstanceError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid value for '{field}': expected {expected}")]
    InvalidConfigType { field: String, expected: String },

    #[error("Missing asset reference")]
    MissingAsset,

    #[error("Failed to save node state: {0}")]
    Save(String),

    #[error("Failed to load node state: {0}")]
    Load(String),
}

#[derive(Error, Debug, Clone)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template: {0}")]
    Invalid(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeGuid),

    #[error("Node {0} is already registered")]
    DuplicateNode(NodeGuid),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Template '{0}' has no Start node")]
    MissingStartNode(String),

    #[error("Template '{template}' has {count} Start nodes, expected exactly one")]
    MultipleStartNodes { template: String, count: usize },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

#[derive(Error, Debug, Clone)]
pub enum InstanceError {
    #[error("Instance not found: {0}")]
    NotFound(InstanceId),

    #[error("Template '{0}' allows a single instance and one is already running")]
    SingleInstance(String),

    #[error("No saved instance named '{0}'")]
    SavedInstanceNotFound(String),

    #[error("No save game is loaded")]
    NoSaveLoaded,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Save slot not found: {0}")]
    SlotNotFound(String),

    #[error("Corrupt save data: {0}")]
    Corrupt(String),

    #[error("Save store IO error: {0}")]
    Io(#[from] std::io::Error),
}
