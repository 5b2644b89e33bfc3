//! Pins, pin-to-pin links and pin activation records.

use crate::NodeGuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INPUT: &str = "In";
pub const DEFAULT_OUTPUT: &str = "Out";

/// Named input or output on a node.
///
/// Input and output names live in separate namespaces: an input called `A`
/// and an output called `A` on the same node are different pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FlowPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Pins named "0", "1", ... as used by nodes with user-added outputs.
    pub fn numbered(first: u8, last: u8) -> Vec<FlowPin> {
        (first..=last).map(|i| FlowPin::new(i.to_string())).collect()
    }
}

impl From<&str> for FlowPin {
    fn from(name: &str) -> Self {
        FlowPin::new(name)
    }
}

impl From<String> for FlowPin {
    fn from(name: String) -> Self {
        FlowPin::new(name)
    }
}

/// Destination of an output pin: input `pin_name` on node `node_guid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectedPin {
    pub node_guid: NodeGuid,
    pub pin_name: String,
}

impl ConnectedPin {
    pub fn new(node_guid: NodeGuid, pin_name: impl Into<String>) -> Self {
        Self {
            node_guid,
            pin_name: pin_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinActivationType {
    Default,
    Forced,
}

/// One activation of a pin, kept for inspection and wire highlighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinRecord {
    /// Runtime clock, in seconds since the subsystem started ticking.
    pub time: f64,
    pub timestamp: DateTime<Utc>,
    pub activation_type: PinActivationType,
}

impl PinRecord {
    pub fn new(time: f64, activation_type: PinActivationType) -> Self {
        Self {
            time,
            timestamp: Utc::now(),
            activation_type,
        }
    }

    /// Wall-clock time as `HH.MM.SS:mmm`.
    pub fn human_readable_time(&self) -> String {
        self.timestamp.format("%H.%M.%S:%3f").to_string()
    }
}
