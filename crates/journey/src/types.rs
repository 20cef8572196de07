use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a journey definition. Only running journeys
/// subscribe to segment transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    NotStarted,
    Running,
    Paused,
}

/// What admits a user into a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JourneyEntry {
    /// Enter when the user joins the segment.
    Segment { segment_id: Uuid, child: String },
    /// Enter when the user performs the event.
    Event { event: String, child: String },
}

/// A non-entry node of a journey definition. Only the variants that can
/// reference segments matter to the engine; message and delay nodes are
/// carried for reachability walks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JourneyNode {
    SegmentSplit {
        id: String,
        segment_id: Uuid,
        true_child: String,
        false_child: String,
    },
    WaitFor {
        id: String,
        segment_id: Uuid,
        child: String,
        timeout_seconds: u64,
        timeout_child: String,
    },
    Message {
        id: String,
        child: String,
    },
    Delay {
        id: String,
        seconds: u64,
        child: String,
    },
    Exit {
        id: String,
    },
}

impl JourneyNode {
    pub fn id(&self) -> &str {
        match self {
            JourneyNode::SegmentSplit { id, .. }
            | JourneyNode::WaitFor { id, .. }
            | JourneyNode::Message { id, .. }
            | JourneyNode::Delay { id, .. }
            | JourneyNode::Exit { id } => id,
        }
    }

    /// Ids of nodes reachable in one step.
    pub fn child_ids(&self) -> Vec<&str> {
        match self {
            JourneyNode::SegmentSplit {
                true_child,
                false_child,
                ..
            } => vec![true_child, false_child],
            JourneyNode::WaitFor {
                child,
                timeout_child,
                ..
            } => vec![child, timeout_child],
            JourneyNode::Message { child, .. } | JourneyNode::Delay { child, .. } => vec![child],
            JourneyNode::Exit { .. } => vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyDefinition {
    pub entry: JourneyEntry,
    #[serde(default)]
    pub nodes: Vec<JourneyNode>,
}

impl JourneyDefinition {
    pub fn node_by_id(&self, id: &str) -> Option<&JourneyNode> {
        self.nodes.iter().find(|node| node.id() == id)
    }
}

/// A saved journey as consumed for subscription derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyResource {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub status: JourneyStatus,
    pub definition: JourneyDefinition,
    pub updated_at: DateTime<Utc>,
}

/// Dependencies an integration declares on computed properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationDefinition {
    #[serde(default)]
    pub subscribed_segments: Vec<Uuid>,
    #[serde(default)]
    pub subscribed_user_properties: Vec<Uuid>,
}

/// A saved integration as consumed for subscription derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationResource {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub definition: IntegrationDefinition,
}
