//! Segment definition trees — leaf conditions plus combinators, stored as
//! an arena of nodes referenced by id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pulse_core::event_store::PropertyCondition;

/// Comparison applied by a `Trait` node to the last observed trait value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SegmentOperator {
    Equals {
        value: serde_json::Value,
    },
    NotEquals {
        value: serde_json::Value,
    },
    Exists,
    /// The trait value is a timestamp within `window_seconds` of the
    /// cycle's logical time.
    Within {
        window_seconds: u64,
    },
    /// The trait has held `value` for at least (`Gte`) or less than (`Lt`)
    /// `window_seconds`, measured against the last time it was set.
    HasBeen {
        comparator: HasBeenComparator,
        value: serde_json::Value,
        window_seconds: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HasBeenComparator {
    Gte,
    Lt,
}

/// Comparator applied to a `Performed` node's occurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationalOperator {
    Equals,
    #[default]
    GreaterThanOrEqual,
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionGroupType {
    OptIn,
    OptOut,
}

/// Message lifecycle event an `Email` node matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailEvent {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
}

fn default_times() -> u64 {
    1
}

/// One node of a segment definition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SegmentNode {
    Trait {
        id: String,
        path: String,
        operator: SegmentOperator,
    },
    Performed {
        id: String,
        event: String,
        #[serde(default = "default_times")]
        times: u64,
        #[serde(default)]
        comparator: RelationalOperator,
        #[serde(default)]
        properties: Vec<PropertyCondition>,
        #[serde(default)]
        within_seconds: Option<u64>,
    },
    /// The newest occurrence matching `where_properties` is selected, then
    /// `has_properties` are evaluated against that occurrence.
    LastPerformed {
        id: String,
        event: String,
        #[serde(default)]
        where_properties: Vec<PropertyCondition>,
        #[serde(default)]
        has_properties: Vec<PropertyCondition>,
    },
    And {
        id: String,
        children: Vec<String>,
    },
    Or {
        id: String,
        children: Vec<String>,
    },
    SubscriptionGroup {
        id: String,
        subscription_group_id: Uuid,
        group_type: SubscriptionGroupType,
    },
    Broadcast {
        id: String,
        broadcast_id: Uuid,
    },
    Email {
        id: String,
        event: EmailEvent,
        template_id: Uuid,
    },
    /// Membership maintained by explicit add/remove internal events,
    /// scoped to the segment's current version.
    ManualSegment {
        id: String,
        version: u64,
    },
    /// Deterministic hash-based inclusion of `percent` of users.
    RandomBucket {
        id: String,
        percent: f64,
    },
}

impl SegmentNode {
    pub fn id(&self) -> &str {
        match self {
            SegmentNode::Trait { id, .. }
            | SegmentNode::Performed { id, .. }
            | SegmentNode::LastPerformed { id, .. }
            | SegmentNode::And { id, .. }
            | SegmentNode::Or { id, .. }
            | SegmentNode::SubscriptionGroup { id, .. }
            | SegmentNode::Broadcast { id, .. }
            | SegmentNode::Email { id, .. }
            | SegmentNode::ManualSegment { id, .. }
            | SegmentNode::RandomBucket { id, .. } => id,
        }
    }

    /// Child node ids for combinators; leaves have none.
    pub fn children(&self) -> &[String] {
        match self {
            SegmentNode::And { children, .. } | SegmentNode::Or { children, .. } => children,
            _ => &[],
        }
    }
}

/// A segment computation tree: an entry node plus an arena of nodes
/// referenced by id. Traversal is always by id lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDefinition {
    pub entry_node: SegmentNode,
    #[serde(default)]
    pub nodes: Vec<SegmentNode>,
}

impl SegmentDefinition {
    pub fn node_by_id(&self, id: &str) -> Option<&SegmentNode> {
        if self.entry_node.id() == id {
            return Some(&self.entry_node);
        }
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Entry node plus every arena node, entry first.
    pub fn all_nodes(&self) -> impl Iterator<Item = &SegmentNode> {
        std::iter::once(&self.entry_node).chain(self.nodes.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_round_trips_through_json() {
        let definition = SegmentDefinition {
            entry_node: SegmentNode::And {
                id: "1".to_string(),
                children: vec!["2".to_string(), "3".to_string()],
            },
            nodes: vec![
                SegmentNode::Trait {
                    id: "2".to_string(),
                    path: "status".to_string(),
                    operator: SegmentOperator::Equals {
                        value: json!("active"),
                    },
                },
                SegmentNode::Performed {
                    id: "3".to_string(),
                    event: "order_completed".to_string(),
                    times: 2,
                    comparator: RelationalOperator::GreaterThanOrEqual,
                    properties: vec![],
                    within_seconds: Some(86400),
                },
            ],
        };
        let encoded = serde_json::to_string(&definition).unwrap();
        let decoded: SegmentDefinition = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, definition);
    }

    #[test]
    fn test_performed_defaults() {
        let decoded: SegmentNode = serde_json::from_value(json!({
            "type": "performed",
            "id": "1",
            "event": "signup"
        }))
        .unwrap();
        match decoded {
            SegmentNode::Performed {
                times, comparator, ..
            } => {
                assert_eq!(times, 1);
                assert_eq!(comparator, RelationalOperator::GreaterThanOrEqual);
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_node_lookup_includes_entry() {
        let definition = SegmentDefinition {
            entry_node: SegmentNode::Or {
                id: "root".to_string(),
                children: vec!["leaf".to_string()],
            },
            nodes: vec![SegmentNode::Trait {
                id: "leaf".to_string(),
                path: "plan".to_string(),
                operator: SegmentOperator::Exists,
            }],
        };
        assert!(definition.node_by_id("root").is_some());
        assert!(definition.node_by_id("leaf").is_some());
        assert!(definition.node_by_id("missing").is_none());
    }
}
