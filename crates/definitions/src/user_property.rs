//! User-property definition trees. Unlike segments these resolve to an
//! arbitrary JSON value rather than a boolean.

use serde::{Deserialize, Serialize};

use pulse_core::event_store::PropertyCondition;

/// A leaf inside a `Group` user property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GroupNode {
    /// First child with a non-empty resolved value wins, in order.
    AnyOf { id: String, children: Vec<String> },
    Trait { id: String, path: String },
}

impl GroupNode {
    pub fn id(&self) -> &str {
        match self {
            GroupNode::AnyOf { id, .. } | GroupNode::Trait { id, .. } => id,
        }
    }
}

/// A user-property computation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum UserPropertyDefinition {
    /// Last observed value at `path` from identify events.
    Trait { path: String },
    /// Identity passthrough: the user id itself.
    Id,
    /// Identity passthrough: the last observed anonymous id.
    AnonymousId,
    /// A property of the newest qualifying track event.
    Performed {
        id: String,
        event: String,
        path: String,
        #[serde(default)]
        properties: Vec<PropertyCondition>,
    },
    /// Ordered list of every occurrence of the named events, newest first.
    PerformedMany { events: Vec<String> },
    /// Composite property: entry id plus an arena of group nodes.
    Group { entry: String, nodes: Vec<GroupNode> },
}

impl UserPropertyDefinition {
    pub fn group_node_by_id<'a>(nodes: &'a [GroupNode], id: &str) -> Option<&'a GroupNode> {
        nodes.iter().find(|node| node.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_definition_round_trips() {
        let definition = UserPropertyDefinition::Group {
            entry: "1".to_string(),
            nodes: vec![
                GroupNode::AnyOf {
                    id: "1".to_string(),
                    children: vec!["2".to_string(), "3".to_string()],
                },
                GroupNode::Trait {
                    id: "2".to_string(),
                    path: "email1".to_string(),
                },
                GroupNode::Trait {
                    id: "3".to_string(),
                    path: "email2".to_string(),
                },
            ],
        };
        let encoded = serde_json::to_value(&definition).unwrap();
        assert_eq!(encoded["type"], json!("group"));
        let decoded: UserPropertyDefinition = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, definition);
    }
}
