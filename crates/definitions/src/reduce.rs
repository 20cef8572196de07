//! Reductions of high-level nodes onto the event log.
//!
//! SubscriptionGroup, Broadcast, Email, and ManualSegment nodes do not
//! aggregate their own event shapes; they rewrite into Performed or
//! LastPerformed nodes over internal events, keeping the original node id
//! so state ids are unaffected.

use serde_json::json;
use uuid::Uuid;

use pulse_core::event_store::PropertyCondition;
use pulse_core::types::{
    InternalEvent, ManualSegmentOperation, SubscriptionAction, ValueOperator,
};

use crate::segment::{EmailEvent, RelationalOperator, SegmentNode, SubscriptionGroupType};

/// A subscription-group node reduces to the newest subscription-change
/// event for that group. Opt-in groups require an explicit subscribe;
/// opt-out groups require that the newest action is not an unsubscribe
/// (absence of any event is handled by the resolver's opt-out default).
pub fn subscription_group_to_last_performed(
    node_id: &str,
    subscription_group_id: Uuid,
    group_type: SubscriptionGroupType,
) -> SegmentNode {
    let has_properties = match group_type {
        SubscriptionGroupType::OptIn => vec![PropertyCondition {
            path: "action".to_string(),
            operator: ValueOperator::Equals,
            value: json!(SubscriptionAction::Subscribe.as_str()),
        }],
        SubscriptionGroupType::OptOut => vec![PropertyCondition {
            path: "action".to_string(),
            operator: ValueOperator::NotEquals,
            value: json!(SubscriptionAction::Unsubscribe.as_str()),
        }],
    };
    SegmentNode::LastPerformed {
        id: node_id.to_string(),
        event: InternalEvent::SubscriptionChange.as_str().to_string(),
        where_properties: vec![PropertyCondition {
            path: "subscription_group_id".to_string(),
            operator: ValueOperator::Equals,
            value: json!(subscription_group_id.to_string()),
        }],
        has_properties,
    }
}

/// Membership follows the newest add/remove operation recorded for the
/// segment's current version.
pub fn manual_segment_to_last_performed(
    node_id: &str,
    segment_id: Uuid,
    version: u64,
) -> SegmentNode {
    SegmentNode::LastPerformed {
        id: node_id.to_string(),
        event: InternalEvent::ManualSegmentUpdate.as_str().to_string(),
        where_properties: vec![
            PropertyCondition {
                path: "segment_id".to_string(),
                operator: ValueOperator::Equals,
                value: json!(segment_id.to_string()),
            },
            PropertyCondition {
                path: "version".to_string(),
                operator: ValueOperator::Equals,
                value: json!(version),
            },
        ],
        has_properties: vec![PropertyCondition {
            path: "operation".to_string(),
            operator: ValueOperator::Equals,
            value: json!(ManualSegmentOperation::Add.as_str()),
        }],
    }
}

pub fn broadcast_to_performed(node_id: &str, broadcast_id: Uuid) -> SegmentNode {
    SegmentNode::Performed {
        id: node_id.to_string(),
        event: InternalEvent::BroadcastSent.as_str().to_string(),
        times: 1,
        comparator: RelationalOperator::GreaterThanOrEqual,
        properties: vec![PropertyCondition {
            path: "broadcast_id".to_string(),
            operator: ValueOperator::Equals,
            value: json!(broadcast_id.to_string()),
        }],
        within_seconds: None,
    }
}

pub fn email_to_performed(node_id: &str, event: EmailEvent, template_id: Uuid) -> SegmentNode {
    let internal = match event {
        EmailEvent::Sent => InternalEvent::EmailSent,
        EmailEvent::Delivered => InternalEvent::EmailDelivered,
        EmailEvent::Opened => InternalEvent::EmailOpened,
        EmailEvent::Clicked => InternalEvent::EmailClicked,
        EmailEvent::Bounced => InternalEvent::EmailBounced,
    };
    SegmentNode::Performed {
        id: node_id.to_string(),
        event: internal.as_str().to_string(),
        times: 1,
        comparator: RelationalOperator::GreaterThanOrEqual,
        properties: vec![PropertyCondition {
            path: "template_id".to_string(),
            operator: ValueOperator::Equals,
            value: json!(template_id.to_string()),
        }],
        within_seconds: None,
    }
}

/// Rewrites a node into its event-log form, or returns it unchanged when
/// no reduction applies.
pub fn reduce_segment_node(node: &SegmentNode) -> SegmentNode {
    match node {
        SegmentNode::SubscriptionGroup {
            id,
            subscription_group_id,
            group_type,
        } => subscription_group_to_last_performed(id, *subscription_group_id, *group_type),
        SegmentNode::ManualSegment { id, version } => {
            // The manual-segment node rewrites relative to its owning
            // segment; callers that know the segment id use
            // `manual_segment_to_last_performed` directly.
            SegmentNode::ManualSegment {
                id: id.clone(),
                version: *version,
            }
        }
        SegmentNode::Broadcast { id, broadcast_id } => broadcast_to_performed(id, *broadcast_id),
        SegmentNode::Email {
            id,
            event,
            template_id,
        } => email_to_performed(id, *event, *template_id),
        other => other.clone(),
    }
}
