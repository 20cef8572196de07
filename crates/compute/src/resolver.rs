//! Assignment resolution — recursive evaluation of a definition's entry
//! node against the merged state fragments for one user.
//!
//! Resolution never errors: malformed or unresolvable leaves evaluate to
//! `false` (segments) or `Null` (user properties).

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use pulse_core::types::{compare_values, ComputedPropertyKind};
use pulse_definitions::bucket::in_random_bucket;
use pulse_definitions::reduce::{manual_segment_to_last_performed, reduce_segment_node};
use pulse_definitions::resources::{SegmentResource, UserPropertyResource};
use pulse_definitions::segment::{
    HasBeenComparator, RelationalOperator, SegmentNode, SegmentOperator, SubscriptionGroupType,
};
use pulse_definitions::state_id::{segment_node_state_id, user_property_state_id};
use pulse_definitions::user_property::{GroupNode, UserPropertyDefinition};

use crate::fragments::{FragmentStore, StateFragment, StateKey};

pub struct ResolveContext<'a> {
    pub fragments: &'a FragmentStore,
    /// The cycle's logical time. All window predicates compare against
    /// this, never wall clock, so historical reprocessing is deterministic.
    pub current_time: DateTime<Utc>,
}

fn segment_fragment(
    ctx: &ResolveContext<'_>,
    segment: &SegmentResource,
    node_id: &str,
    user_id: &str,
) -> Option<StateFragment> {
    ctx.fragments.get(&StateKey {
        workspace_id: segment.workspace_id,
        kind: ComputedPropertyKind::Segment,
        computed_property_id: segment.id,
        state_id: segment_node_state_id(segment, node_id),
        user_id: user_id.to_string(),
    })
}

fn user_property_fragment(
    ctx: &ResolveContext<'_>,
    user_property: &UserPropertyResource,
    node_id: &str,
    user_id: &str,
) -> Option<StateFragment> {
    ctx.fragments.get(&StateKey {
        workspace_id: user_property.workspace_id,
        kind: ComputedPropertyKind::UserProperty,
        computed_property_id: user_property.id,
        state_id: user_property_state_id(user_property, node_id),
        user_id: user_id.to_string(),
    })
}

/// Timestamps arrive as RFC 3339 strings or epoch numbers (seconds or
/// milliseconds).
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            s.parse::<i64>().ok().and_then(epoch_to_datetime)
        }
        serde_json::Value::Number(n) => n.as_i64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    // Heuristic: values past the year 33658 as seconds are milliseconds.
    if raw > 1_000_000_000_000 {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn count_satisfies(count: u64, comparator: RelationalOperator, times: u64) -> bool {
    match comparator {
        RelationalOperator::Equals => count == times,
        RelationalOperator::GreaterThanOrEqual => count >= times,
        RelationalOperator::LessThan => count < times,
    }
}

fn resolve_last_performed(
    fragment: Option<&StateFragment>,
    has_properties: &[pulse_core::event_store::PropertyCondition],
) -> bool {
    let Some(last) = fragment.and_then(|f| f.last.as_ref()) else {
        return false;
    };
    has_properties.iter().all(|condition| {
        let actual = pulse_core::json_path::extract(&last.value, &condition.path);
        compare_values(actual, condition.operator, &condition.value)
    })
}

fn resolve_segment_node(
    ctx: &ResolveContext<'_>,
    segment: &SegmentResource,
    node: &SegmentNode,
    user_id: &str,
) -> bool {
    match node {
        SegmentNode::And { children, .. } => children.iter().all(|child| {
            match segment.definition.node_by_id(child) {
                Some(child_node) => resolve_segment_node(ctx, segment, child_node, user_id),
                None => {
                    warn!(segment_id = %segment.id, child = %child, "and child node not found");
                    false
                }
            }
        }),
        SegmentNode::Or { children, .. } => children.iter().any(|child| {
            match segment.definition.node_by_id(child) {
                Some(child_node) => resolve_segment_node(ctx, segment, child_node, user_id),
                None => {
                    warn!(segment_id = %segment.id, child = %child, "or child node not found");
                    false
                }
            }
        }),
        SegmentNode::Trait { id, path, operator } => {
            if path.is_empty() {
                return false;
            }
            let fragment = segment_fragment(ctx, segment, id, user_id);
            let last = fragment.as_ref().and_then(|f| f.last.as_ref());
            match operator {
                SegmentOperator::Equals { value } => {
                    compare_values(
                        last.map(|l| &l.value),
                        pulse_core::types::ValueOperator::Equals,
                        value,
                    )
                }
                SegmentOperator::NotEquals { value } => {
                    // Requires an observed trait; unknown users do not
                    // qualify by omission.
                    last.is_some()
                        && compare_values(
                            last.map(|l| &l.value),
                            pulse_core::types::ValueOperator::NotEquals,
                            value,
                        )
                }
                SegmentOperator::Exists => last.is_some(),
                SegmentOperator::Within { window_seconds } => {
                    let Some(observed) = last.and_then(|l| parse_timestamp(&l.value)) else {
                        return false;
                    };
                    let elapsed = (ctx.current_time - observed).num_seconds();
                    elapsed < *window_seconds as i64
                }
                SegmentOperator::HasBeen {
                    comparator,
                    value,
                    window_seconds,
                } => {
                    let holds = compare_values(
                        last.map(|l| &l.value),
                        pulse_core::types::ValueOperator::Equals,
                        value,
                    );
                    if !holds {
                        return false;
                    }
                    let Some(since) = fragment.as_ref().and_then(|f| f.max_event_time) else {
                        return false;
                    };
                    let held_for = (ctx.current_time - since).num_seconds();
                    match comparator {
                        HasBeenComparator::Gte => held_for >= *window_seconds as i64,
                        HasBeenComparator::Lt => held_for < *window_seconds as i64,
                    }
                }
            }
        }
        SegmentNode::Performed {
            id,
            times,
            comparator,
            within_seconds,
            ..
        } => {
            let fragment = segment_fragment(ctx, segment, id, user_id);
            // Absence of state is a valid "never performed" count of zero,
            // not an unresolved value.
            let count = match (&fragment, within_seconds) {
                (None, _) => 0,
                (Some(f), Some(window)) => {
                    let cutoff = ctx.current_time - chrono::Duration::seconds(*window as i64);
                    f.occurrences
                        .values()
                        .filter(|o| o.event_time > cutoff)
                        .count() as u64
                }
                (Some(f), None) => f.unique_count() as u64,
            };
            count_satisfies(count, *comparator, *times)
        }
        SegmentNode::LastPerformed {
            id, has_properties, ..
        } => resolve_last_performed(
            segment_fragment(ctx, segment, id, user_id).as_ref(),
            has_properties,
        ),
        SegmentNode::SubscriptionGroup { id, group_type, .. } => {
            let fragment = segment_fragment(ctx, segment, id, user_id);
            match (&fragment, group_type) {
                // No subscription-change event yet: opt-out groups include
                // by default, opt-in groups require explicit action.
                (None, SubscriptionGroupType::OptOut) => true,
                (None, SubscriptionGroupType::OptIn) => false,
                (Some(_), _) => match reduce_segment_node(node) {
                    SegmentNode::LastPerformed { has_properties, .. } => {
                        resolve_last_performed(fragment.as_ref(), &has_properties)
                    }
                    _ => false,
                },
            }
        }
        SegmentNode::ManualSegment { id, version } => {
            let reduced = manual_segment_to_last_performed(id, segment.id, *version);
            match reduced {
                SegmentNode::LastPerformed { has_properties, .. } => resolve_last_performed(
                    segment_fragment(ctx, segment, id, user_id).as_ref(),
                    &has_properties,
                ),
                _ => false,
            }
        }
        SegmentNode::Broadcast { .. } | SegmentNode::Email { .. } => {
            match reduce_segment_node(node) {
                SegmentNode::Performed {
                    id,
                    times,
                    comparator,
                    ..
                } => {
                    let count = segment_fragment(ctx, segment, &id, user_id)
                        .map_or(0, |f| f.unique_count() as u64);
                    count_satisfies(count, comparator, times)
                }
                _ => false,
            }
        }
        SegmentNode::RandomBucket { percent, .. } => {
            in_random_bucket(segment.id, user_id, *percent)
        }
    }
}

/// Resolves the current boolean assignment of a segment for one user.
pub fn resolve_segment(
    ctx: &ResolveContext<'_>,
    segment: &SegmentResource,
    user_id: &str,
) -> bool {
    resolve_segment_node(ctx, segment, &segment.definition.entry_node, user_id)
}

fn non_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn resolve_group_node(
    ctx: &ResolveContext<'_>,
    user_property: &UserPropertyResource,
    nodes: &[GroupNode],
    node_id: &str,
    user_id: &str,
) -> serde_json::Value {
    let Some(node) = UserPropertyDefinition::group_node_by_id(nodes, node_id) else {
        warn!(user_property_id = %user_property.id, node_id = %node_id, "group node not found");
        return serde_json::Value::Null;
    };
    match node {
        GroupNode::AnyOf { children, .. } => children
            .iter()
            .map(|child| resolve_group_node(ctx, user_property, nodes, child, user_id))
            .find(non_empty)
            .unwrap_or(serde_json::Value::Null),
        GroupNode::Trait { id, .. } => user_property_fragment(ctx, user_property, id, user_id)
            .and_then(|f| f.last.map(|l| l.value))
            .unwrap_or(serde_json::Value::Null),
    }
}

/// Resolves the current JSON assignment of a user property for one user.
pub fn resolve_user_property(
    ctx: &ResolveContext<'_>,
    user_property: &UserPropertyResource,
    user_id: &str,
) -> serde_json::Value {
    match &user_property.definition {
        UserPropertyDefinition::Id => json!(user_id),
        UserPropertyDefinition::Trait { .. } | UserPropertyDefinition::AnonymousId => {
            user_property_fragment(ctx, user_property, "", user_id)
                .and_then(|f| f.last.map(|l| l.value))
                .unwrap_or(serde_json::Value::Null)
        }
        UserPropertyDefinition::Performed { id, .. } => {
            user_property_fragment(ctx, user_property, id, user_id)
                .and_then(|f| f.last.map(|l| l.value))
                .unwrap_or(serde_json::Value::Null)
        }
        UserPropertyDefinition::PerformedMany { .. } => {
            let Some(fragment) = user_property_fragment(ctx, user_property, "", user_id) else {
                return json!([]);
            };
            let mut occurrences: Vec<_> = fragment.occurrences.values().cloned().collect();
            occurrences.sort_by(|a, b| b.event_time.cmp(&a.event_time));
            json!(occurrences
                .into_iter()
                .map(|o| {
                    json!({
                        "event": o.event,
                        "timestamp": o.event_time.to_rfc3339(),
                        "properties": o.properties,
                    })
                })
                .collect::<Vec<_>>())
        }
        UserPropertyDefinition::Group { entry, nodes } => {
            resolve_group_node(ctx, user_property, nodes, entry, user_id)
        }
    }
}
