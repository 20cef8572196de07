//! State aggregation — compiles memory-bearing definition nodes into
//! windowed aggregation requests and folds the resulting event rows into
//! state fragments.
//!
//! Combinators (`And`/`Or`, `AnyOf`) are stateless and compile to nothing;
//! every leaf owns exactly one request keyed by its state id.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;
use uuid::Uuid;

use pulse_core::error::PulseResult;
use pulse_core::event_store::{EventFilter, EventStore, TimeRange};
use pulse_core::types::{ComputedPropertyKind, EventRow, EventType};
use pulse_core::json_path;
use pulse_definitions::reduce::{manual_segment_to_last_performed, reduce_segment_node};
use pulse_definitions::resources::{SegmentResource, UserPropertyResource};
use pulse_definitions::segment::SegmentNode;
use pulse_definitions::state_id::{segment_node_state_id, user_property_state_id};
use pulse_definitions::user_property::{GroupNode, UserPropertyDefinition};

use crate::fragments::{FragmentStore, Occurrence, StateFragment, StateKey, TimedValue};

/// Which field of a matching event feeds the fragment's last value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExtractor {
    /// A nested property of the event payload.
    Property { path: String },
    /// The whole event payload.
    Properties,
    /// The event's user id.
    UserId,
    /// The event's anonymous id.
    AnonymousId,
}

/// One windowed aggregation over the event log.
#[derive(Debug, Clone)]
pub struct AggregationRequest {
    pub state_id: Uuid,
    pub node_id: String,
    pub filter: EventFilter,
    pub extractor: Option<ValueExtractor>,
    /// Record the message id into the distinct set (occurrence counting).
    pub track_distinct: bool,
    /// Keep per-occurrence rows for windowed counting or list values.
    pub record_occurrences: bool,
    /// Event times of recorded occurrences are rounded to buckets derived
    /// from this window to bound state cardinality.
    pub window_seconds: Option<u64>,
}

/// Bucket width for rounding occurrence times: a tenth of the window,
/// clamped to [30s, 1 day].
pub fn event_time_bucket_seconds(window_seconds: u64) -> u64 {
    (window_seconds / 10).clamp(30, 86_400)
}

fn bucket_event_time(event_time: DateTime<Utc>, window_seconds: u64) -> DateTime<Utc> {
    let interval = event_time_bucket_seconds(window_seconds) as i64;
    let ts = event_time.timestamp();
    Utc.timestamp_opt(ts - ts.rem_euclid(interval), 0)
        .single()
        .unwrap_or(event_time)
}

fn request_for_node(segment: &SegmentResource, node: &SegmentNode) -> Option<AggregationRequest> {
    let reduced = match node {
        SegmentNode::ManualSegment { id, version } => {
            manual_segment_to_last_performed(id, segment.id, *version)
        }
        other => reduce_segment_node(other),
    };
    match &reduced {
        SegmentNode::Trait { id, path, .. } => {
            if path.is_empty() {
                warn!(segment_id = %segment.id, node_id = %id, "trait node has empty path, skipping aggregation");
                return None;
            }
            Some(AggregationRequest {
                state_id: segment_node_state_id(segment, id),
                node_id: id.clone(),
                filter: EventFilter {
                    event_type: Some(EventType::Identify),
                    event_names: vec![],
                    property_conditions: vec![],
                },
                extractor: Some(ValueExtractor::Property { path: path.clone() }),
                track_distinct: false,
                record_occurrences: false,
                window_seconds: None,
            })
        }
        SegmentNode::Performed {
            id,
            event,
            properties,
            within_seconds,
            ..
        } => Some(AggregationRequest {
            state_id: segment_node_state_id(segment, id),
            node_id: id.clone(),
            filter: EventFilter {
                event_type: Some(EventType::Track),
                event_names: vec![event.clone()],
                property_conditions: properties.clone(),
            },
            extractor: None,
            track_distinct: within_seconds.is_none(),
            record_occurrences: within_seconds.is_some(),
            window_seconds: *within_seconds,
        }),
        SegmentNode::LastPerformed {
            id,
            event,
            where_properties,
            ..
        } => Some(AggregationRequest {
            state_id: segment_node_state_id(segment, id),
            node_id: id.clone(),
            filter: EventFilter {
                event_type: Some(EventType::Track),
                event_names: vec![event.clone()],
                property_conditions: where_properties.clone(),
            },
            extractor: Some(ValueExtractor::Properties),
            track_distinct: false,
            record_occurrences: false,
            window_seconds: None,
        }),
        // Stateless nodes: combinators and hash-based inclusion.
        SegmentNode::And { .. } | SegmentNode::Or { .. } | SegmentNode::RandomBucket { .. } => None,
        // Reduction rewrites these away.
        SegmentNode::SubscriptionGroup { .. }
        | SegmentNode::Broadcast { .. }
        | SegmentNode::Email { .. }
        | SegmentNode::ManualSegment { .. } => None,
    }
}

/// Compiles every memory-bearing node of a segment into its aggregation
/// request.
pub fn compile_segment(segment: &SegmentResource) -> Vec<AggregationRequest> {
    segment
        .definition
        .all_nodes()
        .filter_map(|node| request_for_node(segment, node))
        .collect()
}

/// Compiles a user property. Root-level leaves use the empty node id, the
/// way grouped children use their own.
pub fn compile_user_property(user_property: &UserPropertyResource) -> Vec<AggregationRequest> {
    match &user_property.definition {
        UserPropertyDefinition::Trait { path } => {
            if path.is_empty() {
                warn!(user_property_id = %user_property.id, "trait user property has empty path, skipping aggregation");
                return vec![];
            }
            vec![AggregationRequest {
                state_id: user_property_state_id(user_property, ""),
                node_id: String::new(),
                filter: EventFilter {
                    event_type: Some(EventType::Identify),
                    event_names: vec![],
                    property_conditions: vec![],
                },
                extractor: Some(ValueExtractor::Property { path: path.clone() }),
                track_distinct: false,
                record_occurrences: false,
                window_seconds: None,
            }]
        }
        UserPropertyDefinition::Id => vec![AggregationRequest {
            state_id: user_property_state_id(user_property, ""),
            node_id: String::new(),
            filter: EventFilter::default(),
            extractor: Some(ValueExtractor::UserId),
            track_distinct: false,
            record_occurrences: false,
            window_seconds: None,
        }],
        UserPropertyDefinition::AnonymousId => vec![AggregationRequest {
            state_id: user_property_state_id(user_property, ""),
            node_id: String::new(),
            filter: EventFilter::default(),
            extractor: Some(ValueExtractor::AnonymousId),
            track_distinct: false,
            record_occurrences: false,
            window_seconds: None,
        }],
        UserPropertyDefinition::Performed {
            id,
            event,
            path,
            properties,
        } => {
            if path.is_empty() {
                warn!(user_property_id = %user_property.id, node_id = %id, "performed user property has empty path, skipping aggregation");
                return vec![];
            }
            vec![AggregationRequest {
                state_id: user_property_state_id(user_property, id),
                node_id: id.clone(),
                filter: EventFilter {
                    event_type: Some(EventType::Track),
                    event_names: vec![event.clone()],
                    property_conditions: properties.clone(),
                },
                extractor: Some(ValueExtractor::Property { path: path.clone() }),
                track_distinct: false,
                record_occurrences: false,
                window_seconds: None,
            }]
        }
        UserPropertyDefinition::PerformedMany { events } => vec![AggregationRequest {
            state_id: user_property_state_id(user_property, ""),
            node_id: String::new(),
            filter: EventFilter {
                event_type: Some(EventType::Track),
                event_names: events.clone(),
                property_conditions: vec![],
            },
            extractor: None,
            track_distinct: false,
            record_occurrences: true,
            window_seconds: None,
        }],
        UserPropertyDefinition::Group { nodes, .. } => nodes
            .iter()
            .filter_map(|node| match node {
                GroupNode::AnyOf { .. } => None,
                GroupNode::Trait { id, path } => {
                    if path.is_empty() {
                        warn!(user_property_id = %user_property.id, node_id = %id, "group trait node has empty path, skipping aggregation");
                        return None;
                    }
                    Some(AggregationRequest {
                        state_id: user_property_state_id(user_property, id),
                        node_id: id.clone(),
                        filter: EventFilter {
                            event_type: Some(EventType::Identify),
                            event_names: vec![],
                            property_conditions: vec![],
                        },
                        extractor: Some(ValueExtractor::Property { path: path.clone() }),
                        track_distinct: false,
                        record_occurrences: false,
                        window_seconds: None,
                    })
                }
            })
            .collect(),
    }
}

fn extract_value(extractor: &ValueExtractor, row: &EventRow) -> Option<serde_json::Value> {
    match extractor {
        ValueExtractor::Property { path } => json_path::extract(&row.properties, path).cloned(),
        ValueExtractor::Properties => Some(row.properties.clone()),
        ValueExtractor::UserId => Some(serde_json::Value::String(row.user_id.clone())),
        ValueExtractor::AnonymousId => row
            .anonymous_id
            .as_ref()
            .map(|id| serde_json::Value::String(id.clone())),
    }
}

fn fold_row(request: &AggregationRequest, row: &EventRow) -> Option<StateFragment> {
    let mut fragment = StateFragment {
        max_event_time: Some(row.event_time),
        ..Default::default()
    };
    let mut touched = false;

    if let Some(extractor) = &request.extractor {
        if let Some(value) = extract_value(extractor, row) {
            fragment.last = Some(TimedValue {
                value,
                event_time: row.event_time,
                message_id: row.message_id.clone(),
            });
            touched = true;
        }
    }
    if request.track_distinct {
        fragment.distinct.insert(row.message_id.clone());
        touched = true;
    }
    if request.record_occurrences {
        let event_time = match request.window_seconds {
            Some(window) => bucket_event_time(row.event_time, window),
            None => row.event_time,
        };
        fragment.occurrences.insert(
            row.message_id.clone(),
            Occurrence {
                event: row.event_name.clone(),
                event_time,
                properties: row.properties.clone(),
            },
        );
        touched = true;
    }

    touched.then_some(fragment)
}

/// Executes the requests for one computed property and merges the results
/// into the fragment store. Returns every user whose state was touched.
pub fn run_requests(
    store: &dyn EventStore,
    fragments: &FragmentStore,
    workspace_id: Uuid,
    kind: ComputedPropertyKind,
    computed_property_id: Uuid,
    requests: &[AggregationRequest],
    range: &TimeRange,
) -> PulseResult<BTreeSet<String>> {
    let mut affected = BTreeSet::new();
    for request in requests {
        let rows = store.query(workspace_id, &request.filter, range)?;
        for row in &rows {
            let Some(delta) = fold_row(request, row) else {
                continue;
            };
            fragments.merge_into(
                StateKey {
                    workspace_id,
                    kind,
                    computed_property_id,
                    state_id: request.state_id,
                    user_id: row.user_id.clone(),
                },
                delta,
            );
            affected.insert(row.user_id.clone());
        }
    }
    Ok(affected)
}
