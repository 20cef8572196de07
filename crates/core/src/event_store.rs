//! Aggregation contract against the analytical event store.
//!
//! The engine only requires windowed reads: given a workspace, a filter,
//! and a processing-time range, return matching event rows. Stores may
//! re-deliver rows; consumers merge idempotently by `message_id`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PulseResult;
use crate::json_path;
use crate::types::{compare_values, EventRow, EventType, ValueOperator};

/// Processing-time bounds for a query. `processed_after` is the incremental
/// lower bound recorded by a prior cycle; `None` scans from the beginning.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub processed_after: Option<DateTime<Utc>>,
    pub processed_before: DateTime<Utc>,
}

/// One conjunctive condition on a nested event property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCondition {
    pub path: String,
    pub operator: ValueOperator,
    pub value: serde_json::Value,
}

/// Restricts an aggregation query to a workspace-scoped slice of the event
/// log. An empty `event_names` list (or the `*` wildcard) matches any name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub event_names: Vec<String>,
    pub property_conditions: Vec<PropertyCondition>,
}

impl EventFilter {
    pub fn matches(&self, row: &EventRow) -> bool {
        if let Some(event_type) = self.event_type {
            if row.event_type != event_type {
                return false;
            }
        }
        if !self.event_names.is_empty()
            && !self
                .event_names
                .iter()
                .any(|name| name == "*" || name == &row.event_name)
        {
            return false;
        }
        self.property_conditions.iter().all(|condition| {
            let actual = json_path::extract(&row.properties, &condition.path);
            compare_values(actual, condition.operator, &condition.value)
        })
    }
}

/// Read seam to the analytical store.
pub trait EventStore: Send + Sync {
    fn query(
        &self,
        workspace_id: Uuid,
        filter: &EventFilter,
        range: &TimeRange,
    ) -> PulseResult<Vec<EventRow>>;
}

/// In-memory event store used by tests and the development worker.
/// Duplicate submissions are kept as-is; downstream merges dedupe.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<Uuid, Vec<EventRow>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    pub fn submit(&self, workspace_id: Uuid, row: EventRow) {
        self.events.entry(workspace_id).or_default().push(row);
    }

    pub fn event_count(&self, workspace_id: Uuid) -> usize {
        self.events.get(&workspace_id).map_or(0, |rows| rows.len())
    }
}

impl EventStore for InMemoryEventStore {
    fn query(
        &self,
        workspace_id: Uuid,
        filter: &EventFilter,
        range: &TimeRange,
    ) -> PulseResult<Vec<EventRow>> {
        let Some(rows) = self.events.get(&workspace_id) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|row| {
                if row.processing_time > range.processed_before {
                    return false;
                }
                if let Some(after) = range.processed_after {
                    if row.processing_time <= after {
                        return false;
                    }
                }
                filter.matches(row)
            })
            .cloned()
            .collect())
    }
}
