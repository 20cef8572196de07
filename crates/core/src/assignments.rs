//! Persistence seam for "current truth" — the latest resolved segment
//! membership and user-property value per user.

use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::error::{PulseError, PulseResult};

/// Upsert seam for resolved assignments. Implementations return
/// [`PulseError::StaleReference`] when the target user, segment, or
/// property was deleted mid-cycle; callers treat that as a non-fatal skip.
pub trait AssignmentSink: Send + Sync {
    fn upsert_segment_assignment(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        segment_id: Uuid,
        in_segment: bool,
    ) -> PulseResult<()>;

    fn upsert_user_property_assignment(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        user_property_id: Uuid,
        value: &serde_json::Value,
    ) -> PulseResult<()>;
}

/// In-memory sink for tests and the development worker. Segments or
/// properties registered as stale reject upserts the way a dangling
/// foreign key would.
#[derive(Default)]
pub struct InMemoryAssignmentSink {
    segments: DashMap<(Uuid, String, Uuid), bool>,
    user_properties: DashMap<(Uuid, String, Uuid), serde_json::Value>,
    stale_targets: DashSet<Uuid>,
}

impl InMemoryAssignmentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_assignment(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        segment_id: Uuid,
    ) -> Option<bool> {
        self.segments
            .get(&(workspace_id, user_id.to_string(), segment_id))
            .map(|v| *v)
    }

    pub fn user_property_assignment(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        user_property_id: Uuid,
    ) -> Option<serde_json::Value> {
        self.user_properties
            .get(&(workspace_id, user_id.to_string(), user_property_id))
            .map(|v| v.clone())
    }

    /// Simulate a segment or property deleted mid-cycle.
    pub fn mark_stale(&self, target_id: Uuid) {
        self.stale_targets.insert(target_id);
    }
}

impl AssignmentSink for InMemoryAssignmentSink {
    fn upsert_segment_assignment(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        segment_id: Uuid,
        in_segment: bool,
    ) -> PulseResult<()> {
        if self.stale_targets.contains(&segment_id) {
            return Err(PulseError::StaleReference(format!(
                "segment {segment_id} no longer exists"
            )));
        }
        self.segments
            .insert((workspace_id, user_id.to_string(), segment_id), in_segment);
        Ok(())
    }

    fn upsert_user_property_assignment(
        &self,
        workspace_id: Uuid,
        user_id: &str,
        user_property_id: Uuid,
        value: &serde_json::Value,
    ) -> PulseResult<()> {
        if self.stale_targets.contains(&user_property_id) {
            return Err(PulseError::StaleReference(format!(
                "user property {user_property_id} no longer exists"
            )));
        }
        self.user_properties.insert(
            (workspace_id, user_id.to_string(), user_property_id),
            value.clone(),
        );
        Ok(())
    }
}
