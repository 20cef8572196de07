//! Seam to the durable workflow engine that runs per-user journeys, plus
//! the transition payloads delivered to subscribers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{PulseError, PulseResult};

/// Segment transition payload signaled to a journey workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentUpdate {
    pub segment_id: Uuid,
    pub currently_in_segment: bool,
    /// Millisecond timestamp of the assignment backing this update; lets
    /// workflows discard out-of-date signals.
    pub segment_version: i64,
}

/// Transition payload delivered to an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ComputedPropertyUpdate {
    Segment(SegmentUpdate),
    UserProperty {
        user_property_id: Uuid,
        value: serde_json::Value,
        user_property_version: i64,
    },
}

/// Deterministic workflow id so repeated signals land on the same per-user
/// workflow.
pub fn user_journey_workflow_id(journey_id: Uuid, user_id: &str) -> String {
    format!("user-journey-{journey_id}-{user_id}")
}

/// Client seam to the workflow engine. `signal_with_start` must create the
/// workflow if absent and then signal it, so repeated calls are safe.
pub trait WorkflowClient: Send + Sync {
    fn signal_with_start(
        &self,
        workflow_id: &str,
        journey_id: Uuid,
        workspace_id: Uuid,
        user_id: &str,
        update: SegmentUpdate,
    ) -> PulseResult<()>;

    fn notify_integration(
        &self,
        integration_id: Uuid,
        workspace_id: Uuid,
        user_id: &str,
        update: ComputedPropertyUpdate,
    ) -> PulseResult<()>;
}

/// A journey signal captured by [`RecordingWorkflowClient`].
#[derive(Debug, Clone)]
pub struct RecordedSignal {
    pub workflow_id: String,
    pub journey_id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: String,
    pub update: SegmentUpdate,
}

/// An integration notification captured by [`RecordingWorkflowClient`].
#[derive(Debug, Clone)]
pub struct RecordedNotification {
    pub integration_id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: String,
    pub update: ComputedPropertyUpdate,
}

/// In-memory client that records deliveries for testing, with optional
/// per-journey failure injection.
#[derive(Default)]
pub struct RecordingWorkflowClient {
    signals: Mutex<Vec<RecordedSignal>>,
    notifications: Mutex<Vec<RecordedNotification>>,
    failing_journeys: Mutex<HashSet<Uuid>>,
}

impl RecordingWorkflowClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<RecordedSignal> {
        self.signals.lock().clone()
    }

    pub fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications.lock().clone()
    }

    pub fn signal_count(&self, journey_id: Uuid, user_id: &str) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|s| s.journey_id == journey_id && s.user_id == user_id)
            .count()
    }

    /// Make every signal to the given journey fail until cleared.
    pub fn fail_journey(&self, journey_id: Uuid) {
        self.failing_journeys.lock().insert(journey_id);
    }

    pub fn clear_failures(&self) {
        self.failing_journeys.lock().clear();
    }
}

impl WorkflowClient for RecordingWorkflowClient {
    fn signal_with_start(
        &self,
        workflow_id: &str,
        journey_id: Uuid,
        workspace_id: Uuid,
        user_id: &str,
        update: SegmentUpdate,
    ) -> PulseResult<()> {
        if self.failing_journeys.lock().contains(&journey_id) {
            return Err(PulseError::Dispatch(format!(
                "workflow engine unreachable for journey {journey_id}"
            )));
        }
        self.signals.lock().push(RecordedSignal {
            workflow_id: workflow_id.to_string(),
            journey_id,
            workspace_id,
            user_id: user_id.to_string(),
            update,
        });
        Ok(())
    }

    fn notify_integration(
        &self,
        integration_id: Uuid,
        workspace_id: Uuid,
        user_id: &str,
        update: ComputedPropertyUpdate,
    ) -> PulseResult<()> {
        self.notifications.lock().push(RecordedNotification {
            integration_id,
            workspace_id,
            user_id: user_id.to_string(),
            update,
        });
        Ok(())
    }
}
