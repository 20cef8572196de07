//! Diff & dispatch — compares fresh assignments against the last processed
//! record per subscriber and delivers only genuine transitions.
//!
//! Persisted truth and consumer notification are independent streams: each
//! `(property, user, subscriber)` triple keeps its own processed record,
//! written only after a confirmed delivery. At-least-once processing plus
//! this compare gives exactly-once per distinct assignment value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

use pulse_core::assignments::AssignmentSink;
use pulse_core::error::{PulseError, PulseResult};
use pulse_core::types::ComputedPropertyKind;
use pulse_core::workflow::{
    user_journey_workflow_id, ComputedPropertyUpdate, SegmentUpdate, WorkflowClient,
};
use pulse_subscriptions::{Consumer, SubscriptionMap};

/// Who an assignment was processed for: the persistence layer itself, or a
/// notified consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessedFor {
    PersistTruth,
    Journey(Uuid),
    Integration(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProcessedKey {
    workspace_id: Uuid,
    kind: ComputedPropertyKind,
    computed_property_id: Uuid,
    user_id: String,
    processed_for: ProcessedFor,
}

/// The resolved current value of one computed property for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub workspace_id: Uuid,
    pub computed_property_id: Uuid,
    pub user_id: String,
    pub value: AssignmentValue,
    pub max_event_time: Option<DateTime<Utc>>,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentValue {
    Segment(bool),
    UserProperty(serde_json::Value),
}

impl AssignmentValue {
    pub fn kind(&self) -> ComputedPropertyKind {
        match self {
            AssignmentValue::Segment(_) => ComputedPropertyKind::Segment,
            AssignmentValue::UserProperty(_) => ComputedPropertyKind::UserProperty,
        }
    }

    fn as_json(&self) -> serde_json::Value {
        match self {
            AssignmentValue::Segment(value) => json!(value),
            AssignmentValue::UserProperty(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub examined: usize,
    pub persisted: usize,
    pub signaled: usize,
    pub notified: usize,
    pub skipped_stale: usize,
    pub failed: usize,
}

impl DispatchStats {
    pub fn merge(&mut self, other: DispatchStats) {
        self.examined += other.examined;
        self.persisted += other.persisted;
        self.signaled += other.signaled;
        self.notified += other.notified;
        self.skipped_stale += other.skipped_stale;
        self.failed += other.failed;
    }
}

/// Compares assignments to processed records and fans transitions out to
/// the persistence sink, subscribed journeys, and integrations.
pub struct DispatchEngine {
    workflow: Arc<dyn WorkflowClient>,
    sink: Arc<dyn AssignmentSink>,
    processed: DashMap<ProcessedKey, serde_json::Value>,
}

impl DispatchEngine {
    pub fn new(workflow: Arc<dyn WorkflowClient>, sink: Arc<dyn AssignmentSink>) -> Self {
        Self {
            workflow,
            sink,
            processed: DashMap::new(),
        }
    }

    fn is_transition(&self, key: &ProcessedKey, value: &serde_json::Value) -> bool {
        match self.processed.get(key) {
            Some(prior) => *prior != *value,
            None => true,
        }
    }

    fn mark_processed(&self, key: ProcessedKey, value: serde_json::Value) {
        self.processed.insert(key, value);
    }

    /// Processes one page of assignments. Dispatch failures are isolated
    /// per subscriber and retried next cycle (their processed record stays
    /// unwritten); persistence constraint violations other than stale
    /// references propagate and fail the cycle.
    pub fn process_batch(
        &self,
        assignments: &[Assignment],
        subscriptions: &SubscriptionMap,
    ) -> PulseResult<DispatchStats> {
        let mut stats = DispatchStats::default();

        for assignment in assignments {
            stats.examined += 1;
            let kind = assignment.value.kind();
            let value_json = assignment.value.as_json();

            let mut targets = vec![ProcessedFor::PersistTruth];
            let consumers = match &assignment.value {
                AssignmentValue::Segment(_) => {
                    subscriptions.segment_consumers(assignment.computed_property_id)
                }
                AssignmentValue::UserProperty(_) => {
                    subscriptions.user_property_consumers(assignment.computed_property_id)
                }
            };
            targets.extend(consumers.into_iter().map(|consumer| match consumer {
                Consumer::Journey(id) => ProcessedFor::Journey(id),
                Consumer::Integration(id) => ProcessedFor::Integration(id),
            }));

            for target in targets {
                let key = ProcessedKey {
                    workspace_id: assignment.workspace_id,
                    kind,
                    computed_property_id: assignment.computed_property_id,
                    user_id: assignment.user_id.clone(),
                    processed_for: target,
                };
                if !self.is_transition(&key, &value_json) {
                    continue;
                }
                match target {
                    ProcessedFor::PersistTruth => {
                        match self.persist(assignment) {
                            Ok(()) => {
                                stats.persisted += 1;
                                self.mark_processed(key, value_json.clone());
                            }
                            Err(PulseError::StaleReference(reason)) => {
                                debug!(
                                    workspace_id = %assignment.workspace_id,
                                    user_id = %assignment.user_id,
                                    reason = %reason,
                                    "skipping assignment for stale reference"
                                );
                                stats.skipped_stale += 1;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                    ProcessedFor::Journey(journey_id) => {
                        match self.signal_journey(journey_id, assignment) {
                            Ok(signaled) => {
                                if signaled {
                                    stats.signaled += 1;
                                }
                                self.mark_processed(key, value_json.clone());
                            }
                            Err(err) => {
                                error!(
                                    journey_id = %journey_id,
                                    user_id = %assignment.user_id,
                                    error = %err,
                                    "journey dispatch failed, will retry next cycle"
                                );
                                stats.failed += 1;
                            }
                        }
                    }
                    ProcessedFor::Integration(integration_id) => {
                        match self.notify_integration(integration_id, assignment) {
                            Ok(()) => {
                                stats.notified += 1;
                                self.mark_processed(key, value_json.clone());
                            }
                            Err(err) => {
                                error!(
                                    integration_id = %integration_id,
                                    user_id = %assignment.user_id,
                                    error = %err,
                                    "integration dispatch failed, will retry next cycle"
                                );
                                stats.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        Ok(stats)
    }

    fn persist(&self, assignment: &Assignment) -> PulseResult<()> {
        match &assignment.value {
            AssignmentValue::Segment(in_segment) => self.sink.upsert_segment_assignment(
                assignment.workspace_id,
                &assignment.user_id,
                assignment.computed_property_id,
                *in_segment,
            ),
            AssignmentValue::UserProperty(value) => self.sink.upsert_user_property_assignment(
                assignment.workspace_id,
                &assignment.user_id,
                assignment.computed_property_id,
                value,
            ),
        }
    }

    /// Journeys are signaled only when the user is currently in the
    /// segment; exits are consumed as a transition (so they never
    /// re-trigger) without a signal. Returns whether a signal was sent.
    fn signal_journey(&self, journey_id: Uuid, assignment: &Assignment) -> PulseResult<bool> {
        let AssignmentValue::Segment(in_segment) = &assignment.value else {
            return Ok(false);
        };
        if !in_segment {
            return Ok(false);
        }
        let update = SegmentUpdate {
            segment_id: assignment.computed_property_id,
            currently_in_segment: true,
            segment_version: assignment.assigned_at.timestamp_millis(),
        };
        let workflow_id = user_journey_workflow_id(journey_id, &assignment.user_id);
        self.workflow.signal_with_start(
            &workflow_id,
            journey_id,
            assignment.workspace_id,
            &assignment.user_id,
            update,
        )?;
        Ok(true)
    }

    fn notify_integration(&self, integration_id: Uuid, assignment: &Assignment) -> PulseResult<()> {
        let version = assignment.assigned_at.timestamp_millis();
        let update = match &assignment.value {
            AssignmentValue::Segment(in_segment) => ComputedPropertyUpdate::Segment(SegmentUpdate {
                segment_id: assignment.computed_property_id,
                currently_in_segment: *in_segment,
                segment_version: version,
            }),
            AssignmentValue::UserProperty(value) => ComputedPropertyUpdate::UserProperty {
                user_property_id: assignment.computed_property_id,
                value: value.clone(),
                user_property_version: version,
            },
        };
        self.workflow.notify_integration(
            integration_id,
            assignment.workspace_id,
            &assignment.user_id,
            update,
        )
    }

    #[cfg(test)]
    pub(crate) fn processed_count(&self) -> usize {
        self.processed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::assignments::InMemoryAssignmentSink;
    use pulse_core::workflow::RecordingWorkflowClient;
    use pulse_journey::{
        JourneyDefinition, JourneyEntry, JourneyNode, JourneyResource, JourneyStatus,
    };
    use pulse_subscriptions::resolve_subscriptions;

    fn segment_assignment(
        workspace_id: Uuid,
        segment_id: Uuid,
        user_id: &str,
        in_segment: bool,
    ) -> Assignment {
        Assignment {
            workspace_id,
            computed_property_id: segment_id,
            user_id: user_id.to_string(),
            value: AssignmentValue::Segment(in_segment),
            max_event_time: Some(Utc::now()),
            assigned_at: Utc::now(),
        }
    }

    fn journey_for_segment(workspace_id: Uuid, segment_id: Uuid) -> JourneyResource {
        JourneyResource {
            id: Uuid::new_v4(),
            workspace_id,
            name: "welcome".to_string(),
            status: JourneyStatus::Running,
            definition: JourneyDefinition {
                entry: JourneyEntry::Segment {
                    segment_id,
                    child: "exit".to_string(),
                },
                nodes: vec![JourneyNode::Exit {
                    id: "exit".to_string(),
                }],
            },
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_repeat_batches_dispatch_once_per_value() {
        let workflow = Arc::new(RecordingWorkflowClient::new());
        let sink = Arc::new(InMemoryAssignmentSink::new());
        let engine = DispatchEngine::new(workflow.clone(), sink.clone());

        let workspace_id = Uuid::new_v4();
        let segment_id = Uuid::new_v4();
        let journey = journey_for_segment(workspace_id, segment_id);
        let subscriptions = resolve_subscriptions(std::slice::from_ref(&journey), &[]);

        let batch = vec![segment_assignment(workspace_id, segment_id, "u-1", true)];
        let first = engine.process_batch(&batch, &subscriptions).unwrap();
        let second = engine.process_batch(&batch, &subscriptions).unwrap();

        assert_eq!(first.signaled, 1);
        assert_eq!(first.persisted, 1);
        assert_eq!(second.signaled, 0);
        assert_eq!(second.persisted, 0);
        assert_eq!(workflow.signal_count(journey.id, "u-1"), 1);
        assert_eq!(
            sink.segment_assignment(workspace_id, "u-1", segment_id),
            Some(true)
        );
    }

    #[test]
    fn test_false_transition_persists_without_signal() {
        let workflow = Arc::new(RecordingWorkflowClient::new());
        let sink = Arc::new(InMemoryAssignmentSink::new());
        let engine = DispatchEngine::new(workflow.clone(), sink.clone());

        let workspace_id = Uuid::new_v4();
        let segment_id = Uuid::new_v4();
        let journey = journey_for_segment(workspace_id, segment_id);
        let subscriptions = resolve_subscriptions(std::slice::from_ref(&journey), &[]);

        let entered = vec![segment_assignment(workspace_id, segment_id, "u-1", true)];
        engine.process_batch(&entered, &subscriptions).unwrap();
        let exited = vec![segment_assignment(workspace_id, segment_id, "u-1", false)];
        let stats = engine.process_batch(&exited, &subscriptions).unwrap();

        assert_eq!(stats.persisted, 1);
        assert_eq!(stats.signaled, 0);
        assert_eq!(workflow.signal_count(journey.id, "u-1"), 1);
        assert_eq!(
            sink.segment_assignment(workspace_id, "u-1", segment_id),
            Some(false)
        );
    }

    #[test]
    fn test_failed_journey_dispatch_retries_next_batch() {
        let workflow = Arc::new(RecordingWorkflowClient::new());
        let sink = Arc::new(InMemoryAssignmentSink::new());
        let engine = DispatchEngine::new(workflow.clone(), sink.clone());

        let workspace_id = Uuid::new_v4();
        let segment_id = Uuid::new_v4();
        let journey = journey_for_segment(workspace_id, segment_id);
        let subscriptions = resolve_subscriptions(std::slice::from_ref(&journey), &[]);

        workflow.fail_journey(journey.id);
        let batch = vec![segment_assignment(workspace_id, segment_id, "u-1", true)];
        let failing = engine.process_batch(&batch, &subscriptions).unwrap();
        assert_eq!(failing.failed, 1);
        // Persistence is an independent stream and still succeeded.
        assert_eq!(failing.persisted, 1);

        workflow.clear_failures();
        let retried = engine.process_batch(&batch, &subscriptions).unwrap();
        assert_eq!(retried.signaled, 1);
        assert_eq!(retried.persisted, 0);
        assert_eq!(workflow.signal_count(journey.id, "u-1"), 1);
    }

    #[test]
    fn test_stale_reference_is_skipped_not_fatal() {
        let workflow = Arc::new(RecordingWorkflowClient::new());
        let sink = Arc::new(InMemoryAssignmentSink::new());
        let engine = DispatchEngine::new(workflow, sink.clone());

        let workspace_id = Uuid::new_v4();
        let deleted_segment = Uuid::new_v4();
        sink.mark_stale(deleted_segment);

        let batch = vec![segment_assignment(workspace_id, deleted_segment, "u-1", true)];
        let stats = engine
            .process_batch(&batch, &SubscriptionMap::default())
            .unwrap();
        assert_eq!(stats.skipped_stale, 1);
        assert_eq!(stats.persisted, 0);
        assert_eq!(engine.processed_count(), 0);
    }
}
