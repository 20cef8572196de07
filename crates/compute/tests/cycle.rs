//! End-to-end cycle tests: aggregation, resolution, and dispatch against
//! in-memory backends.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use pulse_compute::{ComputeEngine, CycleRequest, InMemoryDefinitionStore, WorkspaceSnapshot};
use pulse_core::assignments::InMemoryAssignmentSink;
use pulse_core::config::AppConfig;
use pulse_core::types::{EventRow, EventType};
use pulse_core::workflow::RecordingWorkflowClient;
use pulse_core::InMemoryEventStore;
use pulse_definitions::segment::{
    HasBeenComparator, RelationalOperator, SegmentDefinition, SegmentNode, SegmentOperator,
};
use pulse_definitions::user_property::{GroupNode, UserPropertyDefinition};
use pulse_definitions::{SegmentResource, UserPropertyResource};
use pulse_journey::{
    JourneyDefinition, JourneyEntry, JourneyNode, JourneyResource, JourneyStatus,
};

struct Harness {
    workspace_id: Uuid,
    store: Arc<InMemoryEventStore>,
    workflow: Arc<RecordingWorkflowClient>,
    sink: Arc<InMemoryAssignmentSink>,
    engine: ComputeEngine,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let workflow = Arc::new(RecordingWorkflowClient::new());
        let sink = Arc::new(InMemoryAssignmentSink::new());
        let engine = ComputeEngine::new(
            store.clone(),
            workflow.clone(),
            sink.clone(),
            &AppConfig::default(),
        );
        Self {
            workspace_id: Uuid::new_v4(),
            store,
            workflow,
            sink,
            engine,
        }
    }

    fn identify(&self, user_id: &str, at: DateTime<Utc>, message_id: &str, traits: serde_json::Value) {
        self.store.submit(
            self.workspace_id,
            EventRow {
                event_type: EventType::Identify,
                event_name: "identify".to_string(),
                event_time: at,
                processing_time: at,
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
                anonymous_id: None,
                properties: traits,
            },
        );
    }

    fn track(&self, user_id: &str, event: &str, at: DateTime<Utc>, message_id: &str, properties: serde_json::Value) {
        self.store.submit(
            self.workspace_id,
            EventRow {
                event_type: EventType::Track,
                event_name: event.to_string(),
                event_time: at,
                processing_time: at,
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
                anonymous_id: None,
                properties,
            },
        );
    }

    fn snapshot(
        &self,
        segments: Vec<SegmentResource>,
        user_properties: Vec<UserPropertyResource>,
        journeys: Vec<JourneyResource>,
    ) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            workspace_id: self.workspace_id,
            segments,
            user_properties,
            journeys,
            integrations: vec![],
        }
    }

    fn run(&self, snapshot: &WorkspaceSnapshot, current_time: DateTime<Utc>) {
        self.engine
            .run_cycle(&CycleRequest {
                snapshot: snapshot.clone(),
                current_time,
            })
            .expect("cycle should succeed");
    }
}

fn segment(workspace_id: Uuid, definition: SegmentDefinition, updated_at: DateTime<Utc>) -> SegmentResource {
    SegmentResource {
        id: Uuid::new_v4(),
        workspace_id,
        name: "segment".to_string(),
        definition,
        definition_updated_at: updated_at,
    }
}

fn trait_segment(workspace_id: Uuid, path: &str, operator: SegmentOperator, updated_at: DateTime<Utc>) -> SegmentResource {
    segment(
        workspace_id,
        SegmentDefinition {
            entry_node: SegmentNode::Trait {
                id: "1".to_string(),
                path: path.to_string(),
                operator,
            },
            nodes: vec![],
        },
        updated_at,
    )
}

fn journey_for(workspace_id: Uuid, segment_id: Uuid) -> JourneyResource {
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
fn test_idempotent_replay_of_a_cycle() {
    let h = Harness::new();
    let t0 = Utc::now();
    let seg = trait_segment(
        h.workspace_id,
        "status",
        SegmentOperator::Equals {
            value: json!("active"),
        },
        t0 - Duration::days(1),
    );
    let journey = journey_for(h.workspace_id, seg.id);
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![journey.clone()]);

    h.identify("u-1", t0, "m-1", json!({"status": "active"}));

    let cycle_time = t0 + Duration::seconds(10);
    h.run(&snapshot, cycle_time);
    // Retry of the exact same cycle, as after a caller timeout.
    h.run(&snapshot, cycle_time);

    assert_eq!(h.workflow.signal_count(journey.id, "u-1"), 1);
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(true)
    );
}

#[test]
fn test_order_independence_of_event_arrival() {
    let t0 = Utc::now();
    let events = [
        ("m-1", t0, json!({"status": "trial"})),
        ("m-2", t0 + Duration::seconds(10), json!({"status": "active"})),
        ("m-3", t0 + Duration::seconds(5), json!({"status": "churned"})),
    ];

    let mut results = Vec::new();
    for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2]] {
        let h = Harness::new();
        let seg = trait_segment(
            h.workspace_id,
            "status",
            SegmentOperator::Equals {
                value: json!("active"),
            },
            t0 - Duration::days(1),
        );
        let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![]);
        for index in order {
            let (message_id, at, traits) = &events[index];
            h.identify("u-1", *at, message_id, traits.clone());
        }
        // Duplicate delivery of the newest event.
        h.identify("u-1", t0 + Duration::seconds(10), "m-2", json!({"status": "active"}));
        h.run(&snapshot, t0 + Duration::seconds(60));
        results.push(h.sink.segment_assignment(h.workspace_id, "u-1", seg.id));
    }

    assert_eq!(results, vec![Some(true), Some(true), Some(true)]);
}

#[test]
fn test_within_window_expires_from_time_alone() {
    let h = Harness::new();
    let t0 = Utc::now();
    let seg = trait_segment(
        h.workspace_id,
        "createdAt",
        SegmentOperator::Within { window_seconds: 60 },
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![]);

    h.identify("u-1", t0, "m-1", json!({"createdAt": t0.to_rfc3339()}));

    h.run(&snapshot, t0);
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(true)
    );

    h.run(&snapshot, t0 + Duration::seconds(50));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(true)
    );

    // No new events; only current_time advanced.
    h.run(&snapshot, t0 + Duration::milliseconds(1_200_000));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(false)
    );
}

#[test]
fn test_has_been_cascade_with_mid_window_change() {
    let h = Harness::new();
    let t0 = Utc::now();
    let week = 604_800;
    let seg = trait_segment(
        h.workspace_id,
        "status",
        SegmentOperator::HasBeen {
            comparator: HasBeenComparator::Gte,
            value: json!("onboarding"),
            window_seconds: week,
        },
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![]);

    h.identify("u-1", t0, "m-1", json!({"status": "onboarding"}));

    h.run(&snapshot, t0 + Duration::days(3));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(false)
    );

    h.run(&snapshot, t0 + Duration::days(8));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(true)
    );

    // A trait change drops membership immediately, mid-window or not.
    let changed_at = t0 + Duration::days(8) + Duration::hours(1);
    h.identify("u-1", changed_at, "m-2", json!({"status": "active"}));
    h.run(&snapshot, changed_at + Duration::hours(1));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(false)
    );
}

#[test]
fn test_any_of_group_attributes_to_populated_child() {
    let h = Harness::new();
    let t0 = Utc::now();
    let user_property = UserPropertyResource {
        id: Uuid::new_v4(),
        workspace_id: h.workspace_id,
        name: "email".to_string(),
        definition: UserPropertyDefinition::Group {
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
        },
        definition_updated_at: t0 - Duration::days(1),
    };
    let snapshot = h.snapshot(vec![], vec![user_property.clone()], vec![]);

    h.identify("u-1", t0, "m-1", json!({"email2": "second@example.com"}));
    h.run(&snapshot, t0 + Duration::seconds(10));

    assert_eq!(
        h.sink
            .user_property_assignment(h.workspace_id, "u-1", user_property.id),
        Some(json!("second@example.com"))
    );
}

#[test]
fn test_malformed_segment_does_not_block_others() {
    let h = Harness::new();
    let t0 = Utc::now();
    let malformed = trait_segment(
        h.workspace_id,
        "",
        SegmentOperator::Exists,
        t0 - Duration::days(1),
    );
    let valid = trait_segment(
        h.workspace_id,
        "plan",
        SegmentOperator::Equals {
            value: json!("pro"),
        },
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![malformed.clone(), valid.clone()], vec![], vec![]);

    h.identify("u-1", t0, "m-1", json!({"plan": "pro"}));
    h.run(&snapshot, t0 + Duration::seconds(10));

    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", valid.id),
        Some(true)
    );
    // The malformed segment resolved no one and persisted nothing.
    assert_eq!(
        h.sink
            .segment_assignment(h.workspace_id, "u-1", malformed.id),
        None
    );
}

#[test]
fn test_cyclic_definition_is_skipped_not_fatal() {
    let h = Harness::new();
    let t0 = Utc::now();
    // Entry And -> Or -> back to the entry.
    let cyclic = segment(
        h.workspace_id,
        SegmentDefinition {
            entry_node: SegmentNode::And {
                id: "root".to_string(),
                children: vec!["t".to_string(), "loop".to_string()],
            },
            nodes: vec![
                SegmentNode::Trait {
                    id: "t".to_string(),
                    path: "status".to_string(),
                    operator: SegmentOperator::Exists,
                },
                SegmentNode::Or {
                    id: "loop".to_string(),
                    children: vec!["root".to_string()],
                },
            ],
        },
        t0 - Duration::days(1),
    );
    let valid = trait_segment(
        h.workspace_id,
        "status",
        SegmentOperator::Exists,
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![cyclic.clone(), valid.clone()], vec![], vec![]);

    h.identify("u-1", t0, "m-1", json!({"status": "active"}));
    h.run(&snapshot, t0 + Duration::seconds(10));

    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", valid.id),
        Some(true)
    );
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", cyclic.id),
        None
    );
}

#[test]
fn test_windowed_occurrences_age_out_and_are_pruned() {
    let h = Harness::new();
    let t0 = Utc::now();
    let seg = segment(
        h.workspace_id,
        SegmentDefinition {
            entry_node: SegmentNode::Performed {
                id: "1".to_string(),
                event: "order_completed".to_string(),
                times: 1,
                comparator: RelationalOperator::GreaterThanOrEqual,
                properties: vec![],
                within_seconds: Some(3600),
            },
            nodes: vec![],
        },
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![]);

    h.track("u-1", "order_completed", t0, "m-1", json!({}));
    h.run(&snapshot, t0 + Duration::seconds(10));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(true)
    );
    assert_eq!(h.engine.fragment_count(), 1);

    // Two hours later the occurrence is outside the window: the segment
    // flips to false and the aged-out state is dropped, not retained.
    h.run(&snapshot, t0 + Duration::hours(2));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(false)
    );
    assert_eq!(h.engine.fragment_count(), 0);
}

#[test]
fn test_exactly_once_signaling_across_cycles() {
    let h = Harness::new();
    let t0 = Utc::now();
    let seg = segment(
        h.workspace_id,
        SegmentDefinition {
            entry_node: SegmentNode::Performed {
                id: "1".to_string(),
                event: "order_completed".to_string(),
                times: 1,
                comparator: RelationalOperator::GreaterThanOrEqual,
                properties: vec![],
                within_seconds: None,
            },
            nodes: vec![],
        },
        t0 - Duration::days(1),
    );
    let journey = journey_for(h.workspace_id, seg.id);
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![journey.clone()]);

    // First cycle: nothing qualifying yet.
    h.run(&snapshot, t0);
    assert_eq!(h.workflow.signal_count(journey.id, "u-1"), 0);

    let purchase_at = t0 + Duration::seconds(30);
    h.track("u-1", "order_completed", purchase_at, "m-1", json!({"total": 10}));

    // Second cycle picks the event up and signals exactly once.
    h.run(&snapshot, t0 + Duration::seconds(60));
    assert_eq!(h.workflow.signal_count(journey.id, "u-1"), 1);

    // Third cycle: unchanged assignment, no further signal.
    h.run(&snapshot, t0 + Duration::seconds(120));
    assert_eq!(h.workflow.signal_count(journey.id, "u-1"), 1);
}

#[test]
fn test_never_performed_counts_as_zero_not_unresolved() {
    let h = Harness::new();
    let t0 = Utc::now();
    // Users who have performed the event fewer than one time, i.e. never.
    let seg = segment(
        h.workspace_id,
        SegmentDefinition {
            entry_node: SegmentNode::And {
                id: "root".to_string(),
                children: vec!["known".to_string(), "silent".to_string()],
            },
            nodes: vec![
                SegmentNode::Trait {
                    id: "known".to_string(),
                    path: "plan".to_string(),
                    operator: SegmentOperator::Exists,
                },
                SegmentNode::Performed {
                    id: "silent".to_string(),
                    event: "order_completed".to_string(),
                    times: 0,
                    comparator: RelationalOperator::Equals,
                    properties: vec![],
                    within_seconds: None,
                },
            ],
        },
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![]);

    h.identify("u-quiet", t0, "m-1", json!({"plan": "free"}));
    h.identify("u-buyer", t0, "m-2", json!({"plan": "free"}));
    h.track("u-buyer", "order_completed", t0, "m-3", json!({}));

    h.run(&snapshot, t0 + Duration::seconds(10));

    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-quiet", seg.id),
        Some(true)
    );
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-buyer", seg.id),
        Some(false)
    );
}

#[test]
fn test_definition_edit_invalidates_prior_state() {
    let h = Harness::new();
    let t0 = Utc::now();
    let mut seg = trait_segment(
        h.workspace_id,
        "plan",
        SegmentOperator::Equals {
            value: json!("pro"),
        },
        t0 - Duration::days(1),
    );
    let snapshot = h.snapshot(vec![seg.clone()], vec![], vec![]);

    h.identify("u-1", t0, "m-1", json!({"plan": "pro", "tier": "gold"}));
    h.run(&snapshot, t0 + Duration::seconds(10));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(true)
    );
    let fragments_before = h.engine.fragment_count();

    // Edit the definition: same id, new node semantics and version.
    seg.definition = SegmentDefinition {
        entry_node: SegmentNode::Trait {
            id: "1".to_string(),
            path: "tier".to_string(),
            operator: SegmentOperator::Equals {
                value: json!("silver"),
            },
        },
        nodes: vec![],
    };
    seg.definition_updated_at = t0 + Duration::seconds(20);
    let edited = h.snapshot(vec![seg.clone()], vec![], vec![]);

    h.run(&edited, t0 + Duration::seconds(30));
    assert_eq!(
        h.sink.segment_assignment(h.workspace_id, "u-1", seg.id),
        Some(false)
    );
    // Old state ids were pruned, not left to mix with the new semantics.
    assert_eq!(h.engine.fragment_count(), fragments_before);
}

#[test]
fn test_scheduler_definition_store_round_trip() {
    let store = InMemoryDefinitionStore::new();
    let workspace_id = Uuid::new_v4();
    let seg = trait_segment(
        workspace_id,
        "plan",
        SegmentOperator::Exists,
        Utc::now(),
    );
    store.upsert_segment(seg.clone());
    store.upsert_segment(seg.clone());

    use pulse_compute::DefinitionProvider;
    assert_eq!(store.workspaces(), vec![workspace_id]);
    let snapshot = store.snapshot(workspace_id).unwrap();
    assert_eq!(snapshot.segments.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduler_tick_drives_a_cycle_to_dispatch() {
    let store = Arc::new(InMemoryEventStore::new());
    let workflow = Arc::new(RecordingWorkflowClient::new());
    let sink = Arc::new(InMemoryAssignmentSink::new());
    let engine = Arc::new(ComputeEngine::new(
        store.clone(),
        workflow,
        sink.clone(),
        &AppConfig::default(),
    ));
    let definitions = Arc::new(InMemoryDefinitionStore::new());

    let workspace_id = Uuid::new_v4();
    let t0 = Utc::now();
    let seg = trait_segment(
        workspace_id,
        "plan",
        SegmentOperator::Exists,
        t0 - Duration::days(1),
    );
    definitions.upsert_segment(seg.clone());
    store.submit(
        workspace_id,
        EventRow {
            event_type: EventType::Identify,
            event_name: "identify".to_string(),
            event_time: t0 - Duration::seconds(5),
            processing_time: t0 - Duration::seconds(5),
            message_id: "m-1".to_string(),
            user_id: "u-1".to_string(),
            anonymous_id: None,
            properties: json!({"plan": "pro"}),
        },
    );

    let scheduler = pulse_compute::scheduler::Scheduler::new(
        engine,
        definitions,
        std::time::Duration::from_secs(3600),
    );
    scheduler.tick();

    // The cycle runs on a spawned task; poll until it lands.
    for _ in 0..200 {
        if sink.segment_assignment(workspace_id, "u-1", seg.id) == Some(true) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("scheduler tick never dispatched the segment assignment");
}
