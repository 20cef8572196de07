//! Cycle orchestration — one idempotent batch pass of aggregation,
//! resolution, and dispatch for a workspace at a given logical time.
//!
//! Cycles for one workspace are serialized behind a per-workspace lock;
//! independent workspaces run fully in parallel. A failed or timed-out
//! cycle is safe to retry wholesale with the same `current_time`: the
//! processed-record compare suppresses duplicate dispatch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use pulse_core::assignments::AssignmentSink;
use pulse_core::config::AppConfig;
use pulse_core::error::PulseResult;
use pulse_core::event_store::{EventStore, TimeRange};
use pulse_core::types::ComputedPropertyKind;
use pulse_core::workflow::WorkflowClient;
use pulse_definitions::resources::{SegmentResource, UserPropertyResource};
use pulse_definitions::{validate_segment, validate_user_property};
use pulse_journey::{IntegrationResource, JourneyResource};
use pulse_subscriptions::{resolve_subscriptions, SubscriptionCache, SubscriptionMap};

use crate::aggregator::{self, AggregationRequest};
use crate::dispatch::{Assignment, AssignmentValue, DispatchEngine, DispatchStats};
use crate::fragments::{FragmentStore, StateKey};
use crate::periods::PeriodStore;
use crate::resolver::{self, ResolveContext};

/// Read-only definition snapshot for one workspace, taken at cycle start.
#[derive(Debug, Clone)]
pub struct WorkspaceSnapshot {
    pub workspace_id: Uuid,
    pub segments: Vec<SegmentResource>,
    pub user_properties: Vec<UserPropertyResource>,
    pub journeys: Vec<JourneyResource>,
    pub integrations: Vec<IntegrationResource>,
}

#[derive(Debug, Clone)]
pub struct CycleRequest {
    pub snapshot: WorkspaceSnapshot,
    /// Logical time of this cycle. Window predicates and the processing
    /// upper bound both derive from it.
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub properties_computed: usize,
    pub users_resolved: usize,
    pub dispatch: DispatchStats,
}

/// The computed-properties engine: fragment state, processed records,
/// period bounds, and the seams to the event store, workflow engine, and
/// assignment persistence.
pub struct ComputeEngine {
    event_store: Arc<dyn EventStore>,
    dispatch: DispatchEngine,
    fragments: FragmentStore,
    periods: PeriodStore,
    subscription_cache: SubscriptionCache,
    page_size: usize,
    workspace_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ComputeEngine {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        workflow: Arc<dyn WorkflowClient>,
        sink: Arc<dyn AssignmentSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            event_store,
            dispatch: DispatchEngine::new(workflow, sink),
            fragments: FragmentStore::new(),
            periods: PeriodStore::new(),
            subscription_cache: SubscriptionCache::new(std::time::Duration::from_secs(
                config.subscriptions.cache_ttl_secs,
            )),
            page_size: config.compute.page_size.max(1),
            workspace_locks: DashMap::new(),
        }
    }

    fn workspace_lock(&self, workspace_id: Uuid) -> Arc<Mutex<()>> {
        self.workspace_locks
            .entry(workspace_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs one full cycle for a workspace. Aggregation-query errors fail
    /// the whole cycle; the caller retries with the same `current_time`.
    pub fn run_cycle(&self, request: &CycleRequest) -> PulseResult<CycleStats> {
        let workspace_id = request.snapshot.workspace_id;
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock();

        let started = Instant::now();
        let mut stats = CycleStats::default();

        let subscriptions = self.subscription_cache.get_or_compute(
            workspace_id,
            Instant::now(),
            || resolve_subscriptions(&request.snapshot.journeys, &request.snapshot.integrations),
        );

        for segment in &request.snapshot.segments {
            // Invalid trees (cycles included) never reach the compiler or
            // resolver; the segment sits out the cycle.
            if let Err(errors) = validate_segment(&segment.definition) {
                warn!(
                    workspace_id = %workspace_id,
                    segment_id = %segment.id,
                    errors = ?errors,
                    "segment definition failed validation, skipping this cycle"
                );
                continue;
            }
            let requests = aggregator::compile_segment(segment);
            stats.properties_computed += 1;
            self.compute_property(
                request,
                ComputedPropertyKind::Segment,
                segment.id,
                segment.definition_updated_at.timestamp_millis(),
                &requests,
                &subscriptions,
                &mut stats,
                |ctx, user_id| {
                    AssignmentValue::Segment(resolver::resolve_segment(ctx, segment, user_id))
                },
            )?;
        }

        for user_property in &request.snapshot.user_properties {
            if let Err(errors) = validate_user_property(&user_property.definition) {
                warn!(
                    workspace_id = %workspace_id,
                    user_property_id = %user_property.id,
                    errors = ?errors,
                    "user property definition failed validation, skipping this cycle"
                );
                continue;
            }
            let requests = aggregator::compile_user_property(user_property);
            stats.properties_computed += 1;
            self.compute_property(
                request,
                ComputedPropertyKind::UserProperty,
                user_property.id,
                user_property.definition_updated_at.timestamp_millis(),
                &requests,
                &subscriptions,
                &mut stats,
                |ctx, user_id| {
                    AssignmentValue::UserProperty(resolver::resolve_user_property(
                        ctx,
                        user_property,
                        user_id,
                    ))
                },
            )?;
        }

        info!(
            workspace_id = %workspace_id,
            properties = stats.properties_computed,
            users = stats.users_resolved,
            persisted = stats.dispatch.persisted,
            signaled = stats.dispatch.signaled,
            notified = stats.dispatch.notified,
            failed = stats.dispatch.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "computed properties cycle finished"
        );
        Ok(stats)
    }

    /// Aggregate, resolve, and dispatch one computed property. Users are
    /// paged in bounded batches rather than materialized wholesale.
    #[allow(clippy::too_many_arguments)]
    fn compute_property<F>(
        &self,
        request: &CycleRequest,
        kind: ComputedPropertyKind,
        property_id: Uuid,
        version: i64,
        requests: &[AggregationRequest],
        subscriptions: &SubscriptionMap,
        stats: &mut CycleStats,
        resolve: F,
    ) -> PulseResult<()>
    where
        F: Fn(&ResolveContext<'_>, &str) -> AssignmentValue,
    {
        let workspace_id = request.snapshot.workspace_id;
        let range = TimeRange {
            processed_after: self
                .periods
                .lower_bound(workspace_id, kind, property_id, version),
            processed_before: request.current_time,
        };

        aggregator::run_requests(
            self.event_store.as_ref(),
            &self.fragments,
            workspace_id,
            kind,
            property_id,
            requests,
            &range,
        )?;

        let active_state_ids: HashSet<Uuid> = requests.iter().map(|r| r.state_id).collect();
        // Every user with live state is re-resolved, not just those with
        // new events: window predicates flip as current_time advances.
        let users: Vec<String> = self
            .fragments
            .users_for_property(workspace_id, kind, property_id, &active_state_ids)
            .into_iter()
            .collect();

        let ctx = ResolveContext {
            fragments: &self.fragments,
            current_time: request.current_time,
        };

        for page in users.chunks(self.page_size) {
            let assignments: Vec<Assignment> = page
                .iter()
                .map(|user_id| {
                    let max_event_time = requests
                        .iter()
                        .filter_map(|r| {
                            self.fragments
                                .get(&StateKey {
                                    workspace_id,
                                    kind,
                                    computed_property_id: property_id,
                                    state_id: r.state_id,
                                    user_id: user_id.clone(),
                                })
                                .and_then(|f| f.max_event_time)
                        })
                        .max();
                    Assignment {
                        workspace_id,
                        computed_property_id: property_id,
                        user_id: user_id.clone(),
                        value: resolve(&ctx, user_id),
                        max_event_time,
                        assigned_at: request.current_time,
                    }
                })
                .collect();
            stats.users_resolved += assignments.len();
            let page_stats = self.dispatch.process_batch(&assignments, subscriptions)?;
            stats.dispatch.merge(page_stats);
        }

        // Only after a fully dispatched pass does the incremental bound
        // advance; a failed cycle rereads the same range.
        self.periods
            .record(workspace_id, kind, property_id, version, request.current_time);
        self.fragments
            .prune_stale(workspace_id, kind, property_id, &active_state_ids);
        for aggregation in requests {
            if let Some(window) = aggregation.window_seconds {
                let cutoff = request.current_time - chrono::Duration::seconds(window as i64);
                self.fragments.prune_occurrences(
                    workspace_id,
                    kind,
                    property_id,
                    aggregation.state_id,
                    cutoff,
                );
            }
        }
        Ok(())
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}
