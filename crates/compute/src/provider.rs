//! Definition snapshots for the scheduler — which workspaces exist and
//! what their live definitions are at cycle start.

use dashmap::DashMap;
use uuid::Uuid;

use pulse_core::error::PulseResult;
use pulse_definitions::resources::{SegmentResource, UserPropertyResource};
use pulse_journey::{IntegrationResource, JourneyResource};

use crate::cycle::WorkspaceSnapshot;

/// Read-only view over the definition CRUD store.
pub trait DefinitionProvider: Send + Sync {
    fn workspaces(&self) -> Vec<Uuid>;
    fn snapshot(&self, workspace_id: Uuid) -> PulseResult<WorkspaceSnapshot>;
}

/// In-memory provider for tests and the development worker.
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    segments: DashMap<Uuid, Vec<SegmentResource>>,
    user_properties: DashMap<Uuid, Vec<UserPropertyResource>>,
    journeys: DashMap<Uuid, Vec<JourneyResource>>,
    integrations: DashMap<Uuid, Vec<IntegrationResource>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_segment(&self, segment: SegmentResource) {
        let mut segments = self.segments.entry(segment.workspace_id).or_default();
        segments.retain(|s| s.id != segment.id);
        segments.push(segment);
    }

    pub fn upsert_user_property(&self, user_property: UserPropertyResource) {
        let mut user_properties = self
            .user_properties
            .entry(user_property.workspace_id)
            .or_default();
        user_properties.retain(|u| u.id != user_property.id);
        user_properties.push(user_property);
    }

    pub fn upsert_journey(&self, journey: JourneyResource) {
        let mut journeys = self.journeys.entry(journey.workspace_id).or_default();
        journeys.retain(|j| j.id != journey.id);
        journeys.push(journey);
    }

    pub fn upsert_integration(&self, integration: IntegrationResource) {
        let mut integrations = self
            .integrations
            .entry(integration.workspace_id)
            .or_default();
        integrations.retain(|i| i.id != integration.id);
        integrations.push(integration);
    }
}

impl DefinitionProvider for InMemoryDefinitionStore {
    fn workspaces(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .segments
            .iter()
            .map(|e| *e.key())
            .chain(self.user_properties.iter().map(|e| *e.key()))
            .chain(self.journeys.iter().map(|e| *e.key()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn snapshot(&self, workspace_id: Uuid) -> PulseResult<WorkspaceSnapshot> {
        Ok(WorkspaceSnapshot {
            workspace_id,
            segments: self
                .segments
                .get(&workspace_id)
                .map(|s| s.clone())
                .unwrap_or_default(),
            user_properties: self
                .user_properties
                .get(&workspace_id)
                .map(|u| u.clone())
                .unwrap_or_default(),
            journeys: self
                .journeys
                .get(&workspace_id)
                .map(|j| j.clone())
                .unwrap_or_default(),
            integrations: self
                .integrations
                .get(&workspace_id)
                .map(|i| i.clone())
                .unwrap_or_default(),
        })
    }
}
