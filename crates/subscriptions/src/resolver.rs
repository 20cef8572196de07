//! Static analysis of journey and integration definitions into a
//! computed-property → consumer multimap.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use pulse_journey::{
    IntegrationResource, JourneyEntry, JourneyNode, JourneyResource, JourneyStatus,
};

/// A downstream consumer of computed-property transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Consumer {
    Journey(Uuid),
    Integration(Uuid),
}

/// Derived subscription edges for one workspace. Never persisted; rebuilt
/// from live definitions each computation cycle.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionMap {
    segments: HashMap<Uuid, HashSet<Consumer>>,
    user_properties: HashMap<Uuid, HashSet<Consumer>>,
}

impl SubscriptionMap {
    pub fn segment_consumers(&self, segment_id: Uuid) -> Vec<Consumer> {
        let mut consumers: Vec<Consumer> = self
            .segments
            .get(&segment_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        consumers.sort();
        consumers
    }

    pub fn user_property_consumers(&self, user_property_id: Uuid) -> Vec<Consumer> {
        let mut consumers: Vec<Consumer> = self
            .user_properties
            .get(&user_property_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        consumers.sort();
        consumers
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.user_properties.is_empty()
    }

    fn add_segment(&mut self, segment_id: Uuid, consumer: Consumer) {
        self.segments.entry(segment_id).or_default().insert(consumer);
    }

    fn add_user_property(&mut self, user_property_id: Uuid, consumer: Consumer) {
        self.user_properties
            .entry(user_property_id)
            .or_default()
            .insert(consumer);
    }
}

/// Segment ids referenced by a journey's reachable nodes: the entry node
/// plus every segment-split and wait-for reachable from it.
fn subscribed_segments(journey: &JourneyResource) -> HashSet<Uuid> {
    let mut segments = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut seen: HashSet<&str> = HashSet::new();

    match &journey.definition.entry {
        JourneyEntry::Segment { segment_id, child } => {
            segments.insert(*segment_id);
            queue.push_back(child);
        }
        JourneyEntry::Event { child, .. } => {
            queue.push_back(child);
        }
    }

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let Some(node) = journey.definition.node_by_id(id) else {
            continue;
        };
        match node {
            JourneyNode::SegmentSplit { segment_id, .. }
            | JourneyNode::WaitFor { segment_id, .. } => {
                segments.insert(*segment_id);
            }
            _ => {}
        }
        for child in node.child_ids() {
            queue.push_back(child);
        }
    }
    segments
}

/// Builds the subscription multimap for one workspace from running
/// journeys and enabled integrations.
pub fn resolve_subscriptions(
    journeys: &[JourneyResource],
    integrations: &[IntegrationResource],
) -> SubscriptionMap {
    let mut map = SubscriptionMap::default();

    for journey in journeys {
        if journey.status != JourneyStatus::Running {
            continue;
        }
        for segment_id in subscribed_segments(journey) {
            map.add_segment(segment_id, Consumer::Journey(journey.id));
        }
    }

    for integration in integrations {
        if !integration.enabled {
            continue;
        }
        for segment_id in &integration.definition.subscribed_segments {
            map.add_segment(*segment_id, Consumer::Integration(integration.id));
        }
        for user_property_id in &integration.definition.subscribed_user_properties {
            map.add_user_property(*user_property_id, Consumer::Integration(integration.id));
        }
    }

    map
}
