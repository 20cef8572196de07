//! Deterministic state ids.
//!
//! A state id names one memory-bearing node of one definition version:
//! `uuidv5(namespace = property id, "{definition_updated_at_ms}:{node_id}")`.
//! Editing a definition changes `definition_updated_at`, which changes
//! every state id, so fresh state never mixes with stale semantics.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::resources::{SegmentResource, UserPropertyResource};

pub fn compute_state_id(
    property_id: Uuid,
    definition_updated_at: DateTime<Utc>,
    node_id: &str,
) -> Uuid {
    let name = format!("{}:{}", definition_updated_at.timestamp_millis(), node_id);
    Uuid::new_v5(&property_id, name.as_bytes())
}

pub fn segment_node_state_id(segment: &SegmentResource, node_id: &str) -> Uuid {
    compute_state_id(segment.id, segment.definition_updated_at, node_id)
}

pub fn user_property_state_id(user_property: &UserPropertyResource, node_id: &str) -> Uuid {
    compute_state_id(
        user_property.id,
        user_property.definition_updated_at,
        node_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_id_is_deterministic() {
        let property_id = Uuid::new_v4();
        let updated_at = Utc::now();
        let a = compute_state_id(property_id, updated_at, "node-1");
        let b = compute_state_id(property_id, updated_at, "node-1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_state_id_changes_with_definition_version_and_node() {
        let property_id = Uuid::new_v4();
        let updated_at = Utc::now();
        let base = compute_state_id(property_id, updated_at, "node-1");
        let edited = compute_state_id(
            property_id,
            updated_at + chrono::Duration::seconds(1),
            "node-1",
        );
        let sibling = compute_state_id(property_id, updated_at, "node-2");
        assert_ne!(base, edited);
        assert_ne!(base, sibling);
    }
}
