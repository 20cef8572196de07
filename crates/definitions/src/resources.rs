//! Saved computed-property records as read from the definition store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::SegmentDefinition;
use crate::user_property::UserPropertyDefinition;

/// A saved segment. `definition_updated_at` feeds state-id derivation, so
/// editing a definition invalidates all previously aggregated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResource {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub definition: SegmentDefinition,
    pub definition_updated_at: DateTime<Utc>,
}

/// A saved user property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPropertyResource {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub definition: UserPropertyDefinition,
    pub definition_updated_at: DateTime<Utc>,
}
