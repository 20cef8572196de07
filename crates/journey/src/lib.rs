//! Read-only journey and integration definition snapshots.
//!
//! The engine never runs journeys; it only inspects their definitions to
//! derive which segments each journey depends on, and signals the durable
//! workflow engine when those segments change.

pub mod types;

pub use types::{
    IntegrationDefinition, IntegrationResource, JourneyDefinition, JourneyEntry, JourneyNode,
    JourneyResource, JourneyStatus,
};
