//! Shared types and contracts for the UserPulse computed-properties engine —
//! event rows, error taxonomy, configuration, and the seams to the event
//! store, the durable workflow engine, and assignment persistence.

pub mod assignments;
pub mod config;
pub mod error;
pub mod event_store;
pub mod json_path;
pub mod types;
pub mod workflow;

pub use error::{PulseError, PulseResult};
pub use event_store::{EventFilter, EventStore, InMemoryEventStore, PropertyCondition, TimeRange};
pub use types::{ComputedPropertyKind, EventRow, EventType, ValueOperator};
