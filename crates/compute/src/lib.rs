//! Incremental computed-properties engine — windowed aggregation of the
//! event log into mergeable state fragments, recursive assignment
//! resolution, and exactly-once transition dispatch to subscribers.

pub mod aggregator;
pub mod cycle;
pub mod dispatch;
pub mod fragments;
pub mod periods;
pub mod provider;
pub mod resolver;
pub mod scheduler;

pub use cycle::{ComputeEngine, CycleRequest, CycleStats, WorkspaceSnapshot};
pub use dispatch::{Assignment, AssignmentValue, DispatchStats, ProcessedFor};
pub use fragments::{FragmentStore, StateFragment, StateKey};
pub use provider::{DefinitionProvider, InMemoryDefinitionStore};
