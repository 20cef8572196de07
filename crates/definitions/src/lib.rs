//! Definition model for computed properties — typed segment and
//! user-property trees, validation, deterministic state ids, and node
//! reductions onto the event log.

pub mod bucket;
pub mod reduce;
pub mod resources;
pub mod segment;
pub mod state_id;
pub mod user_property;
pub mod validate;

pub use resources::{SegmentResource, UserPropertyResource};
pub use segment::{SegmentDefinition, SegmentNode, SegmentOperator};
pub use user_property::{GroupNode, UserPropertyDefinition};
pub use validate::{validate_segment, validate_user_property, DefinitionError};
