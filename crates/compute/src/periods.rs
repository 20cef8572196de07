//! Computation periods — per-property incremental read bounds.
//!
//! After a successful cycle the engine records how far it has read for
//! each computed property; the next cycle scans only newer processing
//! times. A definition-version change discards the bound so the new state
//! ids are rebuilt from the full history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use pulse_core::types::ComputedPropertyKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PeriodKey {
    workspace_id: Uuid,
    kind: ComputedPropertyKind,
    computed_property_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Period {
    version: i64,
    bound: DateTime<Utc>,
}

#[derive(Default)]
pub struct PeriodStore {
    inner: DashMap<PeriodKey, Period>,
}

impl PeriodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The processing-time lower bound for this property at this
    /// definition version, or `None` (full scan) when the version changed
    /// or nothing was recorded yet.
    pub fn lower_bound(
        &self,
        workspace_id: Uuid,
        kind: ComputedPropertyKind,
        computed_property_id: Uuid,
        version: i64,
    ) -> Option<DateTime<Utc>> {
        let key = PeriodKey {
            workspace_id,
            kind,
            computed_property_id,
        };
        self.inner
            .get(&key)
            .filter(|period| period.version == version)
            .map(|period| period.bound)
    }

    pub fn record(
        &self,
        workspace_id: Uuid,
        kind: ComputedPropertyKind,
        computed_property_id: Uuid,
        version: i64,
        bound: DateTime<Utc>,
    ) {
        self.inner.insert(
            PeriodKey {
                workspace_id,
                kind,
                computed_property_id,
            },
            Period { version, bound },
        );
    }
}
