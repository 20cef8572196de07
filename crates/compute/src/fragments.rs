//! Mergeable per-node, per-user aggregation state.
//!
//! A fragment is the memory behind one memory-bearing node of one
//! definition version for one user. Merging is associative, commutative,
//! and idempotent under duplicate events, so replay and out-of-order
//! arrival cannot corrupt state.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use pulse_core::types::ComputedPropertyKind;

/// Identity of one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub workspace_id: Uuid,
    pub kind: ComputedPropertyKind,
    pub computed_property_id: Uuid,
    pub state_id: Uuid,
    pub user_id: String,
}

/// A value carrying its event time; the merge keeps the argmax by
/// `(event_time, message_id)`, message id breaking ties deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedValue {
    pub value: serde_json::Value,
    pub event_time: DateTime<Utc>,
    pub message_id: String,
}

/// One recorded event occurrence, deduped by message id.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub event: String,
    pub event_time: DateTime<Utc>,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateFragment {
    /// Last observed value, argmax by event time.
    pub last: Option<TimedValue>,
    /// Distinct markers (message ids or rendered values, per the
    /// aggregation request). `len` is the unique count.
    pub distinct: BTreeSet<String>,
    /// Newest event time folded into this fragment.
    pub max_event_time: Option<DateTime<Utc>>,
    /// Recorded occurrences keyed by message id, for windowed counting and
    /// `PerformedMany`.
    pub occurrences: BTreeMap<String, Occurrence>,
}

impl StateFragment {
    pub fn merge(&mut self, other: StateFragment) {
        self.last = match (self.last.take(), other.last) {
            (Some(a), Some(b)) => Some(newer(a, b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        self.distinct.extend(other.distinct);
        self.max_event_time = self.max_event_time.max(other.max_event_time);
        self.occurrences.extend(other.occurrences);
    }

    pub fn unique_count(&self) -> usize {
        self.distinct.len()
    }
}

fn newer(a: TimedValue, b: TimedValue) -> TimedValue {
    match a.event_time.cmp(&b.event_time) {
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Equal => {
            if a.message_id >= b.message_id {
                a
            } else {
                b
            }
        }
    }
}

/// Shared fragment storage, keyed by [`StateKey`]. Fragments for retired
/// state ids are orphaned until pruned at the end of a cycle.
#[derive(Default)]
pub struct FragmentStore {
    inner: DashMap<StateKey, StateFragment>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_into(&self, key: StateKey, delta: StateFragment) {
        self.inner.entry(key).or_default().merge(delta);
    }

    pub fn get(&self, key: &StateKey) -> Option<StateFragment> {
        self.inner.get(key).map(|f| f.clone())
    }

    /// Every user holding any fragment for the given property under one of
    /// the active state ids.
    pub fn users_for_property(
        &self,
        workspace_id: Uuid,
        kind: ComputedPropertyKind,
        computed_property_id: Uuid,
        active_state_ids: &HashSet<Uuid>,
    ) -> BTreeSet<String> {
        self.inner
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.workspace_id == workspace_id
                    && key.kind == kind
                    && key.computed_property_id == computed_property_id
                    && active_state_ids.contains(&key.state_id)
            })
            .map(|entry| entry.key().user_id.clone())
            .collect()
    }

    /// Drops fragments for the property whose state id is not in the
    /// active set, discarding state invalidated by a definition edit.
    pub fn prune_stale(
        &self,
        workspace_id: Uuid,
        kind: ComputedPropertyKind,
        computed_property_id: Uuid,
        active_state_ids: &HashSet<Uuid>,
    ) -> usize {
        let stale: Vec<StateKey> = self
            .inner
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.workspace_id == workspace_id
                    && key.kind == kind
                    && key.computed_property_id == computed_property_id
                    && !active_state_ids.contains(&key.state_id)
            })
            .map(|entry| entry.key().clone())
            .collect();
        let count = stale.len();
        for key in stale {
            self.inner.remove(&key);
        }
        count
    }

    /// Drops recorded occurrences at or before `cutoff` for one state id.
    /// Windowed counts only ever look back one window, so aged-out
    /// occurrences can never affect a future cycle. Fragments left with no
    /// remaining signal are removed entirely. Returns dropped occurrences.
    pub fn prune_occurrences(
        &self,
        workspace_id: Uuid,
        kind: ComputedPropertyKind,
        computed_property_id: Uuid,
        state_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> usize {
        let mut dropped = 0;
        let mut emptied: Vec<StateKey> = Vec::new();
        for mut entry in self.inner.iter_mut() {
            let key = entry.key();
            if key.workspace_id != workspace_id
                || key.kind != kind
                || key.computed_property_id != computed_property_id
                || key.state_id != state_id
            {
                continue;
            }
            let before = entry.occurrences.len();
            entry.occurrences.retain(|_, o| o.event_time > cutoff);
            dropped += before - entry.occurrences.len();
            if entry.last.is_none() && entry.distinct.is_empty() && entry.occurrences.is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        for key in emptied {
            self.inner.remove(&key);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
