//! Snapshot data model.
//!
//! Snapshot objects are immutable after parse; orchestrators never mutate them in place, they
//! build a new one (DOWN) or derive a [`RestorePlanItem`] list from one (UP).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot format version this crate understands. Any other value is a validation error.
pub const SNAPSHOT_VERSION: &str = "v1";

/// One discovered deployment's replica count at the moment the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub replicas: u32,
}

impl ResourceEntry {
    /// Sort key matching the deterministic on-disk ordering.
    fn sort_key(&self) -> (&str, &str, &str) {
        (&self.namespace, &self.name, &self.kind)
    }
}

/// The on-disk record written by DOWN and consumed by UP.
///
/// `operator_replicas` and `timestamp` are present-or-default fields: absent on parse becomes a
/// documented default rather than a sentinel zero value, which is why they are
/// plain (non-`Option`) fields filled in by [`crate::snapshot::codec::normalize`] rather than
/// left `Option` all the way through the orchestrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub node: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "operatorReplicas")]
    pub operator_replicas: u32,
    pub resources: Vec<ResourceEntry>,
}

impl Snapshot {
    /// Returns a copy with `resources` sorted by `(namespace, name, kind)`.
    pub fn sorted(mut self) -> Self {
        self.resources.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self
    }
}

/// Where a single restored deployment currently stands in the UP workflow (UP-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Pending,
    Restoring,
    Success,
    Error,
    Missing,
}

/// A single deployment's restoration plan entry, derived from the snapshot plus a live cluster
/// observation (`GetDeployment`) during UP's `LoadingState` step.
#[derive(Debug, Clone)]
pub struct RestorePlanItem {
    pub namespace: String,
    pub name: String,
    pub target_replicas: u32,
    /// `-1` when the deployment is absent from the cluster.
    pub current_replicas: i64,
    pub status: RestoreStatus,
}

impl RestorePlanItem {
    pub fn is_missing(&self) -> bool {
        self.current_replicas < 0
    }
}
