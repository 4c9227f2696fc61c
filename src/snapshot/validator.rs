//! Snapshot validator (C4): post-parse semantic checks, age warnings, missing-resource probes.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::snapshot::codec::parse_file;
use crate::snapshot::model::{ResourceEntry, Snapshot};

/// A non-fatal advisory surfaced alongside a successfully parsed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The snapshot is older than `opts.max_age`. The caller (UP's Confirm step) must treat this
    /// as requiring explicit confirmation.
    AgeExceeded {
        age: Duration,
        max_age: Duration,
        requires_confirmation: bool,
    },
    /// A resource recorded in the snapshot could not be found by the caller-supplied probe. The
    /// orchestrator, not this validator, decides whether that is fatal.
    MissingResource {
        resource: ResourceEntry,
        requires_confirmation: bool,
    },
}

impl Warning {
    pub fn requires_confirmation(&self) -> bool {
        match self {
            Warning::AgeExceeded {
                requires_confirmation,
                ..
            } => *requires_confirmation,
            Warning::MissingResource {
                requires_confirmation,
                ..
            } => *requires_confirmation,
        }
    }
}

/// Options controlling [`validate_state`]'s age check. `now` is injectable so tests can pin a
/// fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    /// Zero disables the age check entirely.
    pub max_age: Duration,
    pub now: DateTime<Utc>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions {
            max_age: Duration::ZERO,
            now: Utc::now(),
        }
    }
}

/// Reads and parses the snapshot at `path`, then runs the age check against `opts`.
/// `find_missing_resources` is a separate call since it needs an async cluster probe the
/// validator does not itself own.
pub fn validate_file(path: &Path, opts: ValidateOptions) -> Result<(Snapshot, Vec<Warning>)> {
    let snapshot = parse_file(path)?;
    let warnings = validate_state(&snapshot, opts);
    Ok((snapshot, warnings))
}

/// Runs the age check against an already-parsed snapshot.
pub fn validate_state(snapshot: &Snapshot, opts: ValidateOptions) -> Vec<Warning> {
    let mut warnings = Vec::new();
    if opts.max_age > Duration::ZERO {
        let age = opts
            .now
            .signed_duration_since(snapshot.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > opts.max_age {
            warnings.push(Warning::AgeExceeded {
                age,
                max_age: opts.max_age,
                requires_confirmation: true,
            });
        }
    }
    warnings
}

/// Returns the subset of `snapshot.resources` for which `probe` reports absence. `probe` is
/// typically backed by `Gateway::get_deployment` but is passed as a plain closure here so this
/// module stays independent of the gateway trait.
pub async fn find_missing_resources<F, Fut>(
    snapshot: &Snapshot,
    probe: F,
) -> Result<Vec<ResourceEntry>>
where
    F: Fn(ResourceEntry) -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let mut missing = Vec::new();
    for resource in &snapshot.resources {
        let exists = probe(resource.clone()).await?;
        if !exists {
            missing.push(resource.clone());
        }
    }
    Ok(missing)
}
