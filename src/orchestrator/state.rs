//! Shared state-machine plumbing for the DOWN and UP orchestrators.
//!
//! Each orchestrator is modeled as an explicit enum of states (`DownState`, `UpState`) reached in
//! strict sequence; the side effects for a step are isolated in that step's function in `down.rs`
//! / `up.rs`, and this module only holds the state enums plus the progress/tracing helper every
//! step calls at its boundary. Keeping the transition bookkeeping here (rather than scattering
//! `tracing::info!` + `sink.emit(...)` pairs across both files) is what makes cancellation and
//! step-sequencing easy to audit in one place.

use tracing::info;

use crate::progress::{ProgressEvent, ProgressSink, Stage};

/// States the DOWN orchestrator passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownState {
    Init,
    PreFlight,
    Cordon,
    SetNoOut,
    SaveState,
    ScaleOperatorDown,
    DiscoverDeployments,
    ScaleDeploymentsDown,
    Complete,
    Error,
}

/// States the UP orchestrator passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpState {
    Init,
    LoadingState,
    Confirm,
    PreFlight,
    Uncordon,
    RestoreDeployments,
    ScaleOperatorUp,
    UnsetNoOut,
    Complete,
    Error,
}

/// Emits a step-boundary progress event through `sink` and a matching `tracing::info!`, so the
/// programmatic observer and the log stream never drift out of sync.
pub fn emit(sink: &mut dyn ProgressSink, stage: Stage, description: impl Into<String>) {
    let description = description.into();
    info!(stage = stage.as_str(), "{description}");
    sink.emit(ProgressEvent::new(stage, description));
}

/// Same as [`emit`] but attaches the deployment the step concerns.
pub fn emit_for_deployment(
    sink: &mut dyn ProgressSink,
    stage: Stage,
    description: impl Into<String>,
    deployment: impl Into<String>,
) {
    let description = description.into();
    let deployment = deployment.into();
    info!(stage = stage.as_str(), deployment = %deployment, "{description}");
    sink.emit(ProgressEvent::new(stage, description).with_deployment(deployment));
}
