//! Structured progress reporting (C8).
//!
//! Orchestrators emit one [`ProgressEvent`] per step boundary, synchronously, through whatever
//! [`ProgressSink`] the caller supplied. The sink must not block indefinitely — an observer that
//! wants to decouple rendering from reconciliation runs its own queue, which is exactly what
//! [`ChannelProgressSink`] is for.

use tokio::sync::mpsc;

/// One of the enumerated stages an orchestrator passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreFlight,
    Cordon,
    SetNoOut,
    SaveState,
    Operator,
    Discover,
    ScaleDown,
    ScaleUp,
    Uncordon,
    Quorum,
    QuorumOk,
    UnsetNoOut,
    Skip,
    Warning,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PreFlight => "pre-flight",
            Stage::Cordon => "cordon",
            Stage::SetNoOut => "set-noout",
            Stage::SaveState => "save-state",
            Stage::Operator => "operator",
            Stage::Discover => "discover",
            Stage::ScaleDown => "scale-down",
            Stage::ScaleUp => "scale-up",
            Stage::Uncordon => "uncordon",
            Stage::Quorum => "quorum",
            Stage::QuorumOk => "quorum-ok",
            Stage::UnsetNoOut => "unset-noout",
            Stage::Skip => "skip",
            Stage::Warning => "warning",
            Stage::Complete => "complete",
        }
    }
}

/// A single progress update emitted at a step boundary.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub description: String,
    pub deployment: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, description: impl Into<String>) -> Self {
        ProgressEvent {
            stage,
            description: description.into(),
            deployment: None,
        }
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }
}

/// Receives structured progress events emitted by an orchestrator.
pub trait ProgressSink: Send {
    fn emit(&mut self, event: ProgressEvent);
}

/// Drops every event. The default for headless callers and for tests that only assert on the
/// orchestrator's return value.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&mut self, _event: ProgressEvent) {}
}

/// Forwards events onto an unbounded channel so a decoupled consumer (e.g. the excluded TUI) can
/// drain them on its own schedule without blocking the orchestrator.
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelProgressSink { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&mut self, event: ProgressEvent) {
        // The receiver may already be gone (caller dropped it); that's not our problem to
        // report, the orchestrator keeps running.
        let _ = self.sender.send(event);
    }
}

/// Collects every event in order. Used by tests asserting on progress-event sequencing,
/// such as the monitor-quorum barrier ordering.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    pub events: Vec<ProgressEvent>,
}

impl ProgressSink for RecordingProgressSink {
    fn emit(&mut self, event: ProgressEvent) {
        self.events.push(event);
    }
}

impl RecordingProgressSink {
    pub fn stage_sequence(&self) -> Vec<&'static str> {
        self.events.iter().map(|e| e.stage.as_str()).collect()
    }
}
