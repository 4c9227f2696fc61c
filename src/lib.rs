//! Safe node maintenance orchestration for a Kubernetes cluster running a Ceph storage operator.
//!
//! The public surface mirrors the operations external collaborators (a CLI, a TUI, configuration
//! loading) invoke the core through: [`orchestrator::execute_down_phase`] and
//! [`orchestrator::execute_up_phase`] drive the two maintenance workflows; [`snapshot`] exposes
//! the persisted-state subsystem (parse/write/backup/validate) standalone for tooling that needs
//! it without running a full phase.

pub mod cancel;
pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod progress;
pub mod snapshot;

pub use error::{Error, Result};
pub use orchestrator::{execute_down_phase, execute_up_phase, DownOptions, DownOutcome, UpOptions, UpOutcome};
