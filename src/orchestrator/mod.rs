//! Maintenance orchestrators (C6, C7).
//!
//! Both phases share the same shape: an explicit ordered state enum and step functions that
//! isolate side effects from sequencing. `state` lives in this module; the two phase-specific
//! workflows live in `down` and `up`.

pub mod down;
pub mod state;
pub mod up;

pub use down::{execute_down_phase, DownOptions, DownOutcome};
pub use up::{execute_up_phase, UpOptions, UpOutcome};
