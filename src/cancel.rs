//! Ambient cancellation propagation.
//!
//! Every orchestrator operation and every gateway call takes a `&CancellationToken`. This
//! module only adds the couple of helpers every call site otherwise re-derives by hand.

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Returns `Err(Error::Cancelled)` if `token` has been tripped. Call at step boundaries before
/// issuing a new mutation: no new mutation should be issued after cancellation.
pub fn check(token: &CancellationToken, step: &str) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled(step.to_string()))
    } else {
        Ok(())
    }
}

/// Sleeps for `dur`, returning early with `Error::Cancelled` if `token` trips mid-sleep. Used by
/// every gateway poll loop so an in-flight wait returns promptly on cancellation.
pub async fn sleep_cancellable(token: &CancellationToken, dur: Duration, step: &str) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(dur) => Ok(()),
        _ = token.cancelled() => Err(Error::Cancelled(step.to_string())),
    }
}
