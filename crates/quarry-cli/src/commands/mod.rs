//! CLI command implementations.

pub mod build;
pub mod control;
pub mod resolve;

use quarry_core::{CancelHandle, CancelSignal};

/// Returns a signal that fires on Ctrl-C.
///
/// Must be called inside a Tokio runtime.
#[must_use]
pub fn cancel_on_ctrl_c() -> CancelSignal {
    let handle = CancelHandle::new();
    let signal = handle.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    signal
}
