//! Periodic expiry sweep for the context store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ContextStore;

/// Run the expiry sweep loop until `cancel` fires.
///
/// At each `interval` tick, entries whose deadline has passed are
/// removed from `store` and one `expired` event is published per
/// removal. A tick with nothing expired is a no-op, so expired entries
/// stay invisible to reads but occupy memory for at most one interval.
pub async fn run_sweeper(store: Arc<ContextStore>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = store.sweep_expired();
            }
            () = cancel.cancelled() => {
                debug!("context sweeper stopped");
                return;
            }
        }
    }
}
