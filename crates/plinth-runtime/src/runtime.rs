//! The runtime facade.
//!
//! [`Runtime::start`] wires the pieces together: one event bus, one
//! context store, one file store, and the background sweeper. Consumers
//! hold the runtime behind an [`Arc`] and reach the stores through its
//! accessors; `shutdown` tears everything down in an order that keeps
//! the per-resource event guarantees intact.

use std::sync::Arc;

use parking_lot::Mutex;
use plinth_bus::{BusError, BusStats, EventBus, Subscription};
use plinth_core::EventFilter;
use plinth_store::{sweep, ContextStats, ContextStore, FileStats, FileStore};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::RuntimeConfig;

/// Point-in-time counters across every runtime component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    /// Context store counters.
    pub context: ContextStats,
    /// File store counters.
    pub files: FileStats,
    /// Event bus counters.
    pub bus: BusStats,
}

/// Shared runtime state for one process.
///
/// All methods take `&self`; share the runtime behind an [`Arc`].
pub struct Runtime {
    bus: EventBus,
    context: Arc<ContextStore>,
    files: Arc<FileStore>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Runtime {
    /// Build the stores on a fresh bus and spawn the expiry sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(mut config: RuntimeConfig) -> Self {
        config.validate();
        let bus = EventBus::new(config.bus.clone());
        let context = Arc::new(ContextStore::new(bus.clone()));
        let files = Arc::new(FileStore::new(bus.clone()));
        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(sweep::run_sweeper(
            Arc::clone(&context),
            config.sweep_interval(),
            cancel.clone(),
        ));
        info!(sweep_interval_ms = config.sweep_interval_ms, "runtime started");
        Self {
            bus,
            context,
            files,
            cancel,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// The context store.
    #[must_use]
    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    /// The file version store.
    #[must_use]
    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    /// The event bus handle.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to change events; see [`EventBus::subscribe`].
    ///
    /// # Errors
    ///
    /// Forwards [`BusError::ReplayGapDetected`] and [`BusError::Closed`]
    /// from the bus.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        replay_from: Option<u64>,
    ) -> Result<Subscription, BusError> {
        self.bus.subscribe(filter, replay_from)
    }

    /// Counters across every component.
    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            context: self.context.stats(),
            files: self.files.stats(),
            bus: self.bus.stats(),
        }
    }

    /// Graceful shutdown.
    ///
    /// Stops the sweeper, closes both stores to further writes, and
    /// ends every subscription; consumers drain what was already queued
    /// and then see end-of-stream. Reads keep working. Calling this a
    /// second time is a no-op.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let Some(sweeper) = self.sweeper.lock().take() else {
            return;
        };
        info!("runtime shutdown initiated");

        // Stop the sweeper first so no sweep publishes into a bus that
        // is already closed.
        self.cancel.cancel();
        let _ = sweeper.await;

        self.context.close();
        self.files.close();
        self.bus.shutdown();
        info!("runtime shutdown complete");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Covers runtimes dropped without an explicit shutdown.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use bytes::Bytes;
    use plinth_core::{ChangeEvent, EventType, ResourceKind};
    use plinth_store::StoreError;
    use serde_json::json;
    use tokio::time::{sleep, timeout};

    use super::*;

    fn quick_sweep_config() -> RuntimeConfig {
        RuntimeConfig {
            sweep_interval_ms: 20,
            ..RuntimeConfig::default()
        }
    }

    async fn recv_now(sub: &mut Subscription) -> Arc<ChangeEvent> {
        timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn stores_share_one_event_stream() {
        let runtime = Runtime::start(RuntimeConfig::default());
        let mut sub = runtime.subscribe(EventFilter::default(), None).unwrap();

        let _ = runtime.context().set("k", json!(1), None, None).unwrap();
        let _ = runtime
            .files()
            .put("f", Bytes::from_static(b"content"), None)
            .unwrap();

        let first = recv_now(&mut sub).await;
        let second = recv_now(&mut sub).await;
        assert_eq!(first.resource_kind, ResourceKind::Context);
        assert_eq!(second.resource_kind, ResourceKind::File);
        assert!(first.seq < second.seq);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn expired_context_entry_vanishes_and_emits_expired() {
        let runtime = Runtime::start(quick_sweep_config());
        let mut sub = runtime
            .subscribe(EventFilter::for_kind(ResourceKind::Context), None)
            .unwrap();

        let _ = runtime
            .context()
            .set("temp", json!("v"), Some(Duration::from_millis(30)), None)
            .unwrap();
        assert!(runtime.context().get("temp").is_some());

        let created = recv_now(&mut sub).await;
        assert_eq!(created.event_type, EventType::Created);

        // After the deadline the entry is gone from reads and the
        // sweeper publishes its expiry.
        let expired = recv_now(&mut sub).await;
        assert_eq!(expired.event_type, EventType::Expired);
        assert_eq!(expired.resource_id, "temp");
        assert!(runtime.context().get("temp").is_none());
        assert_eq!(runtime.context().stats().total_entries, 0);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn file_history_survives_overwrites() {
        let runtime = Runtime::start(RuntimeConfig::default());

        let _ = runtime
            .files()
            .put("doc.md", Bytes::from_static(b"draft"), None)
            .unwrap();
        let _ = runtime
            .files()
            .put("doc.md", Bytes::from_static(b"final"), None)
            .unwrap();

        let versions = runtime.files().list_versions("doc.md");
        let numbers: Vec<u64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(
            runtime.files().get("doc.md", Some(1)).unwrap().content,
            Bytes::from_static(b"draft")
        );
        assert_eq!(
            runtime.files().get("doc.md", None).unwrap().content,
            Bytes::from_static(b"final")
        );

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn late_subscriber_replays_missed_events() {
        let runtime = Runtime::start(RuntimeConfig::default());

        let _ = runtime.context().set("a", json!(1), None, None).unwrap();
        let _ = runtime.context().set("b", json!(2), None, None).unwrap();

        let mut sub = runtime.subscribe(EventFilter::default(), Some(1)).unwrap();
        let first = recv_now(&mut sub).await;
        let second = recv_now(&mut sub).await;
        assert_eq!(first.resource_id, "a");
        assert_eq!(second.resource_id, "b");

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_stores_and_subscriptions() {
        let runtime = Runtime::start(RuntimeConfig::default());
        let mut sub = runtime.subscribe(EventFilter::default(), None).unwrap();
        let _ = runtime.context().set("k", json!(1), None, None).unwrap();
        let _ = runtime
            .files()
            .put("f", Bytes::from_static(b"x"), None)
            .unwrap();

        runtime.shutdown().await;

        // Queued events drain, then the stream ends.
        assert!(recv_now(&mut sub).await.seq > 0);
        assert!(recv_now(&mut sub).await.seq > 0);
        assert_matches!(sub.recv().await, Ok(None));

        // Writes fail, reads keep serving.
        assert_matches!(
            runtime.context().set("k", json!(2), None, None),
            Err(StoreError::StorageUnavailable { .. })
        );
        assert_matches!(
            runtime.files().put("f", Bytes::from_static(b"y"), None),
            Err(StoreError::StorageUnavailable { .. })
        );
        assert_eq!(runtime.context().get("k").unwrap().value, json!(1));
        assert_eq!(runtime.files().get("f", None).unwrap().version_number, 1);

        // New subscriptions are refused.
        assert_matches!(
            runtime.subscribe(EventFilter::default(), None),
            Err(BusError::Closed)
        );
    }

    #[tokio::test]
    async fn shutdown_twice_is_a_noop() {
        let runtime = Runtime::start(RuntimeConfig::default());
        runtime.shutdown().await;
        runtime.shutdown().await;
        assert_eq!(runtime.bus().subscription_count(), 0);
    }

    #[tokio::test]
    async fn sweeper_stops_at_shutdown() {
        let runtime = Runtime::start(quick_sweep_config());
        runtime.shutdown().await;

        // A key expiring after shutdown stays in place; nothing sweeps.
        sleep(Duration::from_millis(60)).await;
        assert_eq!(runtime.context().sweep_expired(), 0);
    }

    #[tokio::test]
    async fn stats_aggregate_all_components() {
        let runtime = Runtime::start(RuntimeConfig::default());

        let _ = runtime.context().set("k", json!(1), None, None).unwrap();
        let _ = runtime
            .files()
            .put("f", Bytes::from_static(b"abc"), None)
            .unwrap();
        let sub = runtime.subscribe(EventFilter::default(), None).unwrap();

        let stats = runtime.stats();
        assert_eq!(stats.context.total_entries, 1);
        assert_eq!(stats.files.versions, 1);
        assert_eq!(stats.files.total_bytes, 3);
        assert_eq!(stats.bus.subscriptions, 1);
        assert_eq!(stats.bus.next_seq, 3);

        let value = serde_json::to_value(stats).unwrap();
        assert_eq!(value["context"]["totalEntries"], 1);
        assert_eq!(value["files"]["totalBytes"], 3);
        assert_eq!(value["bus"]["subscriptions"], 1);

        drop(sub);
        runtime.shutdown().await;
    }
}
