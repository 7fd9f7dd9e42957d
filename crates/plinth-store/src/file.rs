//! Append-only file version store.
//!
//! Each logical path owns an independent chain of immutable versions
//! numbered 1, 2, 3 with no gaps. Writing never replaces content, it
//! appends; identical bytes written twice still become two versions.
//! The only way content leaves the store is [`FileStore::delete_all`],
//! which drops a path's whole chain in one step.
//!
//! Writes to the same path are serialized on the path's map entry, so
//! concurrent writers each get a distinct version number and the
//! chain stays gapless.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use plinth_bus::EventBus;
use plinth_core::{ChangeEvent, EventType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::errors::StoreError;

// ─── Types ───────────────────────────────────────────────────────────────────

/// One immutable version of a file, content included.
#[derive(Clone, Debug, PartialEq)]
pub struct FileVersion {
    /// Logical path the version belongs to.
    pub path: String,
    /// Position in the path's chain, starting at 1.
    pub version_number: u64,
    /// The stored bytes.
    pub content: Bytes,
    /// Lowercase hex SHA-256 of `content`.
    pub content_hash: String,
    /// Content length in bytes.
    pub size: u64,
    /// When the version was written.
    pub created_at: DateTime<Utc>,
    /// Caller-supplied annotations for this version.
    pub metadata: HashMap<String, String>,
}

impl FileVersion {
    /// The content-free view of this version.
    #[must_use]
    pub fn info(&self) -> FileVersionInfo {
        FileVersionInfo {
            path: self.path.clone(),
            version_number: self.version_number,
            content_hash: self.content_hash.clone(),
            size: self.size,
            created_at: self.created_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Version metadata without the content bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersionInfo {
    /// Logical path the version belongs to.
    pub path: String,
    /// Position in the path's chain, starting at 1.
    pub version_number: u64,
    /// Lowercase hex SHA-256 of the content.
    pub content_hash: String,
    /// Content length in bytes.
    pub size: u64,
    /// When the version was written.
    pub created_at: DateTime<Utc>,
    /// Caller-supplied annotations for this version.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Aggregate view of one path's chain.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSummary {
    /// The logical path.
    pub path: String,
    /// Number of versions in the chain.
    pub version_count: u64,
    /// Sum of all version sizes in bytes.
    pub total_size: u64,
    /// The newest version's metadata.
    pub latest: FileVersionInfo,
}

/// Point-in-time counters for the file store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    /// Number of paths with at least one version.
    pub paths: usize,
    /// Total versions across all paths.
    pub versions: usize,
    /// Total stored bytes across all versions.
    pub total_bytes: u64,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Concurrent store of per-path version chains.
///
/// Cheap to share behind an [`std::sync::Arc`]; all methods take
/// `&self`.
pub struct FileStore {
    chains: DashMap<String, Vec<FileVersion>>,
    bus: EventBus,
    closed: AtomicBool,
}

impl FileStore {
    /// Create an empty store publishing change events on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            chains: DashMap::new(),
            bus,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable("file store is closed"));
        }
        Ok(())
    }

    /// Append `content` as the next version of `path`.
    ///
    /// The first write to a path creates version 1; later writes append
    /// version N+1. Content is hashed but never deduplicated, so
    /// re-uploading identical bytes still produces a new version.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] when `path` is empty,
    /// [`StoreError::StorageUnavailable`] when the store is closed.
    #[instrument(skip(self, content, metadata), fields(size = content.len()))]
    pub fn put(
        &self,
        path: &str,
        content: Bytes,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<FileVersion, StoreError> {
        self.ensure_open()?;
        if path.is_empty() {
            return Err(StoreError::invalid("file path must be non-empty"));
        }
        let now = Utc::now();
        let content_hash = hex_sha256(&content);
        let size = content.len() as u64;
        let metadata = metadata.unwrap_or_default();

        let version = match self.chains.entry(path.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let chain = occupied.get_mut();
                let version_number = chain.last().map_or(0, |v| v.version_number) + 1;
                let version = FileVersion {
                    path: path.to_owned(),
                    version_number,
                    content,
                    content_hash,
                    size,
                    created_at: now,
                    metadata,
                };
                chain.push(version.clone());
                let _ = self.bus.publish(ChangeEvent::file(
                    path,
                    EventType::Updated,
                    version_number,
                    size,
                    version.content_hash.clone(),
                ));
                version
            }
            Entry::Vacant(vacant) => {
                let version = FileVersion {
                    path: path.to_owned(),
                    version_number: 1,
                    content,
                    content_hash,
                    size,
                    created_at: now,
                    metadata,
                };
                let _slot = vacant.insert(vec![version.clone()]);
                let _ = self.bus.publish(ChangeEvent::file(
                    path,
                    EventType::Created,
                    1,
                    size,
                    version.content_hash.clone(),
                ));
                version
            }
        };

        debug!(path, version = version.version_number, "file version written");
        Ok(version)
    }

    /// Fetch one version of `path`, content included.
    ///
    /// `version_number` selects a specific version; `None` means the
    /// latest. Unknown paths and out-of-range versions return `None`.
    #[must_use]
    pub fn get(&self, path: &str, version_number: Option<u64>) -> Option<FileVersion> {
        let chain = self.chains.get(path)?;
        let versions = chain.value();
        match version_number {
            // Chains are 1-based and gapless, so version N sits at N-1.
            Some(0) => None,
            Some(n) => versions.get(n as usize - 1).cloned(),
            None => versions.last().cloned(),
        }
    }

    /// List all versions of `path` in ascending order, metadata only.
    /// Unknown paths produce an empty list.
    #[must_use]
    pub fn list_versions(&self, path: &str) -> Vec<FileVersionInfo> {
        self.chains.get(path).map_or_else(Vec::new, |chain| {
            chain.value().iter().map(FileVersion::info).collect()
        })
    }

    /// Summarize paths starting with `prefix`, ordered by path. An
    /// empty prefix matches everything. `limit` caps the result after
    /// ordering.
    #[must_use]
    pub fn list_paths(&self, prefix: &str, limit: Option<usize>) -> Vec<PathSummary> {
        let mut summaries: Vec<PathSummary> = self
            .chains
            .iter()
            .filter(|found| found.key().starts_with(prefix))
            .filter_map(|found| {
                let versions = found.value();
                versions.last().map(|latest| PathSummary {
                    path: found.key().clone(),
                    version_count: versions.len() as u64,
                    total_size: versions.iter().map(|v| v.size).sum(),
                    latest: latest.info(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(limit) = limit {
            summaries.truncate(limit);
        }
        summaries
    }

    /// Remove every version of `path` in one step.
    ///
    /// Returns whether the path existed. Readers never observe a
    /// partially deleted chain; one `deleted` event describing the
    /// newest version covers the whole removal.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageUnavailable`] when the store is closed.
    #[instrument(skip(self))]
    pub fn delete_all(&self, path: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        match self.chains.entry(path.to_owned()) {
            Entry::Occupied(occupied) => {
                {
                    let versions = occupied.get();
                    if let Some(latest) = versions.last() {
                        let _ = self.bus.publish(ChangeEvent::file(
                            path,
                            EventType::Deleted,
                            latest.version_number,
                            latest.size,
                            latest.content_hash.clone(),
                        ));
                    }
                }
                let removed = occupied.remove();
                debug!(path, versions = removed.len(), "file chain deleted");
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// Counters over everything stored right now.
    #[must_use]
    pub fn stats(&self) -> FileStats {
        let mut paths = 0_usize;
        let mut versions = 0_usize;
        let mut total_bytes = 0_u64;
        for found in self.chains.iter() {
            paths += 1;
            versions += found.value().len();
            total_bytes += found.value().iter().map(|v| v.size).sum::<u64>();
        }
        FileStats {
            paths,
            versions,
            total_bytes,
        }
    }

    /// Refuse further mutations. Reads keep serving the in-memory data.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use plinth_bus::{BusConfig, Subscription};
    use plinth_core::{EventFilter, PayloadSummary, ResourceKind};
    use tokio::time::timeout;

    use super::*;

    const HELLO_HASH: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn make_store() -> (FileStore, EventBus) {
        let bus = EventBus::new(BusConfig::default());
        (FileStore::new(bus.clone()), bus)
    }

    fn subscribe(bus: &EventBus) -> Subscription {
        bus.subscribe(EventFilter::for_kind(ResourceKind::File), None)
            .unwrap()
    }

    async fn recv_now(sub: &mut Subscription) -> Arc<ChangeEvent> {
        timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn put_creates_version_one_with_hash() {
        let (store, _bus) = make_store();

        let version = store
            .put("notes.md", Bytes::from_static(b"hello world"), None)
            .unwrap();

        assert_eq!(version.path, "notes.md");
        assert_eq!(version.version_number, 1);
        assert_eq!(version.size, 11);
        assert_eq!(version.content_hash, HELLO_HASH);
        assert_eq!(version.content, Bytes::from_static(b"hello world"));
    }

    #[test]
    fn put_appends_versions_in_order() {
        let (store, _bus) = make_store();

        let first = store.put("f", Bytes::from_static(b"one"), None).unwrap();
        let second = store.put("f", Bytes::from_static(b"two"), None).unwrap();

        assert_eq!(first.version_number, 1);
        assert_eq!(second.version_number, 2);

        let versions = store.list_versions("f");
        let numbers: Vec<u64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn identical_content_still_becomes_new_version() {
        let (store, _bus) = make_store();

        let first = store.put("f", Bytes::from_static(b"same"), None).unwrap();
        let second = store.put("f", Bytes::from_static(b"same"), None).unwrap();

        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(second.version_number, 2);
        assert_eq!(store.list_versions("f").len(), 2);
    }

    #[test]
    fn put_rejects_empty_path() {
        let (store, _bus) = make_store();
        assert_matches!(
            store.put("", Bytes::from_static(b"x"), None),
            Err(StoreError::InvalidArgument { .. })
        );
    }

    #[test]
    fn get_selects_specific_or_latest_version() {
        let (store, _bus) = make_store();

        let _ = store.put("f", Bytes::from_static(b"one"), None).unwrap();
        let _ = store.put("f", Bytes::from_static(b"two"), None).unwrap();

        assert_eq!(store.get("f", None).unwrap().content, Bytes::from_static(b"two"));
        assert_eq!(
            store.get("f", Some(1)).unwrap().content,
            Bytes::from_static(b"one")
        );
        assert!(store.get("f", Some(0)).is_none());
        assert!(store.get("f", Some(3)).is_none());
        assert!(store.get("missing", None).is_none());
    }

    #[test]
    fn list_versions_unknown_path_is_empty() {
        let (store, _bus) = make_store();
        assert!(store.list_versions("missing").is_empty());
    }

    #[test]
    fn list_paths_summarizes_chains() {
        let (store, _bus) = make_store();

        let _ = store.put("docs/a.md", Bytes::from_static(b"aa"), None).unwrap();
        let _ = store.put("docs/a.md", Bytes::from_static(b"aaaa"), None).unwrap();
        let _ = store.put("docs/b.md", Bytes::from_static(b"b"), None).unwrap();
        let _ = store.put("src/main.rs", Bytes::from_static(b"fn"), None).unwrap();

        let docs = store.list_paths("docs/", None);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].path, "docs/a.md");
        assert_eq!(docs[0].version_count, 2);
        assert_eq!(docs[0].total_size, 6);
        assert_eq!(docs[0].latest.version_number, 2);
        assert_eq!(docs[0].latest.size, 4);
        assert_eq!(docs[1].path, "docs/b.md");

        let limited = store.list_paths("", Some(1));
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].path, "docs/a.md");

        assert!(store.list_paths("absent/", None).is_empty());
    }

    #[tokio::test]
    async fn delete_all_drops_whole_chain() {
        let (store, bus) = make_store();

        let _ = store.put("f", Bytes::from_static(b"one"), None).unwrap();
        let _ = store.put("f", Bytes::from_static(b"two"), None).unwrap();
        let _ = store.put("f", Bytes::from_static(b"three"), None).unwrap();

        let mut sub = subscribe(&bus);
        assert!(store.delete_all("f").unwrap());
        assert!(store.get("f", None).is_none());
        assert!(store.list_versions("f").is_empty());
        assert_eq!(store.stats().paths, 0);

        // One deleted event describing the newest version, nothing more.
        let deleted = recv_now(&mut sub).await;
        assert_eq!(deleted.event_type, EventType::Deleted);
        assert_eq!(
            deleted.summary,
            PayloadSummary::File {
                version_number: 3,
                size: 5,
                content_hash: hex_sha256(b"three"),
            }
        );
        assert!(timeout(Duration::from_millis(50), sub.recv()).await.is_err());
    }

    #[test]
    fn delete_all_unknown_path_returns_false() {
        let (store, _bus) = make_store();
        assert!(!store.delete_all("missing").unwrap());
    }

    #[test]
    fn deleted_path_restarts_at_version_one() {
        let (store, _bus) = make_store();

        let _ = store.put("f", Bytes::from_static(b"one"), None).unwrap();
        let _ = store.put("f", Bytes::from_static(b"two"), None).unwrap();
        let _ = store.delete_all("f").unwrap();

        let fresh = store.put("f", Bytes::from_static(b"again"), None).unwrap();
        assert_eq!(fresh.version_number, 1);
    }

    #[tokio::test]
    async fn put_events_distinguish_created_and_updated() {
        let (store, bus) = make_store();
        let mut sub = subscribe(&bus);

        let _ = store.put("f", Bytes::from_static(b"one"), None).unwrap();
        let _ = store.put("f", Bytes::from_static(b"two"), None).unwrap();

        let created = recv_now(&mut sub).await;
        assert_eq!(created.event_type, EventType::Created);
        assert_eq!(created.resource_id, "f");

        let updated = recv_now(&mut sub).await;
        assert_eq!(updated.event_type, EventType::Updated);
        assert_eq!(
            updated.summary,
            PayloadSummary::File {
                version_number: 2,
                size: 3,
                content_hash: hex_sha256(b"two"),
            }
        );
    }

    #[tokio::test]
    async fn concurrent_puts_assign_gapless_versions() {
        let (store, _bus) = make_store();
        let store = Arc::new(store);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16_u8 {
            let store = Arc::clone(&store);
            let _ = tasks.spawn(async move {
                store
                    .put("shared", Bytes::from(vec![i]), None)
                    .unwrap()
                    .version_number
            });
        }

        let mut versions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            versions.push(joined.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=16).collect::<Vec<u64>>());
        let numbers: Vec<u64> = store
            .list_versions("shared")
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, (1..=16).collect::<Vec<u64>>());
    }

    #[test]
    fn metadata_rides_along_per_version() {
        let (store, _bus) = make_store();

        let first = store
            .put(
                "f",
                Bytes::from_static(b"one"),
                Some(HashMap::from([("author".to_owned(), "agent".to_owned())])),
            )
            .unwrap();
        let second = store.put("f", Bytes::from_static(b"two"), None).unwrap();

        assert_eq!(first.metadata.get("author").map(String::as_str), Some("agent"));
        assert!(second.metadata.is_empty());

        let versions = store.list_versions("f");
        assert_eq!(versions[0].metadata.get("author").map(String::as_str), Some("agent"));
    }

    #[test]
    fn close_rejects_mutations_but_keeps_reads() {
        let (store, _bus) = make_store();
        let _ = store.put("f", Bytes::from_static(b"one"), None).unwrap();

        store.close();

        assert_matches!(
            store.put("f", Bytes::from_static(b"two"), None),
            Err(StoreError::StorageUnavailable { .. })
        );
        assert_matches!(
            store.delete_all("f"),
            Err(StoreError::StorageUnavailable { .. })
        );
        assert_eq!(store.get("f", None).unwrap().version_number, 1);
        assert_eq!(store.list_versions("f").len(), 1);
    }

    #[test]
    fn stats_totals() {
        let (store, _bus) = make_store();

        let _ = store.put("a", Bytes::from_static(b"12345"), None).unwrap();
        let _ = store.put("a", Bytes::from_static(b"123"), None).unwrap();
        let _ = store.put("b", Bytes::from_static(b"1"), None).unwrap();

        assert_eq!(
            store.stats(),
            FileStats {
                paths: 2,
                versions: 3,
                total_bytes: 9,
            }
        );
    }

    #[test]
    fn version_info_serializes_camel_case() {
        let (store, _bus) = make_store();
        let info = store
            .put("f", Bytes::from_static(b"hello world"), None)
            .unwrap()
            .info();

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["versionNumber"], 1);
        assert_eq!(value["contentHash"], HELLO_HASH);
        assert_eq!(value["size"], 11);
        assert!(value.get("createdAt").is_some());
    }
}
