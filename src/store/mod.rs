//! Snapshot persistence.
//!
//! The engine only sees the [`SnapshotStore`] contract: save a document
//! under a scope, list a scope newest first, load by handle. Every backend
//! lays documents out the same way,
//! `<scope>/<createdAt>_<sanitized name>.json`, so handles move freely
//! between them. A save that would land on an existing handle takes the
//! first free `-2`, `-3`, ... suffix instead of overwriting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::snapshot::Snapshot;

#[cfg(feature = "storage")]
pub mod local;
#[cfg(feature = "storage")]
pub mod remote;

#[cfg(feature = "storage")]
pub use local::LocalStore;
#[cfg(feature = "storage")]
pub use remote::RemoteStore;

/// Most listings returned per scope.
pub const LIST_LIMIT: usize = 100;

/// Suffixes tried before a save gives up on finding a free handle.
pub const MAX_SUFFIX: usize = 1000;

/// Opaque key of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotHandle(String);

impl SnapshotHandle {
    pub fn new(path: impl Into<String>) -> Self {
        SnapshotHandle(path.into())
    }

    /// Handle of `name` saved at `created_at` under `scope`.
    pub fn for_document(scope: &str, created_at: u64, name: &str) -> Self {
        SnapshotHandle(format!("{scope}/{created_at}_{}.json", sanitize_name(name)))
    }

    /// The same handle with `-{n}` before the extension.
    pub fn numbered(&self, n: usize) -> Self {
        let stem = self.0.strip_suffix(".json").unwrap_or(&self.0);
        SnapshotHandle(format!("{stem}-{n}.json"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scope(&self) -> Option<&str> {
        self.0.split_once('/').map(|(scope, _)| scope)
    }

    /// Millisecond timestamp encoded in the file name.
    pub fn created_at(&self) -> Option<u64> {
        let file = self.0.rsplit('/').next()?;
        file.split_once('_')?.0.parse().ok()
    }

    /// The sanitized name part of the file name.
    pub fn stored_name(&self) -> Option<&str> {
        let file = self.0.rsplit('/').next()?;
        let rest = file.split_once('_')?.1;
        Some(rest.strip_suffix(".json").unwrap_or(rest))
    }

    /// Rejects handles that could escape a store's root.
    pub fn check_relative(&self) -> Result<(), EngineError> {
        let bad = self.0.is_empty()
            || self.0.starts_with('/')
            || self.0.contains('\\')
            || self.0.split('/').any(|part| part.is_empty() || part == "." || part == "..");
        if bad {
            return Err(EngineError::Validation(format!("invalid snapshot handle '{}'", self.0)));
        }
        Ok(())
    }
}

impl fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of a scope listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListing {
    pub name: String,
    pub created_at: u64,
    pub handle: SnapshotHandle,
}

/// Replace each run of characters outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// A trimmed, non-empty snapshot name.
pub fn validate_name(name: &str) -> Result<&str, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("snapshot name is required".into()));
    }
    Ok(name)
}

/// Newest first, ties by handle; at most [`LIST_LIMIT`].
pub(crate) fn sort_listings(listings: &mut Vec<SnapshotListing>) {
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.handle.cmp(&a.handle)));
    listings.truncate(LIST_LIMIT);
}

/// Where snapshots are kept.
#[allow(async_fn_in_trait)]
pub trait SnapshotStore {
    /// Scope this store saves under (a device id).
    fn scope(&self) -> &str;

    async fn save(&self, snapshot: &Snapshot) -> Result<SnapshotHandle, EngineError>;

    async fn list(&self, scope: &str) -> Result<Vec<SnapshotListing>, EngineError>;

    async fn load(&self, handle: &SnapshotHandle) -> Result<Snapshot, EngineError>;
}

// ── In-process store ────────────────────────────────────────

#[derive(Debug, Clone)]
struct Stored {
    name: String,
    created_at: u64,
    json: String,
}

/// Keeps documents in memory for the life of the process.
#[derive(Debug)]
pub struct MemoryStore {
    scope: String,
    documents: Mutex<BTreeMap<SnapshotHandle, Stored>>,
}

impl MemoryStore {
    pub fn new(scope: impl Into<String>) -> Self {
        MemoryStore {
            scope: scope.into(),
            documents: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn documents(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<SnapshotHandle, Stored>>, EngineError> {
        self.documents
            .lock()
            .map_err(|_| EngineError::Storage("memory store lock poisoned".into()))
    }
}

impl SnapshotStore for MemoryStore {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<SnapshotHandle, EngineError> {
        let handle = SnapshotHandle::for_document(&self.scope, snapshot.created_at, &snapshot.name);
        let stored = Stored {
            name: snapshot.name.clone(),
            created_at: snapshot.created_at,
            json: snapshot.to_json()?,
        };
        let mut documents = self.documents()?;
        let handle = (1..=MAX_SUFFIX)
            .map(|n| if n == 1 { handle.clone() } else { handle.numbered(n) })
            .find(|candidate| !documents.contains_key(candidate))
            .ok_or_else(|| EngineError::Storage(format!("no free name left for {handle}")))?;
        documents.insert(handle.clone(), stored);
        log::debug!(target: "store", "memory: saved {handle}");
        Ok(handle)
    }

    async fn list(&self, scope: &str) -> Result<Vec<SnapshotListing>, EngineError> {
        let mut listings: Vec<SnapshotListing> = self
            .documents()?
            .iter()
            .filter(|(handle, _)| handle.scope() == Some(scope))
            .map(|(handle, stored)| SnapshotListing {
                name: stored.name.clone(),
                created_at: stored.created_at,
                handle: handle.clone(),
            })
            .collect();
        sort_listings(&mut listings);
        Ok(listings)
    }

    async fn load(&self, handle: &SnapshotHandle) -> Result<Snapshot, EngineError> {
        let json = self
            .documents()?
            .get(handle)
            .map(|s| s.json.clone())
            .ok_or_else(|| EngineError::Storage(format!("no snapshot at {handle}")))?;
        Snapshot::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, created_at: u64) -> Snapshot {
        Snapshot {
            name: name.into(),
            created_at,
            bpm: 100.0,
            ..Snapshot::default()
        }
    }

    #[test]
    fn sanitizing_collapses_runs() {
        assert_eq!(sanitize_name("Mi patrón #1"), "Mi_patr_n_1");
        assert_eq!(sanitize_name("a  /\\ b.v2-x_y"), "a_b.v2-x_y");
        assert_eq!(sanitize_name("plain"), "plain");
    }

    #[test]
    fn handle_layout() {
        let h = SnapshotHandle::for_document("dev-1", 1716765123000, "my beat");
        assert_eq!(h.as_str(), "dev-1/1716765123000_my_beat.json");
        assert_eq!(h.scope(), Some("dev-1"));
        assert_eq!(h.created_at(), Some(1716765123000));
        assert_eq!(h.stored_name(), Some("my_beat"));
        assert!(h.check_relative().is_ok());
        assert!(SnapshotHandle::new("../etc/passwd").check_relative().is_err());
        assert!(SnapshotHandle::new("/abs/x.json").check_relative().is_err());
    }

    #[test]
    fn names_must_not_be_blank() {
        assert!(matches!(validate_name("  "), Err(EngineError::Validation(_))));
        assert_eq!(validate_name(" groove ").unwrap(), "groove");
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new("dev");
        let snap = named("first", 10);
        let handle = store.save(&snap).await.unwrap();
        let back = store.load(&handle).await.unwrap();
        assert_eq!(back.bpm, 100.0);
        assert_eq!(back.name, "first");
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_scoped() {
        let store = MemoryStore::new("dev");
        store.save(&named("old", 10)).await.unwrap();
        store.save(&named("new", 30)).await.unwrap();
        store.save(&named("mid", 20)).await.unwrap();
        let names: Vec<String> = store.list("dev").await.unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
        assert!(store.list("other").await.unwrap().is_empty());
    }

    #[test]
    fn numbered_handles_keep_their_timestamp() {
        let h = SnapshotHandle::for_document("dev", 42, "beat").numbered(2);
        assert_eq!(h.as_str(), "dev/42_beat-2.json");
        assert_eq!(h.created_at(), Some(42));
        assert_eq!(h.stored_name(), Some("beat-2"));
    }

    #[tokio::test]
    async fn same_name_and_time_saves_twice() {
        let store = MemoryStore::new("dev");
        let mut first = named("beat", 42);
        first.bpm = 90.0;
        let mut second = named("beat", 42);
        second.bpm = 140.0;
        let a = store.save(&first).await.unwrap();
        let b = store.save(&second).await.unwrap();
        let c = store.save(&second).await.unwrap();
        assert_eq!(a.as_str(), "dev/42_beat.json");
        assert_eq!(b.as_str(), "dev/42_beat-2.json");
        assert_eq!(c.as_str(), "dev/42_beat-3.json");
        assert_eq!(store.load(&a).await.unwrap().bpm, 90.0);
        assert_eq!(store.load(&b).await.unwrap().bpm, 140.0);
        assert_eq!(store.list("dev").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_handle_is_a_storage_error() {
        let store = MemoryStore::new("dev");
        let err = store.load(&SnapshotHandle::new("dev/1_x.json")).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
