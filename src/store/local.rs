//! Same-device store: one JSON file per snapshot under a root directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::{MAX_SUFFIX, SnapshotHandle, SnapshotListing, SnapshotStore, sort_listings};
use crate::error::EngineError;
use crate::snapshot::{Snapshot, now_millis};

const DEVICE_ID_FILE: &str = "device-id";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    scope: String,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, scope: impl Into<String>) -> Self {
        LocalStore {
            root: root.into(),
            scope: scope.into(),
        }
    }

    /// The platform data directory for this application.
    pub fn default_root() -> Result<PathBuf, EngineError> {
        directories::ProjectDirs::from("", "", "pianoroll")
            .map(|dirs| dirs.data_dir().join("patterns"))
            .ok_or_else(|| EngineError::Storage("no home directory to store patterns in".into()))
    }

    /// Store in the default root, scoped to this device.
    pub async fn open_default() -> Result<Self, EngineError> {
        let root = Self::default_root()?;
        let scope = Self::device_scope(&root).await?;
        Ok(Self::new(root, scope))
    }

    /// This device's persistent id, created on first use.
    pub async fn device_scope(root: &Path) -> Result<String, EngineError> {
        let path = root.join(DEVICE_ID_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(id) if !id.trim().is_empty() => return Ok(id.trim().to_string()),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut hasher = Sha256::new();
        hasher.update(now_millis().to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        hasher.update(root.to_string_lossy().as_bytes());
        let id: String = hasher.finalize().iter().take(16).map(|b| format!("{b:02x}")).collect();

        tokio::fs::create_dir_all(root).await?;
        tokio::fs::write(&path, &id).await?;
        log::info!(target: "store", "new device id {id}");
        Ok(id)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, handle: &SnapshotHandle) -> Result<PathBuf, EngineError> {
        handle.check_relative()?;
        Ok(handle.as_str().split('/').fold(self.root.clone(), |p, part| p.join(part)))
    }
}

impl SnapshotStore for LocalStore {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<SnapshotHandle, EngineError> {
        let base = SnapshotHandle::for_document(&self.scope, snapshot.created_at, &snapshot.name);
        let json = snapshot.to_json()?;
        if let Some(dir) = self.path_of(&base)?.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        for n in 1..=MAX_SUFFIX {
            let handle = if n == 1 { base.clone() } else { base.numbered(n) };
            let path = self.path_of(&handle)?;
            let mut file = match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
            log::info!(target: "store", "saved {}", path.display());
            return Ok(handle);
        }
        Err(EngineError::Storage(format!("no free name left for {base}")))
    }

    async fn list(&self, scope: &str) -> Result<Vec<SnapshotListing>, EngineError> {
        let dir = self.path_of(&SnapshotHandle::new(scope))?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut listings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.file_name().to_string_lossy().into_owned();
            if !file.to_ascii_lowercase().ends_with(".json") {
                continue;
            }
            let handle = SnapshotHandle::new(format!("{scope}/{file}"));
            let Some(created_at) = handle.created_at() else {
                continue;
            };
            // The display name lives in the document; fall back to the file name.
            let name = match tokio::fs::read_to_string(entry.path()).await {
                Ok(json) => Snapshot::from_json(&json).map(|s| s.name).ok(),
                Err(_) => None,
            }
            .filter(|n| !n.is_empty())
            .or_else(|| handle.stored_name().map(str::to_string))
            .unwrap_or_default();
            listings.push(SnapshotListing { name, created_at, handle });
        }
        sort_listings(&mut listings);
        Ok(listings)
    }

    async fn load(&self, handle: &SnapshotHandle) -> Result<Snapshot, EngineError> {
        let path = self.path_of(handle)?;
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::Storage(format!("{}: {e}", path.display())))?;
        Snapshot::from_json(&json)
    }
}
