//! Remote store: the pattern server's JSON API.
//!
//! | request | body / query | response |
//! |---|---|---|
//! | `POST /api/patterns/upload` | `{deviceId, name, json}` | `{path, storedName, createdAt}` |
//! | `GET /api/patterns/list` | `?deviceId=` | `{items: [{name, path, createdAt}]}` |
//! | `GET /api/patterns/download` | `?path=` | `{data}` |
//!
//! Failures come back as a non-2xx status with `{error}`.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{SnapshotHandle, SnapshotListing, SnapshotStore, sort_listings};
use crate::error::EngineError;
use crate::snapshot::{Snapshot, parse_timestamp_millis};

#[derive(Debug, Clone)]
pub struct RemoteStore {
    base_url: String,
    scope: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItem>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
    path: String,
    #[serde(default, rename = "createdAt")]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl RemoteStore {
    /// `base_url` without a trailing slash, e.g. `http://localhost:4000`.
    pub fn new(base_url: impl Into<String>, scope: impl Into<String>) -> Self {
        RemoteStore {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            scope: scope.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/patterns/{endpoint}", self.base_url)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, EngineError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Storage(format!("reading response: {e}")))?;
        if !status.is_success() {
            let reason = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| body.trim().to_string());
            log::warn!(target: "store", "pattern server returned {status}: {reason}");
            return Err(EngineError::Storage(format!("{status}: {reason}")));
        }
        serde_json::from_str(&body).map_err(|e| EngineError::Storage(format!("unexpected response: {e}")))
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    log::warn!(target: "store", "pattern server unreachable: {e}");
    EngineError::Storage(e.to_string())
}

impl SnapshotStore for RemoteStore {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<SnapshotHandle, EngineError> {
        let body = json!({
            "deviceId": self.scope,
            "name": snapshot.name,
            "json": snapshot,
        });
        let response = self
            .client
            .post(self.url("upload"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let uploaded: UploadResponse = Self::read(response).await?;
        log::info!(target: "store", "uploaded {}", uploaded.path);
        Ok(SnapshotHandle::new(uploaded.path))
    }

    async fn list(&self, scope: &str) -> Result<Vec<SnapshotListing>, EngineError> {
        let response = self
            .client
            .get(self.url("list"))
            .query(&[("deviceId", scope)])
            .send()
            .await
            .map_err(transport_error)?;
        let list: ListResponse = Self::read(response).await?;
        let mut listings: Vec<SnapshotListing> = list
            .items
            .into_iter()
            .map(|item| {
                let handle = SnapshotHandle::new(item.path);
                SnapshotListing {
                    name: handle.stored_name().map_or(item.name, str::to_string),
                    created_at: handle
                        .created_at()
                        .or_else(|| item.created_at.as_deref().and_then(parse_timestamp_millis))
                        .unwrap_or(0),
                    handle,
                }
            })
            .collect();
        sort_listings(&mut listings);
        Ok(listings)
    }

    async fn load(&self, handle: &SnapshotHandle) -> Result<Snapshot, EngineError> {
        let response = self
            .client
            .get(self.url("download"))
            .query(&[("path", handle.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let download: DownloadResponse = Self::read(response).await?;
        Snapshot::from_value(download.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_built_from_the_base() {
        let store = RemoteStore::new("http://localhost:4000/", "dev");
        assert_eq!(store.url("list"), "http://localhost:4000/api/patterns/list");
        assert_eq!(store.scope(), "dev");
    }

    #[test]
    fn list_items_parse() {
        let list: ListResponse = serde_json::from_str(
            r#"{"items": [{"name": "5_a.json", "path": "dev/5_a.json", "createdAt": "2024-05-26T23:12:03.000Z"}]}"#,
        )
        .unwrap();
        assert_eq!(list.items[0].path, "dev/5_a.json");
        let stamp = list.items[0].created_at.as_deref().and_then(parse_timestamp_millis);
        assert_eq!(stamp, Some(1_716_765_123_000));
        let empty: ListResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_storage_error() {
        // Port 9 (discard) is closed on test machines.
        let store = RemoteStore::new("http://127.0.0.1:9", "dev");
        let err = store.list("dev").await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
