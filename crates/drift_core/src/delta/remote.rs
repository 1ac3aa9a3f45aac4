//! Remote sync API boundary.
//!
//! The delta engine talks to the sync service only through [`RemoteSyncApi`],
//! so tests inject an in-process fake and production uses [`HttpRemoteSync`].
//! Errors at this boundary are plain strings; the engine maps them into its
//! own error type with context about which phase failed.

use std::future::Future;
use std::pin::Pin;

use log::debug;

use super::types::{Collection, SyncDelta};

/// Type alias for boxed futures returned by trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for the remote delta endpoints.
pub trait RemoteSyncApi: Send + Sync {
    /// Fetch changes for one collection since a timestamp.
    fn fetch_delta(
        &self,
        user_id: &str,
        collection: Collection,
        since: i64,
    ) -> BoxFuture<'_, Result<SyncDelta, String>>;

    /// Push local changes for one collection.
    fn push_delta(
        &self,
        user_id: &str,
        collection: Collection,
        delta: &SyncDelta,
    ) -> BoxFuture<'_, Result<(), String>>;

    /// Cheap connectivity probe.
    fn is_online(&self) -> BoxFuture<'_, bool>;
}

/// HTTP implementation backed by the sync service's REST endpoints.
pub struct HttpRemoteSync {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
}

impl HttpRemoteSync {
    pub fn new(base_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_id: device_id.into(),
        }
    }

    fn delta_url(&self, user_id: &str) -> String {
        format!("{}/sync/{}/delta", self.base_url, user_id)
    }
}

impl RemoteSyncApi for HttpRemoteSync {
    fn fetch_delta(
        &self,
        user_id: &str,
        collection: Collection,
        since: i64,
    ) -> BoxFuture<'_, Result<SyncDelta, String>> {
        let url = self.delta_url(user_id);
        Box::pin(async move {
            debug!("[RemoteSync] GET {} collection={} since={}", url, collection, since);
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("collection", collection.as_str().to_string()),
                    ("since", since.to_string()),
                ])
                .header("X-Device-Id", &self.device_id)
                .send()
                .await
                .map_err(|e| format!("fetch failed: {}", e))?;

            if !response.status().is_success() {
                return Err(format!("fetch failed: HTTP {}", response.status()));
            }

            response
                .json::<SyncDelta>()
                .await
                .map_err(|e| format!("invalid delta response: {}", e))
        })
    }

    fn push_delta(
        &self,
        user_id: &str,
        collection: Collection,
        delta: &SyncDelta,
    ) -> BoxFuture<'_, Result<(), String>> {
        let url = self.delta_url(user_id);
        let body = serde_json::json!({
            "collection": collection,
            "delta": delta,
        });
        Box::pin(async move {
            debug!(
                "[RemoteSync] POST {} collection={} added={} updated={} deleted={}",
                url,
                collection,
                body["delta"]["added"].as_array().map(Vec::len).unwrap_or(0),
                body["delta"]["updated"].as_array().map(Vec::len).unwrap_or(0),
                body["delta"]["deleted"].as_array().map(Vec::len).unwrap_or(0),
            );
            let response = self
                .client
                .post(&url)
                .header("X-Device-Id", &self.device_id)
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("push failed: {}", e))?;

            if !response.status().is_success() {
                return Err(format!("push failed: HTTP {}", response.status()));
            }
            Ok(())
        })
    }

    fn is_online(&self) -> BoxFuture<'_, bool> {
        let url = format!("{}/health", self.base_url);
        Box::pin(async move {
            match self.client.get(&url).send().await {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        })
    }
}

impl std::fmt::Debug for HttpRemoteSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemoteSync")
            .field("base_url", &self.base_url)
            .field("device_id", &self.device_id)
            .finish()
    }
}
