//! Remote asset store client.
//!
//! The store is the source of truth for assets. It exposes two endpoints:
//!
//! - `GET {base}/assets/{id}` returns JSON [`AssetMetadata`].
//! - `GET {base}/assets/{id}/content` returns the raw bytes.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use tc_core::config::StoreConfig;
use tc_core::{AssetId, AssetMetadata, Error, Result};

/// Body of an asset download.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Read access to remote assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Describe an asset. Fails with [`Error::MetadataUnavailable`].
    async fn metadata(&self, asset_id: &AssetId) -> Result<AssetMetadata>;

    /// Open the asset's content. Fails with [`Error::FetchFailed`].
    async fn fetch(&self, asset_id: &AssetId) -> Result<ByteStream>;
}

/// [`AssetStore`] backed by the store's HTTP API.
pub struct HttpAssetStore {
    http: reqwest::Client,
    base_url: String,
    metadata_timeout: Duration,
}

impl HttpAssetStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build store client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            metadata_timeout: timeout,
        })
    }

    fn asset_url(&self, asset_id: &AssetId) -> String {
        format!("{}/assets/{}", self.base_url, asset_id)
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn metadata(&self, asset_id: &AssetId) -> Result<AssetMetadata> {
        let url = self.asset_url(asset_id);
        let resp = self
            .http
            .get(&url)
            .timeout(self.metadata_timeout)
            .send()
            .await
            .map_err(|e| Error::metadata_unavailable(asset_id, format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::metadata_unavailable(asset_id, format!("store returned {status}")));
        }

        let metadata = resp
            .json::<AssetMetadata>()
            .await
            .map_err(|e| Error::metadata_unavailable(asset_id, format!("parse error: {e}")))?;

        tracing::debug!(
            asset_id = %asset_id,
            size_bytes = metadata.size_bytes,
            mime_type = %metadata.mime_type,
            "Fetched asset metadata"
        );
        Ok(metadata)
    }

    async fn fetch(&self, asset_id: &AssetId) -> Result<ByteStream> {
        let url = format!("{}/content", self.asset_url(asset_id));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::fetch_failed(asset_id, format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::fetch_failed(asset_id, format!("store returned {status}")));
        }

        let body = resp.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> HttpAssetStore {
        HttpAssetStore::new(&StoreConfig {
            base_url: format!("{}/", server.uri()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn asset(id: &str) -> AssetId {
        AssetId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn metadata_parses_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/clip-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size_bytes": 1234,
                "mime_type": "video/mp4",
                "name": "holiday.mp4"
            })))
            .mount(&server)
            .await;

        let meta = store_for(&server).await.metadata(&asset("clip-1")).await.unwrap();
        assert_eq!(meta.size_bytes, 1234);
        assert_eq!(meta.name, "holiday.mp4");
    }

    #[tokio::test]
    async fn metadata_error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = store_for(&server).await.metadata(&asset("missing")).await.unwrap_err();
        assert_eq!(err.code(), "metadata_unavailable");
    }

    #[tokio::test]
    async fn metadata_bad_json_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = store_for(&server).await.metadata(&asset("broken")).await.unwrap_err();
        assert_eq!(err.code(), "metadata_unavailable");
    }

    #[tokio::test]
    async fn fetch_streams_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/clip-1/content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let mut body = store_for(&server).await.fetch(&asset("clip-1")).await.unwrap();
        let mut total = Vec::new();
        while let Some(chunk) = body.next().await {
            total.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(total.len(), 4096);
        assert!(total.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn fetch_error_status_is_fetch_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/clip-1/content"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = match store_for(&server).await.fetch(&asset("clip-1")).await {
            Ok(_) => panic!("expected fetch to fail"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "fetch_failed");
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let store = HttpAssetStore::new(&StoreConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 1,
        })
        .unwrap();
        let err = store.metadata(&asset("x")).await.unwrap_err();
        assert_eq!(err.code(), "metadata_unavailable");
    }
}
