use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use podium_training::{DatasetPlatform, FetchError, TrainingError, TrainingResult};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::PlatformSettings;

/// Number of assets requested per listing page.
pub const ASSET_PAGE_SIZE: usize = 100;

/// Dataset platform client errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// HTTP request error.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credentials rejected.
    #[error("platform rejected credentials ({status}) for {url}")]
    Unauthorized { status: StatusCode, url: String },

    /// Non-success response that is not retried.
    #[error("request to {url} failed with status: {status}")]
    Status { status: StatusCode, url: String },

    /// Invalid response format.
    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    /// I/O error while writing a download.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PlatformError> for TrainingError {
    fn from(err: PlatformError) -> Self {
        let message = err.to_string();
        match err {
            PlatformError::Unauthorized { .. } => FetchError::Unauthorized(message).into(),
            PlatformError::Io(io) => TrainingError::Io(io),
            _ => FetchError::Remote(message).into(),
        }
    }
}

/// One entry of the asset listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetEntry {
    pub filename: String,
    pub url: String,
}

/// HTTP client for the dataset platform.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl PlatformClient {
    /// Creates a client from platform settings.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(settings: &PlatformSettings) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            client,
            max_retries: settings.max_retries,
        })
    }

    /// Lists every asset of a dataset version, following pages until a short one.
    pub async fn list_assets(&self, dataset_id: &str) -> Result<Vec<AssetEntry>, PlatformError> {
        let url = format!("{}/dataset-versions/{dataset_id}/assets", self.base_url);
        let mut assets = Vec::new();
        let mut offset = 0;
        loop {
            let query = [("limit", ASSET_PAGE_SIZE.to_string()), ("offset", offset.to_string())];
            let page: Vec<AssetEntry> = self
                .get_with_retry(&url, &query)
                .await?
                .json()
                .await
                .map_err(|e| PlatformError::InvalidResponse(format!("Failed to parse asset page: {e}")))?;
            let len = page.len();
            assets.extend(page);
            if len < ASSET_PAGE_SIZE {
                break;
            }
            offset += len;
        }
        debug!(dataset_id, count = assets.len(), "asset listing complete");
        Ok(assets)
    }

    async fn download_to(&self, url: &str, query: &[(&str, String)], dest: &Path) -> Result<u64, PlatformError> {
        let response = self.get_with_retry(url, query).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Whether `url` shares the platform's scheme, host and port, and so may
    /// receive the API key. Asset URLs pointing elsewhere are fetched anonymously.
    fn sends_credentials(&self, url: &str) -> bool {
        let (Ok(base), Ok(target)) = (Url::parse(&self.base_url), Url::parse(url)) else {
            return false;
        };
        base.scheme() == target.scheme()
            && base.host_str() == target.host_str()
            && base.port_or_known_default() == target.port_or_known_default()
    }

    /// GET with bounded retries.
    ///
    /// Connection errors and 5xx responses are retried with linear backoff;
    /// 401/403 map to [`PlatformError::Unauthorized`] and other statuses fail
    /// immediately.
    async fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, PlatformError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let mut request = self.client.get(url).query(query);
            if self.sends_credentials(url) {
                request = request.bearer_auth(&self.api_key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                        return Err(PlatformError::Unauthorized { status, url: url.to_string() });
                    }
                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(url, %status, attempt, "server error; retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(PlatformError::Status { status, url: url.to_string() });
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        warn!(url, error = %e, attempt, "request failed; retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map_or_else(
            || PlatformError::InvalidResponse(format!("no response from {url}")),
            PlatformError::Http,
        ))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * u64::from(attempt + 1))
}

/// Asset filenames become local paths; anything that is not a bare file name
/// is refused.
fn safe_file_name(filename: &str) -> Option<&str> {
    let name = Path::new(filename).file_name()?.to_str()?;
    (name == filename).then_some(name)
}

#[async_trait]
impl DatasetPlatform for PlatformClient {
    async fn export_annotations(&self, dataset_id: &str, dest_dir: &Path) -> TrainingResult<PathBuf> {
        let url = format!("{}/dataset-versions/{dataset_id}/annotations/export", self.base_url);
        let bundle = dest_dir.join("annotations.tar.gz");
        let bytes = self.download_to(&url, &[("format", "yolo".to_string())], &bundle).await?;
        info!(dataset_id, bytes, "annotation export downloaded");
        Ok(bundle)
    }

    async fn download_images(&self, dataset_id: &str, dest_dir: &Path) -> TrainingResult<usize> {
        let assets = self.list_assets(dataset_id).await?;
        let mut downloaded = 0;
        for asset in &assets {
            let Some(name) = safe_file_name(&asset.filename) else {
                return Err(FetchError::Remote(format!("refusing asset filename {:?}", asset.filename)).into());
            };
            self.download_to(&asset.url, &[], &dest_dir.join(name)).await?;
            downloaded += 1;
        }
        info!(dataset_id, images = downloaded, "images downloaded");
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Clone)]
    struct Fake {
        base: Arc<String>,
        assets: usize,
        failures_before_success: Arc<AtomicUsize>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer token")
    }

    async fn export(State(fake): State<Fake>, headers: HeaderMap) -> (StatusCode, Vec<u8>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Vec::new());
        }
        if fake.failures_before_success.load(Ordering::SeqCst) > 0 {
            fake.failures_before_success.fetch_sub(1, Ordering::SeqCst);
            return (StatusCode::SERVICE_UNAVAILABLE, Vec::new());
        }
        (StatusCode::OK, b"bundle".to_vec())
    }

    async fn assets(
        State(fake): State<Fake>,
        Query(query): Query<HashMap<String, usize>>,
    ) -> Json<Vec<serde_json::Value>> {
        let offset = query.get("offset").copied().unwrap_or(0);
        let limit = query.get("limit").copied().unwrap_or(ASSET_PAGE_SIZE);
        let page = (offset..fake.assets.min(offset + limit))
            .map(|i| {
                serde_json::json!({
                    "filename": format!("img_{i:04}.jpg"),
                    "url": format!("{}/blobs/{i}", fake.base),
                })
            })
            .collect();
        Json(page)
    }

    async fn spawn_platform(assets_count: usize, failures: usize) -> (PlatformClient, Fake) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let fake = Fake {
            base: Arc::new(base.clone()),
            assets: assets_count,
            failures_before_success: Arc::new(AtomicUsize::new(failures)),
        };
        let app = Router::new()
            .route("/dataset-versions/:id/annotations/export", get(export))
            .route("/dataset-versions/:id/assets", get(assets))
            .route("/blobs/:n", get(|| async { "pixels" }))
            .with_state(fake.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let settings = PlatformSettings {
            base_url: base,
            api_key: "token".to_string(),
            dataset_id: "ds".to_string(),
            max_retries: 3,
            request_timeout_secs: 5,
        };
        (PlatformClient::new(&settings).unwrap(), fake)
    }

    #[tokio::test]
    async fn test_export_retries_server_errors() {
        let (client, fake) = spawn_platform(0, 2).await;
        let temp = TempDir::new().unwrap();

        let bundle = client.export_annotations("ds", temp.path()).await.unwrap();
        assert_eq!(std::fs::read(bundle).unwrap(), b"bundle");
        assert_eq!(fake.failures_before_success.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_export_gives_up_after_max_retries() {
        let (client, _fake) = spawn_platform(0, 10).await;
        let temp = TempDir::new().unwrap();

        let err = client.export_annotations("ds", temp.path()).await.unwrap_err();
        assert!(matches!(err, TrainingError::Fetch(FetchError::Remote(_))));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_retried() {
        let (mut client, fake) = spawn_platform(0, 1).await;
        client.api_key = "wrong".to_string();
        let temp = TempDir::new().unwrap();

        let err = client.export_annotations("ds", temp.path()).await.unwrap_err();
        assert!(matches!(err, TrainingError::Fetch(FetchError::Unauthorized(_))));
        assert_eq!(fake.failures_before_success.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_download_images_follows_pages() {
        let (client, _fake) = spawn_platform(ASSET_PAGE_SIZE + 5, 0).await;
        let temp = TempDir::new().unwrap();

        let count = client.download_images("ds", temp.path()).await.unwrap();
        assert_eq!(count, ASSET_PAGE_SIZE + 5);
        assert_eq!(std::fs::read_to_string(temp.path().join("img_0000.jpg")).unwrap(), "pixels");
        assert!(temp.path().join(format!("img_{:04}.jpg", ASSET_PAGE_SIZE + 4)).exists());
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("a.jpg"), Some("a.jpg"));
        assert_eq!(safe_file_name("../a.jpg"), None);
        assert_eq!(safe_file_name("dir/a.jpg"), None);
        assert_eq!(safe_file_name(""), None);
    }

    #[test]
    fn test_credentials_only_sent_to_platform_origin() {
        let settings = PlatformSettings {
            base_url: "https://api.example.com/api".to_string(),
            api_key: "token".to_string(),
            ..PlatformSettings::default()
        };
        let client = PlatformClient::new(&settings).unwrap();

        assert!(client.sends_credentials("https://api.example.com/api/dataset-versions/1/assets"));
        assert!(client.sends_credentials("https://api.example.com:443/blobs/1"));
        assert!(!client.sends_credentials("https://api.example.com.attacker.io/api/x"));
        assert!(!client.sends_credentials("https://api.example.com@attacker.io/api/x"));
        assert!(!client.sends_credentials("http://api.example.com/api/x"));
        assert!(!client.sends_credentials("https://api.example.com:8443/api/x"));
        assert!(!client.sends_credentials("https://cdn.example.com/blob"));
        assert!(!client.sends_credentials("not a url"));
    }
}
