//! Image downloads for organized media.
//!
//! The [`AssetFetcher`] saves the cover, poster and screenshots referenced by
//! a record next to the organized file, as `{code}-cover.jpg`,
//! `{code}-poster.jpg` and `{code}-screenshot-N.jpg`. Downloads share one
//! semaphore across all workers, independent of the metadata request limits.
//!
//! Everything here is best-effort: a failed image is logged and skipped and
//! never fails the task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::classify::ScrapeError;
use crate::model::MetadataRecord;
use crate::scraper::http::USER_AGENT;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// Fetches raw image bytes.
///
/// Implement this trait to create mock implementations for testing.
#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, ScrapeError>;
}

/// Image downloader over HTTP
pub struct HttpImageDownloader {
    http_client: reqwest::Client,
}

impl HttpImageDownloader {
    pub fn new(timeout: Duration) -> Result<Self, ScrapeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    async fn download(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ScrapeError::NotFound(url.to_string()));
        }

        if !status.is_success() {
            return Err(ScrapeError::Network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?
            .to_vec();

        if data.is_empty() {
            return Err(ScrapeError::Parse(format!("empty image body from {url}")));
        }
        Ok(data)
    }
}

/// What happened to a record's images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetReport {
    pub saved: Vec<PathBuf>,
    pub failed: usize,
}

/// Downloads a record's images under a shared concurrency bound.
pub struct AssetFetcher {
    downloader: Arc<dyn ImageDownloader>,
    limit: Arc<Semaphore>,
    enabled: bool,
}

impl AssetFetcher {
    pub fn new(
        downloader: Arc<dyn ImageDownloader>,
        max_concurrent_downloads: usize,
        enabled: bool,
    ) -> Self {
        Self {
            downloader,
            limit: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Save every image referenced by `record` into `dir`.
    pub async fn fetch(&self, record: &MetadataRecord, dir: &Path) -> AssetReport {
        if !self.enabled || record.images.is_empty() {
            return AssetReport::default();
        }

        let jobs = planned_assets(record)
            .into_iter()
            .map(|(url, name)| self.fetch_one(url, dir.join(name)));
        let results = futures::future::join_all(jobs).await;

        let mut report = AssetReport::default();
        for result in results {
            match result {
                Some(path) => report.saved.push(path),
                None => report.failed += 1,
            }
        }
        tracing::debug!(
            target: "assets",
            code = %record.identifier,
            saved = report.saved.len(),
            failed = report.failed,
            "Assets fetched"
        );
        report
    }

    async fn fetch_one(&self, url: String, path: PathBuf) -> Option<PathBuf> {
        let data = {
            let _permit = self.limit.acquire().await.ok()?;
            self.downloader.download(&url).await
        };

        let data = match data {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(target: "assets", url = %url, error = %e, "Image download failed");
                return None;
            }
        };

        match tokio::fs::write(&path, &data).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(
                    target: "assets",
                    path = %path.display(),
                    error = %e,
                    "Failed to save image"
                );
                None
            }
        }
    }
}

/// `(url, file name)` pairs for every image of `record`.
fn planned_assets(record: &MetadataRecord) -> Vec<(String, String)> {
    let code = record.identifier.as_str();
    let images = &record.images;
    let mut planned = Vec::new();

    if let Some(url) = &images.cover {
        planned.push((url.clone(), format!("{code}-cover.{}", image_extension(url))));
    }
    if let Some(url) = &images.poster {
        planned.push((url.clone(), format!("{code}-poster.{}", image_extension(url))));
    }
    for (i, url) in images.screenshots.iter().enumerate() {
        planned.push((
            url.clone(),
            format!("{code}-screenshot-{}.{}", i + 1, image_extension(url)),
        ));
    }
    planned
}

/// Extension from the URL path if it looks like an image, otherwise `jpg`.
fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase());
    match ext.as_deref() {
        Some(ext) => IMAGE_EXTENSIONS
            .iter()
            .find(|known| **known == ext)
            .copied()
            .unwrap_or("jpg"),
        None => "jpg",
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::MockDownloader;
    use super::*;
    use crate::model::ImageUrls;
    use crate::test_utils::{canned, mock_record, serve};
    use axum::Router;
    use tempfile::tempdir;

    fn record_with_images() -> MetadataRecord {
        MetadataRecord {
            images: ImageUrls {
                cover: Some("https://img.local/covers/ssis001pl.jpg".into()),
                poster: Some("https://img.local/posters/ssis001ps.PNG?size=large".into()),
                screenshots: vec![
                    "https://img.local/shots/1".into(),
                    "https://img.local/shots/2.webp".into(),
                ],
            },
            ..mock_record("SSIS-001", "Yui Hatano")
        }
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("https://a/b/c.JPEG"), "jpeg");
        assert_eq!(image_extension("https://a/b/c.png?x=1"), "png");
        assert_eq!(image_extension("https://a/b/c"), "jpg");
        assert_eq!(image_extension("https://a/b/c.php"), "jpg");
    }

    #[test]
    fn test_planned_names() {
        let names: Vec<String> = planned_assets(&record_with_images())
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(
            names,
            vec![
                "SSIS-001-cover.jpg",
                "SSIS-001-poster.png",
                "SSIS-001-screenshot-1.jpg",
                "SSIS-001-screenshot-2.webp",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_images_are_skipped() {
        let dir = tempdir().unwrap();
        let downloader = Arc::new(
            MockDownloader::default()
                .with_image("https://img.local/covers/ssis001pl.jpg", b"cover")
                .with_image("https://img.local/shots/2.webp", b"shot"),
        );
        let fetcher = AssetFetcher::new(downloader.clone(), 3, true);

        let report = fetcher.fetch(&record_with_images(), dir.path()).await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.saved.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("SSIS-001-cover.jpg")).unwrap(), b"cover");
        assert_eq!(
            std::fs::read(dir.path().join("SSIS-001-screenshot-2.webp")).unwrap(),
            b"shot"
        );
        assert!(!dir.path().join("SSIS-001-poster.png").exists());
    }

    #[tokio::test]
    async fn test_disabled_fetcher_downloads_nothing() {
        let dir = tempdir().unwrap();
        let downloader = Arc::new(MockDownloader::default());
        let fetcher = AssetFetcher::new(downloader.clone(), 3, false);
        assert!(!fetcher.is_enabled());

        assert_eq!(fetcher.fetch(&record_with_images(), dir.path()).await, AssetReport::default());
        assert_eq!(downloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_downloads_are_bounded() {
        let dir = tempdir().unwrap();
        let mut record = mock_record("ABC-123", "A");
        record.images.screenshots = (0..8).map(|i| format!("https://img.local/{i}.jpg")).collect();
        let downloader = Arc::new(MockDownloader::default().with_delay(Duration::from_millis(10)));
        let fetcher = AssetFetcher::new(downloader.clone(), 2, true);

        let report = fetcher.fetch(&record, dir.path()).await;
        assert_eq!(report.failed, 8);
        assert_eq!(downloader.calls(), 8);
        assert!(downloader.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_http_downloader() {
        let router = Router::new().route("/cover.jpg", canned(200, "image/jpeg", b"\xff\xd8jpeg"));
        let server = serve(router).await;
        let downloader = HttpImageDownloader::new(Duration::from_secs(5)).unwrap();

        let data = downloader
            .download(&format!("{}/cover.jpg", server.base_url))
            .await
            .unwrap();
        assert_eq!(data, b"\xff\xd8jpeg");

        let err = downloader
            .download(&format!("{}/missing.jpg", server.base_url))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound(_)));
    }
}
