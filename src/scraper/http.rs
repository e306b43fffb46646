//! Generic HTTP JSON source.
//!
//! Calls a configured URL template (with a `{code}` placeholder) and expects
//! a JSON metadata document back:
//!
//! ```json
//! {"code": "SSIS-001", "title": "...", "actresses": ["..."], "release_date": "2021-02-19"}
//! ```
//!
//! Status mapping: 401/403 are `Auth`, 404 is `NotFound`, 429 and 5xx are
//! `Network`, an undecodable body is `Parse`.

use std::time::Duration;

use async_trait::async_trait;

use super::{Scraper, Session};
use crate::classify::ScrapeError;
use crate::config::SourceConfig;
use crate::model::{Identifier, MetadataRecord};

/// User agent sent with every metadata and probe request
pub const USER_AGENT: &str = concat!("av-organizer/", env!("CARGO_PKG_VERSION"));

/// HTTP JSON metadata source
pub struct HttpScraper {
    name: String,
    url_template: String,
    probe_url: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpScraper {
    /// Create a source from its config entry.
    pub fn new(config: &SourceConfig, timeout: Duration) -> Result<Self, ScrapeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            url_template: config.url_template.clone(),
            probe_url: config.probe_url.clone(),
            timeout,
            http_client,
        })
    }

    /// URL for one identifier.
    pub fn url_for(&self, identifier: &Identifier) -> String {
        self.url_template.replace("{code}", identifier.as_str())
    }

    /// Explicit probe URL, or the origin of the template.
    fn probe_target(&self) -> Option<String> {
        if let Some(url) = &self.probe_url {
            return Some(url.clone());
        }
        let url = reqwest::Url::parse(&self.url_template.replace("{code}", "")).ok()?;
        Some(url.origin().ascii_serialization())
    }

    fn map_send_error(&self, e: reqwest::Error) -> ScrapeError {
        if e.is_timeout() {
            ScrapeError::Timeout(self.timeout)
        } else {
            ScrapeError::Network(e.to_string())
        }
    }

    /// Send the HTTP request and parse the response
    async fn send_request(
        &self,
        identifier: &Identifier,
        session: Option<&Session>,
    ) -> Result<(MetadataRecord, String), ScrapeError> {
        let url = self.url_for(identifier);

        let mut request = self.http_client.get(&url);
        if let Some(session) = session {
            for (name, value) in session.headers() {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ScrapeError::NotFound(identifier.to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ScrapeError::RateLimited);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ScrapeError::Auth(format!("HTTP {status}")));
        }

        if !status.is_success() {
            return Err(ScrapeError::Network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        let record = serde_json::from_slice::<MetadataRecord>(&body)
            .map_err(|e| ScrapeError::Parse(e.to_string()))?;
        Ok((record, url))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(
        &self,
        identifier: &Identifier,
        session: Option<&Session>,
    ) -> Result<MetadataRecord, ScrapeError> {
        let (mut record, url) = self.send_request(identifier, session).await?;
        record.normalize();
        record.validate(identifier)?;
        record.source = self.name.clone();
        if record.source_url.is_none() {
            record.source_url = Some(url);
        }
        Ok(record)
    }

    async fn probe(&self) -> bool {
        let Some(url) = self.probe_target() else {
            return false;
        };
        match self.http_client.head(&url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(
                    target: "resolver",
                    source = %self.name,
                    error = %e,
                    "Probe failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;
    use crate::test_utils::{canned_json, serve};
    use axum::Router;
    use axum::http::{HeaderMap, header};
    use axum::routing::get;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const SSIS_001_JSON: &str = concat!(
        r#"{"code":"ssis-001","title":" Title ","actresses":["Yui Hatano"," "],"#,
        r#""release_date":"2021-02-19"}"#
    );

    fn scraper(base: &str) -> HttpScraper {
        HttpScraper::new(
            &SourceConfig {
                name: "javdb".into(),
                url_template: format!("{base}/v/{{code}}"),
                probe_url: None,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn id(raw: &str) -> Identifier {
        Identifier::new(raw).unwrap()
    }

    #[test]
    fn test_url_template() {
        let s = scraper("http://localhost:9999");
        assert_eq!(s.url_for(&id("ssis-001")), "http://localhost:9999/v/SSIS-001");
        assert_eq!(s.probe_target().as_deref(), Some("http://localhost:9999"));
    }

    #[test]
    fn test_user_agent_format() {
        assert!(USER_AGENT.starts_with("av-organizer/"));
    }

    #[tokio::test]
    async fn test_resolve_parses_record_and_sends_session() {
        let seen: Arc<Mutex<Option<HeaderMap>>> = Arc::default();
        let capture = seen.clone();
        let router = Router::new().route(
            "/v/SSIS-001",
            get(move |headers: HeaderMap| {
                *capture.lock() = Some(headers);
                async {
                    ([(header::CONTENT_TYPE, "application/json")], SSIS_001_JSON)
                }
            }),
        );
        let server = serve(router).await;
        let s = scraper(&server.base_url);

        let record = s
            .resolve(&id("SSIS-001"), Some(&Session::cookie("over18=1")))
            .await
            .unwrap();
        assert_eq!(record.title, "Title");
        assert_eq!(record.contributors, vec!["Yui Hatano"]);
        assert_eq!(record.source, "javdb");
        assert_eq!(
            record.source_url.as_deref(),
            Some(format!("{}/v/SSIS-001", server.base_url).as_str())
        );

        let headers = seen.lock().take().expect("request reached the server");
        assert_eq!(headers["cookie"], "over18=1");
        assert!(headers["user-agent"].to_str().unwrap().starts_with("av-organizer/"));
    }

    #[tokio::test]
    async fn test_status_codes_map_to_kinds() {
        let router = Router::new()
            .route("/v/AUTH-001", canned_json(403, "{}"))
            .route("/v/BUSY-001", canned_json(429, "{}"))
            .route("/v/DOWN-001", canned_json(503, "{}"))
            .route("/v/JUNK-001", canned_json(200, "<html>not json</html>"))
            .route("/v/MISM-001", canned_json(200, r#"{"code":"OTHER-001","title":"x"}"#));
        let server = serve(router).await;
        let s = scraper(&server.base_url);

        let kind = |code: &'static str| {
            let s = &s;
            async move { s.resolve(&id(code), None).await.unwrap_err() }
        };

        assert_eq!(kind("AUTH-001").await.kind(), ErrorKind::Auth);
        assert!(matches!(kind("BUSY-001").await, ScrapeError::RateLimited));
        assert_eq!(kind("DOWN-001").await.kind(), ErrorKind::Network);
        assert_eq!(kind("JUNK-001").await.kind(), ErrorKind::Parse);
        assert_eq!(kind("MISM-001").await.kind(), ErrorKind::Parse);
        // Unknown route answers 404
        assert!(matches!(kind("NONE-001").await, ScrapeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let s = scraper(&format!("http://127.0.0.1:{port}"));
        let err = s.resolve(&id("SSIS-001"), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!s.probe().await);
    }

    #[tokio::test]
    async fn test_probe_reachable_server() {
        let server = serve(Router::new()).await;
        // Unknown routes answer 404, which still proves the host is up
        assert!(scraper(&server.base_url).probe().await);
    }
}
