//! Test utilities and fixtures for av-organizer tests.
//!
//! This module provides common test helpers, record factories, and an axum
//! stub server to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{canned_json, mock_record, serve};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let router = Router::new().route("/v/SSIS-001", canned_json(200, "{...}"));
//!     let server = serve(router).await;
//!     let record = mock_record("SSIS-001", "Yui Hatano");
//!     // ... test logic
//! }
//! ```

use std::path::{Path, PathBuf};

use axum::Router;
use axum::http::{StatusCode, header};
use axum::routing::{MethodRouter, get};
use tokio::net::TcpListener;

use crate::model::{Identifier, MetadataRecord};

/// Creates a MetadataRecord with sensible defaults.
///
/// Use struct update syntax to customize:
///
/// ```ignore
/// let custom = MetadataRecord {
///     studio: Some("S1".to_string()),
///     ..mock_record("SSIS-001", "Yui Hatano")
/// };
/// ```
pub fn mock_record(code: &str, actress: &str) -> MetadataRecord {
    let mut record = MetadataRecord::new(
        Identifier::new(code).expect("valid test identifier"),
        format!("Test Title {code}"),
        "mock",
    );
    record.contributors = vec![actress.to_string()];
    record.release_date = chrono::NaiveDate::from_ymd_opt(2021, 2, 19);
    record.studio = Some("Test Studio".to_string());
    record
}

/// Write `contents` to `dir/name`, creating parent directories.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    std::fs::write(&path, contents).expect("Failed to write fixture file");
    path
}

/// Route answering GET/HEAD with a fixed status, content type and body.
pub fn canned(status: u16, content_type: &'static str, body: &'static [u8]) -> MethodRouter {
    let status = StatusCode::from_u16(status).expect("valid test status code");
    get(move || async move { (status, [(header::CONTENT_TYPE, content_type)], body) })
}

/// [`canned`] with a JSON content type.
pub fn canned_json(status: u16, body: &'static str) -> MethodRouter {
    canned(status, "application/json", body.as_bytes())
}

/// Handle to a running test server. The server stops when the test's runtime does.
pub struct TestServer {
    pub base_url: String,
}

/// Serve `router` on an ephemeral localhost port; unrouted paths answer 404.
pub async fn serve(router: Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to read local address");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::warn!(target: "test", error = %e, "Test server stopped");
        }
    });

    TestServer {
        base_url: format!("http://{addr}"),
    }
}
