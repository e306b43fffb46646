//! Session material for sources that need authentication.
//!
//! Acquiring sessions (logins, browser cookies) happens outside this crate.
//! Scrapers receive an opaque [`Session`] from an [`AuthProvider`] and attach
//! it to their requests.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// Opaque per-source session: a set of request headers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    headers: Vec<(String, String)>,
}

impl Session {
    /// A session carried by a `Cookie` header.
    pub fn cookie(value: impl Into<String>) -> Self {
        Self::default().with_header("Cookie", value)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// Header values are secrets; never print them.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Session").field("headers", &names).finish()
    }
}

/// Supplies sessions per source name.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The session for `source`, or `None` to call it anonymously.
    async fn session(&self, source: &str) -> Option<Session>;
}

/// Never supplies a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn session(&self, _source: &str) -> Option<Session> {
        None
    }
}

/// Cookie strings read from the `[credentials]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    sessions: HashMap<String, Session>,
}

impl StaticAuth {
    pub fn from_cookies(cookies: &HashMap<String, String>) -> Self {
        let sessions = cookies
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(source, cookie)| (source.clone(), Session::cookie(cookie.trim())))
            .collect();
        Self { sessions }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn session(&self, source: &str) -> Option<Session> {
        self.sessions.get(source).cloned()
    }
}
