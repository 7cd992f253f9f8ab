//! The HTTP boundary.
//!
//! Plugins produce request specs and parse responses; this module is the
//! only place that actually touches the network. The orchestrator attaches
//! the session's fingerprint headers, cookies and proxy here, which keeps
//! every plugin testable with a stub transport.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::models::Session;
use crate::plugins::{HttpRequestSpec, Method, RawResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Http(String),
    #[error("invalid request spec: {0}")]
    InvalidSpec(String),
}

/// Executes request specs on behalf of a session.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(
        &self,
        spec: &HttpRequestSpec,
        session: &Session,
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport backed by reqwest.
pub struct ReqwestTransport {
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Build a client bound to the session's identity.
    ///
    /// Clients are per call because the proxy differs per session; reqwest
    /// pins the proxy at build time.
    fn client_for(&self, session: &Session) -> Result<Client, TransportError> {
        let mut builder = Client::builder()
            .user_agent(&session.fingerprint.user_agent)
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(false);

        if let Some(proxy) = &session.proxy {
            let proxy = reqwest::Proxy::all(&proxy.address)
                .map_err(|e| TransportError::InvalidSpec(format!("bad proxy url: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    fn cookie_header(session: &Session) -> Option<String> {
        if session.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = session
            .cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        Some(pairs.join("; "))
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(
        &self,
        spec: &HttpRequestSpec,
        session: &Session,
    ) -> Result<RawResponse, TransportError> {
        let client = self.client_for(session)?;

        let mut request = match spec.method {
            Method::Get => client.get(&spec.url),
            Method::Post => client.post(&spec.url),
        };

        // Fingerprint headers first, in browser emission order, then any
        // plugin-specific headers on top.
        for (name, value) in &session.fingerprint.headers {
            request = request.header(name, value);
        }
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(cookie) = Self::cookie_header(session) {
            request = request.header("Cookie", cookie);
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Http(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(RawResponse {
            status,
            final_url,
            headers,
            body,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Fingerprint;

    fn session_with_cookies() -> Session {
        let mut session = Session::new(
            "ticketmax",
            Fingerprint {
                user_agent: "Mozilla/5.0 test".to_string(),
                headers: Vec::new(),
                viewport: (1920, 1080),
                jitter_ms: (0, 0),
            },
            None,
        );
        session.cookies.insert("sid".to_string(), "abc".to_string());
        session.cookies.insert("lang".to_string(), "en".to_string());
        session
    }

    #[test]
    fn test_cookie_header_is_deterministic() {
        let session = session_with_cookies();
        assert_eq!(
            ReqwestTransport::cookie_header(&session).as_deref(),
            Some("lang=en; sid=abc")
        );
    }

    #[test]
    fn test_no_cookie_header_when_empty() {
        let session = Session::new(
            "ticketmax",
            Fingerprint {
                user_agent: "ua".to_string(),
                headers: Vec::new(),
                viewport: (1, 1),
                jitter_ms: (0, 0),
            },
            None,
        );
        assert!(ReqwestTransport::cookie_header(&session).is_none());
    }
}
