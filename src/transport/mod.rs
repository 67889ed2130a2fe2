//! HTTP/browser transport with bounded, randomised retry.
//!
//! A single attempt is abstracted behind [`Transport`] so orchestration and
//! tests can stub status sequences; [`fetch_with_retry`] drives the retry
//! policy on top of any implementation. Transient responses (status ≥300 and
//! ≠404) are retried after a uniform-random pause; exhausting the ceiling
//! degrades softly to the last body seen rather than raising — extractors must
//! cope with empty or garbage input by producing a partial or empty record.

pub mod browser;

use crate::config::TransportConfig;
use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

// ── Fetch targets ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Plain, stateless GET.
    Get,
    /// Plain, stateless POST (payload sent form-encoded).
    Post,
    /// GET through a throwaway headless-browser context; returns rendered HTML.
    SessionGet,
    /// POST issued from inside a browser context at the page's origin.
    SessionPost,
    /// Browser: load, accept consent dialog if present, fill the payload's
    /// selector→value form fields, submit, return rendered HTML.
    Filter,
}

/// One URL plus the transport mode it requires.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub url: String,
    pub mode: FetchMode,
    pub payload: Option<BTreeMap<String, String>>,
}

impl FetchTarget {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Get,
            payload: None,
        }
    }

    pub fn post(url: impl Into<String>, payload: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Post,
            payload: Some(payload),
        }
    }

    pub fn session_get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::SessionGet,
            payload: None,
        }
    }

    pub fn session_post(url: impl Into<String>, payload: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::SessionPost,
            payload: Some(payload),
        }
    }

    pub fn filter(url: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        Self {
            url: url.into(),
            mode: FetchMode::Filter,
            payload: Some(fields),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Synthetic status for attempts that never produced an HTTP response
/// (connection refused, browser launch failure, ...). Retryable.
pub const STATUS_UNREACHABLE: u16 = 599;

#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn ok(body: String) -> Self {
        Self { status: 200, body }
    }

    pub fn unreachable() -> Self {
        Self {
            status: STATUS_UNREACHABLE,
            body: String::new(),
        }
    }

    /// Transient by contract: any status ≥300 except 404.
    pub fn is_retryable(&self) -> bool {
        self.status >= 300 && self.status != 404
    }
}

// ── Transport trait ───────────────────────────────────────────────────────────

/// One fetch attempt, no retry. Never fails hard: transport-level errors are
/// folded into a retryable [`PageResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, target: &FetchTarget) -> PageResponse;
}

// ── Retry driver ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_wait_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_wait_secs: config.max_wait_secs,
        }
    }
}

/// Fetch with bounded retry. Returns the body of the first non-transient
/// response, or the last-seen body once the ceiling is hit — possibly an error
/// page, possibly empty. Soft degradation is the caller's contract.
pub async fn fetch_with_retry(
    transport: &dyn Transport,
    target: &FetchTarget,
    policy: &RetryPolicy,
) -> String {
    let mut count = 0;
    let mut last = PageResponse::unreachable();

    while count < policy.max_retries {
        last = transport.dispatch(target).await;
        if last.is_retryable() {
            let pause = rand::rng().random_range(0..=policy.max_wait_secs);
            debug!(
                "transient {} from {}, retry {}/{} in {}s",
                last.status, target.url, count + 1, policy.max_retries, pause
            );
            sleep(Duration::from_secs(pause)).await;
            count += 1;
            continue;
        }
        return last.body;
    }

    warn!(
        "retries exhausted for {} (last status {})",
        target.url, last.status
    );
    last.body
}

// ── Live transport ────────────────────────────────────────────────────────────

/// The production transport: reqwest for the plain modes, a throwaway
/// chromiumoxide browser context per call for the session-emulated ones.
pub struct HttpTransport {
    client: Client,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    async fn plain(&self, target: &FetchTarget) -> PageResponse {
        let request = match target.mode {
            FetchMode::Post => {
                let mut builder = self.client.post(&target.url);
                if let Some(payload) = &target.payload {
                    builder = builder.form(payload);
                }
                builder
            }
            _ => self.client.get(&target.url),
        };

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => PageResponse { status, body },
                    Err(e) => {
                        warn!("failed to read body from {}: {}", target.url, e);
                        PageResponse::unreachable()
                    }
                }
            }
            Err(e) => {
                warn!("request to {} failed: {}", target.url, e);
                PageResponse {
                    status: e
                        .status()
                        .map(|s| s.as_u16())
                        .unwrap_or(STATUS_UNREACHABLE),
                    body: String::new(),
                }
            }
        }
    }

    async fn session(&self, target: &FetchTarget) -> PageResponse {
        let result = match target.mode {
            FetchMode::SessionGet => browser::session_get(&target.url, &self.user_agent).await,
            FetchMode::SessionPost => {
                browser::session_post(&target.url, target.payload.as_ref(), &self.user_agent).await
            }
            FetchMode::Filter => {
                browser::filter_fetch(&target.url, target.payload.as_ref(), &self.user_agent).await
            }
            _ => unreachable!("plain modes handled by HttpTransport::plain"),
        };

        match result {
            Ok(body) => PageResponse::ok(body),
            Err(e) => {
                warn!("browser fetch of {} failed: {}", target.url, e);
                PageResponse::unreachable()
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, target: &FetchTarget) -> PageResponse {
        match target.mode {
            FetchMode::Get | FetchMode::Post => self.plain(target).await,
            FetchMode::SessionGet | FetchMode::SessionPost | FetchMode::Filter => {
                self.session(target).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves `failures` retryable responses, then a 200 with body "ok".
    struct FlakyTransport {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn dispatch(&self, _target: &FetchTarget) -> PageResponse {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                PageResponse {
                    status: 503,
                    body: "unavailable".into(),
                }
            } else {
                PageResponse::ok("ok".into())
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            max_wait_secs: 25,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_below_ceiling() {
        let transport = FlakyTransport::new(2);
        let body =
            fetch_with_retry(&transport, &FetchTarget::get("http://x/"), &policy(3)).await;
        assert_eq!(body, "ok");
        // N failures ⇒ N sleeps ⇒ N+1 attempts
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_last_body() {
        let transport = FlakyTransport::new(5);
        let body =
            fetch_with_retry(&transport, &FetchTarget::get("http://x/"), &policy(3)).await;
        assert_eq!(body, "unavailable");
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_is_returned_without_retry() {
        struct NotFound;
        #[async_trait]
        impl Transport for NotFound {
            async fn dispatch(&self, _target: &FetchTarget) -> PageResponse {
                PageResponse {
                    status: 404,
                    body: "gone".into(),
                }
            }
        }
        let body = fetch_with_retry(&NotFound, &FetchTarget::get("http://x/"), &policy(3)).await;
        assert_eq!(body, "gone");
    }

    #[test]
    fn test_fetch_targets_carry_mode_and_payload() {
        let payload = BTreeMap::from([("filter_name".to_string(), "jane+doe".to_string())]);

        let post = FetchTarget::post("http://x/", payload.clone());
        assert_eq!(post.mode, FetchMode::Post);
        assert_eq!(post.payload.as_ref(), Some(&payload));

        let session_post = FetchTarget::session_post("http://x/", payload.clone());
        assert_eq!(session_post.mode, FetchMode::SessionPost);
        assert_eq!(session_post.payload.as_ref(), Some(&payload));

        assert_eq!(FetchTarget::session_get("http://x/").mode, FetchMode::SessionGet);
        assert!(FetchTarget::get("http://x/").payload.is_none());
    }

    #[test]
    fn test_retryable_statuses() {
        let retryable = |status| PageResponse {
            status,
            body: String::new(),
        };
        assert!(retryable(301).is_retryable());
        assert!(retryable(500).is_retryable());
        assert!(retryable(503).is_retryable());
        assert!(retryable(STATUS_UNREACHABLE).is_retryable());
        assert!(!retryable(200).is_retryable());
        assert!(!retryable(404).is_retryable());
    }
}
