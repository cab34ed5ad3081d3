//! Sync engine settings: endpoint, request header contents and retry policy.

use keepsync_sync_protocol::{ClientVersion, RequestHeader, DEFAULT_CAPABILITIES};
use rand::Rng;
use std::time::Duration;

/// Default endpoint of the notes API.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/notes/v1/";

/// Settings for one account's sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL; requests go to `<base_url>changes`.
    pub base_url: String,
    /// Client session id sent in every request header.
    pub session_id: String,
    /// Platform reported to the server.
    pub client_platform: String,
    /// Version reported to the server.
    pub client_version: ClientVersion,
    /// Advertised capability codes.
    pub capabilities: Vec<String>,
    /// Authorization retry policy.
    pub retry: RetryConfig,
    /// Upper bound on pages exchanged in one cycle.
    pub max_pages: u32,
    /// Per-request timeout handed to the HTTP client.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Defaults for `session_id` against the public endpoint.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            session_id: session_id.into(),
            client_platform: "ANDROID".into(),
            client_version: ClientVersion::default(),
            capabilities: DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            retry: RetryConfig::default(),
            max_pages: 1000,
            timeout: Duration::from_secs(20),
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the reported client version.
    pub fn with_client_version(mut self, version: ClientVersion) -> Self {
        self.client_version = version;
        self
    }

    /// Sets the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the authorization retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the page limit.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the request header.
    pub fn request_header(&self) -> RequestHeader {
        RequestHeader::new(
            self.session_id.clone(),
            self.client_platform.clone(),
            self.client_version.clone(),
            &self.capabilities,
        )
    }

    /// URL of the changes endpoint.
    pub fn changes_url(&self) -> String {
        format!("{}changes", self.base_url)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// How authorization failures are retried.
///
/// A 401 reply refreshes the token and tries again, waiting a little longer
/// each time. No other failure is retried inside a cycle.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Token refreshes allowed per exchange.
    pub max_auth_retries: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single wait.
    pub delay_cap: Duration,
    /// Growth factor applied per further retry.
    pub factor: u32,
    /// Adds up to a quarter of the wait at random.
    pub jitter: bool,
}

impl RetryConfig {
    /// Retries `max_auth_retries` times with growing waits.
    pub fn new(max_auth_retries: u32) -> Self {
        Self {
            max_auth_retries,
            base_delay: Duration::from_millis(250),
            delay_cap: Duration::from_secs(4),
            factor: 2,
            jitter: true,
        }
    }

    /// Never retries.
    pub fn no_retry() -> Self {
        Self::immediate(0)
    }

    /// Retries `max_auth_retries` times without waiting.
    pub fn immediate(max_auth_retries: u32) -> Self {
        Self {
            max_auth_retries,
            base_delay: Duration::ZERO,
            delay_cap: Duration::ZERO,
            factor: 1,
            jitter: false,
        }
    }

    /// Sets the first wait.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the wait cap.
    pub fn with_delay_cap(mut self, cap: Duration) -> Self {
        self.delay_cap = cap;
        self
    }

    /// Sets the growth factor.
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    /// Wait before retry number `retry`, counting from 1. Retry 0 is the
    /// first attempt and never waits.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let Some(exponent) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let growth = self.factor.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(growth).min(self.delay_cap);
        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..=0.25);
            delay + delay.mul_f64(extra)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2)
    }
}
