//! Changes-endpoint transport over HTTP.
//!
//! The actual HTTP client and token source are abstracted via traits so
//! the engine never depends on a particular HTTP library or auth flow.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use keepsync_sync_protocol::{ApiReply, ChangesRequest, ChangesResponse};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// The HTTP stack that carries requests.
///
/// Implementations own connection handling; the transport only builds
/// bodies and interprets replies.
pub trait HttpClient: Send + Sync {
    /// Posts a JSON body with an optional bearer token and returns the
    /// response body. Gives up after `timeout`.
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<u8>, String>;

    /// False once the client can no longer reach the server.
    fn is_healthy(&self) -> bool;
}

/// Source of OAuth bearer tokens.
pub trait TokenProvider: Send + Sync {
    /// Current token, if any.
    fn token(&self) -> Option<String>;

    /// Obtains a fresh token after the server rejected the current one.
    fn refresh(&self) -> Result<String, String>;
}

/// A fixed token that cannot be refreshed.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }

    fn refresh(&self) -> Result<String, String> {
        Err("static token cannot be refreshed".into())
    }
}

/// Sync transport posting JSON to the changes endpoint.
///
/// Posts JSON to `<base_url>changes`. An API error with code 401 refreshes
/// the token and retries up to `retry.max_auth_retries` times.
pub struct HttpTransport<C: HttpClient, P: TokenProvider> {
    url: String,
    client: C,
    tokens: P,
    retry: RetryConfig,
    timeout: Duration,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient, P: TokenProvider> HttpTransport<C, P> {
    /// Builds a transport for `config`'s endpoint.
    pub fn new(config: &SyncConfig, client: C, tokens: P) -> Self {
        Self {
            url: config.changes_url(),
            client,
            tokens,
            retry: config.retry.clone(),
            timeout: config.timeout,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Message of the most recent failed exchange.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    fn post(&self, body: &[u8]) -> SyncResult<ApiReply> {
        let token = self.tokens.token();
        let response_body = self
            .client
            .post(&self.url, body.to_vec(), token.as_deref(), self.timeout)
            .map_err(|e| {
                self.set_error(&e);
                SyncError::transport_retryable(e)
            })?;
        Ok(ApiReply::decode(&response_body)?)
    }
}

impl<C: HttpClient, P: TokenProvider> SyncTransport for HttpTransport<C, P> {
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request.encode()?;
        let mut attempt = 0;
        loop {
            match self.post(&body)? {
                ApiReply::Changes(response) => {
                    self.clear_error();
                    return Ok(response);
                }
                ApiReply::Error(error) if error.is_unauthorized() => {
                    self.set_error(&error.message);
                    if attempt >= self.retry.max_auth_retries {
                        return Err(SyncError::AuthenticationFailed(error.message));
                    }
                    attempt += 1;
                    warn!(attempt, "token rejected, refreshing");
                    self.tokens
                        .refresh()
                        .map_err(SyncError::AuthenticationFailed)?;
                    std::thread::sleep(self.retry.delay_for_attempt(attempt));
                }
                ApiReply::Error(error) => {
                    debug!(code = error.code, message = %error.message, "api error");
                    self.set_error(&error.message);
                    return Err(SyncError::Api {
                        code: error.code,
                        message: error.message,
                    });
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Lets tests drive the full HTTP path without a network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Routes every post to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// A server reachable through [`LoopbackClient`].
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8], token: Option<&str>) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(
        &self,
        url: &str,
        body: Vec<u8>,
        token: Option<&str>,
        _timeout: Duration,
    ) -> Result<Vec<u8>, String> {
        let path = url.rsplit('/').next().unwrap_or(url);
        self.server.handle_post(path, &body, token)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
