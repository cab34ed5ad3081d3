//! The transport seam between the engine and the changes endpoint.

use crate::error::{SyncError, SyncResult};
use keepsync_sync_protocol::{ChangesRequest, ChangesResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport exchanges one delta page with the server.
///
/// Implemented over HTTP, over an in-process server in tests, and by
/// [`MockTransport`].
pub trait SyncTransport: Send + Sync {
    /// Sends one page of local changes and returns the server's delta page.
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse>;

    /// False once the transport has been closed or lost its client.
    fn is_connected(&self) -> bool;

    /// Stops further exchanges.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport that replays scripted responses in order.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    responses: Mutex<VecDeque<SyncResult<ChangesResponse>>>,
    requests: Mutex<Vec<ChangesRequest>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// An empty, connected mock.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn push_response(&self, response: ChangesResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChangesRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of queued responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.responses.lock().len()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SyncTransport for MockTransport {
    fn changes(&self, request: &ChangesRequest) -> SyncResult<ChangesResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("No mock response queued".into())))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
