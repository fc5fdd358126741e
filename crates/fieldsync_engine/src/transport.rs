//! Transport layer abstraction for server communication.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use fieldsync_store::MutationRequest;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Raw HTTP response as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Empty-bodied 200.
    pub fn ok() -> Self {
        Self::new(200, Vec::new())
    }

    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A transport carries requests to the field-data server.
///
/// Implementations are expected to surface connection-level failures as
/// [`EngineError::Transport`] and let the engine interpret status codes;
/// a transport never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one mutation request.
    async fn send(&self, request: &MutationRequest) -> EngineResult<HttpResponse>;

    /// Fetches a read-only resource, used for cache refresh.
    async fn fetch(&self, url: &str) -> EngineResult<HttpResponse>;
}

/// A scripted transport for testing.
///
/// `send` pops responses in script order and records every request it
/// saw; `fetch` answers from a per-URL script. An unscripted call fails
/// with a transport error so tests cannot silently succeed.
#[derive(Debug, Default)]
pub struct MockTransport {
    send_script: Mutex<VecDeque<EngineResult<HttpResponse>>>,
    fetch_scripts: Mutex<HashMap<String, VecDeque<EngineResult<HttpResponse>>>>,
    sent: Mutex<Vec<MutationRequest>>,
    fetched: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Creates a mock with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next `send` response.
    pub fn push_response(&self, response: EngineResult<HttpResponse>) {
        self.send_script.lock().push_back(response);
    }

    /// Queues `n` successful `send` responses.
    pub fn push_ok(&self, n: usize) {
        let mut script = self.send_script.lock();
        for _ in 0..n {
            script.push_back(Ok(HttpResponse::ok()));
        }
    }

    /// Queues the next `fetch` response for `url`.
    pub fn push_fetch_response(&self, url: &str, response: EngineResult<HttpResponse>) {
        self.fetch_scripts
            .lock()
            .entry(url.to_owned())
            .or_default()
            .push_back(response);
    }

    /// Requests seen by `send`, in order.
    pub fn sent_requests(&self) -> Vec<MutationRequest> {
        self.sent.lock().clone()
    }

    /// URLs seen by `fetch`, in order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &MutationRequest) -> EngineResult<HttpResponse> {
        self.sent.lock().push(request.clone());
        self.send_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::transport("no scripted response")))
    }

    async fn fetch(&self, url: &str) -> EngineResult<HttpResponse> {
        self.fetched.lock().push(url.to_owned());
        self.fetch_scripts
            .lock()
            .get_mut(url)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Err(EngineError::transport("no scripted response")))
    }
}
