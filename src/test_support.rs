//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError, TransportFuture};

/// Scripted transport that returns pre-seeded responses in FIFO order.
///
/// Every request is recorded so tests can assert on what was sent. When the
/// queue is empty the fallback response is returned if one was set;
/// otherwise the request fails with [`TransportError::Request`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<Result<ApiResponse, TransportError>>,
    fallback: Option<ApiResponse>,
    requests: Vec<ApiRequest>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a response with the given status and body.
    pub fn push_response(&self, status: u16, body: Value) {
        self.state()
            .responses
            .push_back(Ok(ApiResponse::new(status, body)));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.state().responses.push_back(Err(error));
    }

    /// Sets the response returned once the queue is exhausted.
    pub fn set_default(&self, status: u16, body: Value) {
        self.state().fallback = Some(ApiResponse::new(status, body));
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state().requests.clone()
    }

    /// Number of queued responses not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn invoke<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a, ApiResponse> {
        Box::pin(async move {
            let mut state = self.state();
            state.requests.push(request.clone());
            match state.responses.pop_front() {
                Some(response) => response,
                None => state.fallback.clone().ok_or_else(|| TransportError::Request {
                    endpoint: request.path.clone(),
                    message: String::from("no scripted response available"),
                }),
            }
        })
    }
}
