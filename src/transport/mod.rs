//! Transport abstraction for the array's REST management endpoint.
//!
//! A transport sends exactly one request and returns the HTTP status with the
//! decoded JSON body. It performs no retries and knows nothing about jobs or
//! idempotency; those concerns live in [`crate::client::ArrayClient`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;

mod http;

pub use http::{HttpTransport, HttpTransportSettings};

/// HTTP verb used by a management request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    /// Read a resource or collection.
    Get,
    /// Create a resource or submit an action.
    Post,
    /// Modify a resource.
    Put,
    /// Remove a resource.
    Delete,
}

impl Method {
    /// Returns the canonical upper-case verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request against the management API.
///
/// `path` is relative to the REST root (`{base_url}/univmax/restapi/`) and
/// already includes the API version segment.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path relative to the REST root.
    pub path: String,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// Optional JSON payload.
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    /// Builds a `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path, None)
    }

    /// Builds a `POST` request with a JSON payload.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path, Some(body))
    }

    /// Builds a `PUT` request with a JSON payload.
    #[must_use]
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path, Some(body))
    }

    /// Builds a `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path, None)
    }

    /// Attaches a JSON payload, replacing any existing one.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Returns the value of the first query parameter named `key`.
    #[must_use]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Status and decoded body returned by the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body; [`Value::Null`] when the body was empty.
    pub body: Value,
}

impl ApiResponse {
    /// Builds a response from a status code and body.
    #[must_use]
    pub const fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Errors raised when a request could not be completed at the transport
/// level.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("connection to {endpoint} failed: {message}")]
    Connect {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Message from the underlying client.
        message: String,
    },
    /// The request did not complete before the transport timeout.
    #[error("request to {endpoint} timed out: {message}")]
    TimedOut {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Message from the underlying client.
        message: String,
    },
    /// The response body could not be decoded as JSON.
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Decoder message.
        message: String,
    },
    /// The request could not be built or sent.
    #[error("request to {endpoint} failed: {message}")]
    Request {
        /// Endpoint that was contacted.
        endpoint: String,
        /// Message from the underlying client.
        message: String,
    },
}

impl TransportError {
    /// Returns `true` when retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::TimedOut { .. })
    }
}

/// Future returned by transport operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Sends single requests to the management endpoint.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw status and body.
    fn invoke<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a, ApiResponse>;
}
