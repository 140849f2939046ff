//! HTTPS transport built on `reqwest`.

use std::fmt;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde_json::{Value, json};
use tracing::debug;

use super::{ApiRequest, ApiResponse, Method, Transport, TransportError, TransportFuture};

const REST_ROOT: &str = "univmax/restapi";

/// Connection settings for [`HttpTransport`].
#[derive(Clone)]
pub struct HttpTransportSettings {
    /// Management endpoint, for example `https://unisphere.example:8443`.
    pub base_url: String,
    /// User name presented with every request.
    pub username: String,
    /// Password presented with every request.
    pub password: String,
    /// Whether the server certificate is verified.
    pub verify_tls: bool,
    /// Upper bound on a single round trip.
    pub request_timeout: Duration,
}

impl fmt::Debug for HttpTransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransportSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Transport that talks to the management endpoint over HTTPS.
///
/// Credentials travel as HTTP basic authentication on every request, so
/// there is no session to establish or renew.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    root: String,
    username: String,
    password: String,
}

impl HttpTransport {
    /// Builds a transport from connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] when the HTTP client cannot be
    /// constructed (for example when the TLS backend fails to initialise).
    pub fn new(settings: HttpTransportSettings) -> Result<Self, TransportError> {
        let root = format!("{}/{REST_ROOT}", settings.base_url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|err| TransportError::Request {
                endpoint: root.clone(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            root,
            username: settings.username,
            password: settings.password,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> String {
        format!("{}/{}", self.root, request.path.trim_start_matches('/'))
    }

    const fn method_for(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(endpoint: &str, err: &reqwest::Error) -> TransportError {
        let endpoint_owned = endpoint.to_owned();
        let message = err.to_string();
        if err.is_timeout() {
            TransportError::TimedOut {
                endpoint: endpoint_owned,
                message,
            }
        } else if err.is_connect() {
            TransportError::Connect {
                endpoint: endpoint_owned,
                message,
            }
        } else {
            TransportError::Request {
                endpoint: endpoint_owned,
                message,
            }
        }
    }

    /// Decodes a response body. Error pages that are not JSON are wrapped as
    /// `{"message": <text>}` so the status is never lost to a decode failure.
    fn decode_body(endpoint: &str, status: u16, bytes: &[u8]) -> Result<Value, TransportError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Ok(value),
            Err(_) if !(200..300).contains(&status) => {
                Ok(json!({ "message": String::from_utf8_lossy(bytes).trim() }))
            }
            Err(err) => Err(TransportError::Decode {
                endpoint: endpoint.to_owned(),
                message: err.to_string(),
            }),
        }
    }
}

impl Transport for HttpTransport {
    fn invoke<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a, ApiResponse> {
        Box::pin(async move {
            let url = self.url_for(request);
            debug!(method = %request.method, url = %url, "sending array request");
            let mut builder = self
                .client
                .request(Self::method_for(request.method), &url)
                .basic_auth(&self.username, Some(&self.password))
                .header(ACCEPT, "application/json");
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            let response = builder
                .send()
                .await
                .map_err(|err| Self::classify(&url, &err))?;
            let status = response.status().as_u16();
            let bytes = response
                .bytes()
                .await
                .map_err(|err| Self::classify(&url, &err))?;
            let body = Self::decode_body(&url, status, &bytes)?;
            debug!(status, url = %url, "array responded");
            Ok(ApiResponse::new(status, body))
        })
    }
}
