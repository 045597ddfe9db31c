//! HTTP seam between pipeline stages and the services they call.
//!
//! Stages describe a request as an [`HttpRequest`] and hand it to a
//! [`Transport`]. The production implementation is [`ReqwestTransport`];
//! tests inject a scripted implementation so the retry and quarantine
//! policies can be exercised without live services.
//!
//! The one distinction stages depend on is [`TransportError::Connect`] vs
//! everything else: a peer that never accepted the connection is handled
//! differently from one that answered badly.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// HTTP method used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/json` body.
    Json(Value),
    /// `multipart/form-data` with one file part plus plain text fields.
    Multipart {
        file_field: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
        fields: Vec<(String, String)>,
    },
}

impl RequestBody {
    /// Multipart body carrying a single `file` part.
    pub fn file(file_name: &str, mime: &str, bytes: Vec<u8>) -> Self {
        RequestBody::Multipart {
            file_field: "file".to_string(),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            bytes,
            fields: Vec::new(),
        }
    }
}

/// A fully described outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self::new(Method::Post, url, body)
    }

    pub fn put(url: impl Into<String>, body: RequestBody) -> Self {
        Self::new(Method::Put, url, body)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }
}

/// A response that arrived, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossily decoded, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failure to obtain any response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer could not be reached (refused, unresolvable, unreachable).
    #[error("connection failed: {0}")]
    Connect(String),
    /// The peer was reached but the exchange failed.
    #[error("{0}")]
    Other(String),
}

/// Sends [`HttpRequest`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!("{:?} {}", request.method, request.url);

        let mut builder = match request.method {
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart {
                file_field,
                file_name,
                mime,
                bytes,
                fields,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime)
                    .map_err(|e| TransportError::Other(e.to_string()))?;
                let mut form = reqwest::multipart::Form::new().part(file_field, part);
                for (key, value) in fields {
                    form = form.text(key, value);
                }
                builder.multipart(form)
            }
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        debug!("{} → HTTP {} ({} bytes)", request.url, status, body.len());

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
