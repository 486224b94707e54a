pub mod base;
pub mod download;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::ByteRange;

pub use base::{Base, BaseConfig, BaseId, BaseManager, BaseOptions, UriTransform};
pub use download::{Download, DownloadState, Progress, Request, RequestOutcome, RequestTiming};
pub use http::HttpTransport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(error.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Forces how the response body is interpreted, overriding `Content-Type`.
    pub mime_type: Option<String>,
    pub timeout: Option<Duration>,
    pub byte_range: Option<ByteRange>,
}

impl RequestOptions {
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_byte_range(mut self, byte_range: Option<ByteRange>) -> Self {
        self.byte_range = byte_range;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
    pub content_type: Option<String>,
    /// Raw `Date` header.
    pub date: Option<String>,
    /// When the response headers became available.
    pub headers_at: Option<Instant>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type: None,
            date: None,
            headers_at: None,
        }
    }
}

/// The physical transfer of one resource.
///
/// Implementations report every HTTP response, whatever its status, as
/// `Ok`; deciding which statuses count as success is left to [`Request`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, options: &RequestOptions) -> Result<Response, TransportError>;
}
