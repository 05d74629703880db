//! The seam between the upload logic and an HTTP implementation

use crate::protocol::headers;
use crate::wire::ErrorResult;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use parcel_core::{RequestInfo, ServerError, TransportError};
use std::fmt;
use std::future::Future;
use tokio::io::AsyncRead;

pub use hyper::{HeaderMap, Method};

/// Request payload
pub enum RequestBody<'a> {
    Empty,
    Full(Bytes),
    /// Bytes pulled from a caller-owned reader while the request is sent
    Stream(&'a mut (dyn AsyncRead + Send + Unpin + 'a)),
}

impl fmt::Debug for RequestBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// One HTTP exchange, addressed by bucket and key
#[derive(Debug)]
pub struct TransportRequest<'a> {
    pub method: Method,
    pub bucket: &'a str,
    pub key: &'a str,
    pub query: Vec<(&'static str, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub content_length: Option<u64>,
    pub body: RequestBody<'a>,
}

impl<'a> TransportRequest<'a> {
    pub fn new(method: Method, bucket: &'a str, key: &'a str) -> Self {
        TransportRequest {
            method,
            bucket,
            key,
            query: Vec::new(),
            headers: Vec::new(),
            content_length: None,
            body: RequestBody::Empty,
        }
    }

    pub fn with_query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    /// Add a query parameter only when a value is present
    pub fn with_optional_query<V: ToString>(self, name: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with_query(name, value.to_string()),
            None => self,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: RequestBody<'a>, content_length: Option<u64>) -> Self {
        self.body = body;
        self.content_length = content_length;
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully received response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Attach a header; names or values that are not valid HTTP are skipped
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_id(&self) -> &str {
        self.header(headers::REQUEST_ID).unwrap_or_default()
    }

    pub fn request_info(&self) -> RequestInfo {
        RequestInfo {
            status_code: self.status,
            request_id: self.request_id().to_string(),
            host_id: self.header(headers::ID_2).unwrap_or_default().to_string(),
        }
    }

    /// Build the service error for an unexpected status
    ///
    /// Diagnostics come from the JSON error body when present, falling back
    /// to response headers.
    pub fn server_error(&self) -> ServerError {
        let parsed = ErrorResult::parse(&self.body);
        let pick = |body: String, header: &str| {
            if body.is_empty() {
                self.header(header).unwrap_or_default().to_string()
            } else {
                body
            }
        };

        ServerError {
            status: self.status,
            code: parsed.code,
            message: parsed.message,
            request_id: pick(parsed.request_id, headers::REQUEST_ID),
            host_id: pick(parsed.host_id, headers::ID_2),
            ec: pick(parsed.ec, headers::EC),
        }
    }
}

/// Sends requests to the service
///
/// Implementations must surface connection failures that happened before any
/// request byte was written as [`TransportError::Connect`].
pub trait Transport: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        request: TransportRequest<'a>,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send + 'a;
}
