//! Error types for parcel

use std::time::Duration;
use thiserror::Error;

/// Broad classification of a failure, for callers deciding what to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input; no network call was made
    ClientInput,
    /// The server answered with an unexpected status
    Server,
    /// The request did not complete at the transport level
    Transport,
    /// Bytes arrived with a checksum different from the one sent
    Integrity,
    /// An external cancellation signal was observed
    Cancelled,
    /// The server rejected the completion manifest
    Protocol,
    /// Local failure: caller byte source, response decoding
    Local,
}

/// Error reported by the service, with its diagnostics
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("status {status}, code '{code}', message '{message}', request id '{request_id}'")]
pub struct ServerError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub host_id: String,
    pub ec: String,
}

impl ServerError {
    /// Create a server error carrying only a status and request id
    pub fn new(status: u16, request_id: impl Into<String>) -> Self {
        ServerError {
            status,
            code: String::new(),
            message: String::new(),
            request_id: request_id.into(),
            host_id: String::new(),
            ec: String::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_server_fault(&self) -> bool {
        self.status >= 500 || self.status == 429
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Failure below the HTTP status layer
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection could not be established; no request byte was sent
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection broke while the request or response was in flight
    #[error("Connection interrupted: {0}")]
    Interrupted(String),

    /// The caller's byte source failed while being streamed
    #[error("Request body read failed: {0}")]
    Body(#[source] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ParcelError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Server error: {0}")]
    Server(ServerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(
        "Checksum mismatch for part {part_number}: client crc64 {client}, server crc64 {server}, request id '{request_id}'"
    )]
    ChecksumMismatch {
        part_number: u32,
        client: u64,
        server: u64,
        request_id: String,
    },

    #[error("Completion manifest rejected: {0}")]
    ManifestRejected(ServerError),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<ParcelError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParcelError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ParcelError::InvalidInput(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParcelError::InvalidInput(_) => ErrorKind::ClientInput,
            ParcelError::Server(_) => ErrorKind::Server,
            ParcelError::Transport(TransportError::Body(_)) => ErrorKind::Local,
            ParcelError::Transport(TransportError::InvalidRequest(_)) => ErrorKind::ClientInput,
            ParcelError::Transport(_) => ErrorKind::Transport,
            ParcelError::ChecksumMismatch { .. } => ErrorKind::Integrity,
            ParcelError::ManifestRejected(_) => ErrorKind::Protocol,
            ParcelError::RetryExhausted { last, .. } => last.kind(),
            ParcelError::Cancelled => ErrorKind::Cancelled,
            ParcelError::InvalidResponse(_)
            | ParcelError::Serialization(_)
            | ParcelError::Io(_) => ErrorKind::Local,
        }
    }

    /// Server-provided diagnostics, when the failure came from a response
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            ParcelError::Server(e) | ParcelError::ManifestRejected(e) => Some(e),
            ParcelError::RetryExhausted { last, .. } => last.server_error(),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ParcelError::ChecksumMismatch { request_id, .. } => Some(request_id),
            _ => self.server_error().map(|e| e.request_id.as_str()),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.server_error().map(|e| e.status)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}
