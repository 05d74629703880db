//! Core data types for parcel

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Completed,
    Aborted,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Completed,
            2 => SessionState::Aborted,
            _ => SessionState::Active,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Active => 0,
            SessionState::Completed => 1,
            SessionState::Aborted => 2,
        }
    }
}

/// A logical multipart upload: target bucket and key plus the opaque upload id
///
/// Clones share lifecycle state, so a session completed through one clone is
/// seen as completed by all of them.
#[derive(Debug, Clone)]
pub struct UploadSession {
    bucket: String,
    key: String,
    upload_id: String,
    state: Arc<AtomicU8>,
}

impl UploadSession {
    /// Wrap an upload id returned by the service
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        UploadSession {
            bucket: bucket.into(),
            key: key.into(),
            upload_id: upload_id.into(),
            state: Arc::new(AtomicU8::new(SessionState::Active.as_u8())),
        }
    }

    /// Rebuild a session for an upload discovered by listing
    pub fn resume(
        bucket: impl Into<String>,
        key: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        Self::new(bucket, key, upload_id)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Check the session can still carry part, listing or completion calls
    pub fn ensure_active(&self) -> crate::Result<()> {
        if self.upload_id.is_empty() {
            return Err(crate::ParcelError::invalid_input("upload id is empty"));
        }
        match self.state() {
            SessionState::Active => Ok(()),
            state => Err(crate::ParcelError::InvalidInput(format!(
                "upload '{}' is already {:?}",
                self.upload_id, state
            ))),
        }
    }

    /// Move an active session to a terminal state
    ///
    /// Returns the state observed before the transition; a session that was
    /// already terminated keeps its first terminal state.
    pub fn terminate(&self, state: SessionState) -> SessionState {
        match self.state.compare_exchange(
            SessionState::Active.as_u8(),
            state.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(previous) | Err(previous) => SessionState::from_u8(previous),
        }
    }
}

/// Descriptor of an uploaded part, as needed by the completion manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

impl UploadedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        UploadedPart {
            part_number,
            etag: etag.into(),
        }
    }
}

/// Diagnostics attached to every server response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub status_code: u16,
    pub request_id: String,
    pub host_id: String,
}
