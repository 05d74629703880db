//! Transfer progress reporting

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataTransferType {
    /// First byte about to be read
    Started,
    /// A chunk was read from the source
    Rw,
    /// The declared length was fully read
    Succeed,
    /// The attempt ended before the declared length was read
    Failed,
}

/// Snapshot passed to a [`DataTransferListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataTransferStatus {
    /// Bytes read so far in this attempt
    pub consumed_bytes: u64,
    pub total_bytes: u64,
    /// Bytes read by the call that produced this event
    pub rw_once_bytes: u64,
    pub transfer_type: DataTransferType,
}

/// Receives progress events for one part transfer
///
/// Counters restart from zero on every attempt. Events arrive on the task
/// driving the upload and must not block.
pub trait DataTransferListener: Send + Sync {
    fn on_transfer(&self, status: &DataTransferStatus);
}

impl std::fmt::Debug for dyn DataTransferListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataTransferListener")
    }
}

impl<F> DataTransferListener for F
where
    F: Fn(&DataTransferStatus) + Send + Sync,
{
    fn on_transfer(&self, status: &DataTransferStatus) {
        self(status)
    }
}
