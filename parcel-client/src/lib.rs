//! parcel multipart upload client
//!
//! Parts are uploaded with a rolling CRC-64 verified against the server's,
//! retried according to whether their body can be rewound, and assembled by
//! a completion request that always lists parts in ascending order.

pub mod client;
pub mod config;
pub mod content;
pub mod limiter;
pub mod listing;
pub mod multipart;
pub mod progress;
pub mod retry;
pub mod streaming;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{Client, CreateMultipartUploadInput, CreateMultipartUploadOutput};
pub use config::ClientConfig;
pub use content::{PartBody, SeekableSource, WrappedContent};
pub use limiter::{RateLimiter, TokenBucketRateLimiter};
pub use listing::{
    ListMultipartUploadsInput, ListMultipartUploadsOutput, ListPartsInput, ListPartsOutput,
};
pub use multipart::{
    AbortMultipartUploadInput, AbortMultipartUploadOutput, CompleteMultipartUploadInput,
    CompleteMultipartUploadOutput, UploadPartFromFileInput, UploadPartInput, UploadPartOutput,
};
pub use progress::{DataTransferListener, DataTransferStatus, DataTransferType};
pub use retry::{Classifier, RetryPolicy};
pub use transport::HttpTransport;

pub use parcel_core::{
    ErrorKind, ParcelError, RequestInfo, Result, SessionState, UploadSession, UploadedPart,
};
pub use tokio_util::sync::CancellationToken;
