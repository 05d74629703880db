//! Multipart upload support: part transfer, completion and abort

use crate::client::Client;
use crate::content::{PartBody, WrappedContent};
use crate::limiter::RateLimiter;
use crate::progress::DataTransferListener;
use crate::retry::{Attempt, Classifier, FnAttempt};
use bytes::Bytes;
use parcel_core::checksum::parse_crc64;
use parcel_core::{ParcelError, RequestInfo, Result, SessionState, UploadSession, UploadedPart};
use parcel_net::protocol::{expect, headers, query, COMPLETE_ALL_YES};
use parcel_net::{
    decode_body, CompleteMultipartUploadResult, CompletionManifest, Method, RequestBody, Transport,
    TransportRequest, TransportResponse,
};
use serde::Serialize;
use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncSeekExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One part to upload
pub struct UploadPartInput<'a> {
    pub session: &'a UploadSession,
    /// 1-based position of the part in the final object
    pub part_number: u32,
    pub body: PartBody<'a>,
    /// Bytes to send; measured from a seekable body when absent
    pub content_length: Option<u64>,
    pub listener: Option<Arc<dyn DataTransferListener>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub cancel: Option<CancellationToken>,
}

impl<'a> UploadPartInput<'a> {
    pub fn new(session: &'a UploadSession, part_number: u32, body: PartBody<'a>) -> Self {
        UploadPartInput {
            session,
            part_number,
            body,
            content_length: None,
            listener: None,
            rate_limiter: None,
            cancel: None,
        }
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn DataTransferListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Result of a verified part upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadPartOutput {
    pub request_info: RequestInfo,
    pub part_number: u32,
    /// Entity tag exactly as the server sent it
    pub etag: String,
    /// CRC-64/ECMA the server computed over the part, when reported
    pub hash_crc64ecma: Option<u64>,
}

impl UploadPartOutput {
    /// Descriptor for the completion manifest
    pub fn to_uploaded_part(&self) -> UploadedPart {
        UploadedPart::new(self.part_number, self.etag.clone())
    }
}

/// A part whose bytes come from a file range
#[derive(Debug, Clone)]
pub struct UploadPartFromFileInput {
    pub session: UploadSession,
    pub part_number: u32,
    pub path: PathBuf,
    pub offset: u64,
    /// Bytes to send from `offset`; the rest of the file when absent
    pub part_size: Option<u64>,
    pub listener: Option<Arc<dyn DataTransferListener>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub cancel: Option<CancellationToken>,
}

impl UploadPartFromFileInput {
    pub fn new(session: UploadSession, part_number: u32, path: impl Into<PathBuf>) -> Self {
        UploadPartFromFileInput {
            session,
            part_number,
            path: path.into(),
            offset: 0,
            part_size: None,
            listener: None,
            rate_limiter: None,
            cancel: None,
        }
    }

    pub fn with_range(mut self, offset: u64, part_size: u64) -> Self {
        self.offset = offset;
        self.part_size = Some(part_size);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn DataTransferListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Everything one transfer attempt needs, reused across retries
struct PartAttempt<'c, 'b, T: Transport> {
    client: &'c Client<T>,
    session: &'c UploadSession,
    part_number: u32,
    length: u64,
    body: PartBody<'b>,
    start: Option<u64>,
    listener: Option<Arc<dyn DataTransferListener>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    enable_crc: bool,
    consumed: u64,
}

impl<T: Transport> PartAttempt<'_, '_, T> {
    fn verify(&self, response: &TransportResponse, local: Option<u64>) -> Result<UploadPartOutput> {
        let request_info = response.request_info();

        let etag = response.header(headers::ETAG).unwrap_or_default();
        if etag.is_empty() {
            return Err(ParcelError::InvalidResponse(format!(
                "part {} response has no ETag, request id '{}'",
                self.part_number, request_info.request_id
            )));
        }

        let server = response
            .header(headers::HASH_CRC64ECMA)
            .map(parse_crc64)
            .transpose()?;

        match (local, server) {
            (Some(client), Some(server)) if client != server => {
                return Err(ParcelError::ChecksumMismatch {
                    part_number: self.part_number,
                    client,
                    server,
                    request_id: request_info.request_id,
                });
            }
            (Some(_), Some(_)) => debug!("Part {} checksum verified", self.part_number),
            (Some(_), None) => debug!(
                "Part {} response carries no checksum; verification skipped",
                self.part_number
            ),
            _ => {}
        }

        Ok(UploadPartOutput {
            part_number: self.part_number,
            etag: etag.to_string(),
            hash_crc64ecma: server,
            request_info,
        })
    }
}

impl<T: Transport> Attempt for PartAttempt<'_, '_, T> {
    type Output = UploadPartOutput;

    fn run(&mut self) -> impl Future<Output = Result<UploadPartOutput>> + Send {
        async move {
            let mut content = WrappedContent::new(&mut self.body, self.length)
                .with_checksum(self.enable_crc)
                .with_listener(self.listener.clone())
                .with_rate_limiter(self.limiter.clone());

            let (bucket, key) = (self.session.bucket(), self.session.key());
            let request = TransportRequest::new(Method::PUT, bucket, key)
                .with_query(query::PART_NUMBER, self.part_number.to_string())
                .with_query(query::UPLOAD_ID, self.session.upload_id())
                .with_body(RequestBody::Stream(&mut content), Some(self.length));

            let result = self.client.round_trip(request, expect::UPLOAD_PART).await;
            let consumed = content.consumed();
            let local = content.checksum();
            if result.is_err() {
                content.report_failed();
            }
            drop(content);
            self.consumed = consumed;

            let response = result?;
            if consumed != self.length {
                return Err(ParcelError::InvalidResponse(format!(
                    "server accepted part {} after {} of {} bytes",
                    self.part_number, consumed, self.length
                )));
            }
            self.verify(&response, local)
        }
    }

    fn before_retry(&mut self) -> impl Future<Output = Result<()>> + Send {
        async move {
            if let Some(start) = self.start {
                self.body.rewind_to(start).await?;
            }
            self.consumed = 0;
            Ok(())
        }
    }

    fn can_replay(&self) -> bool {
        self.body.is_seekable() || self.consumed == 0
    }
}

/// Completion request
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadInput<'a> {
    pub session: &'a UploadSession,
    /// Uploaded parts in any order
    pub parts: Vec<UploadedPart>,
    /// Let the server assemble every part it holds; `parts` must be empty
    pub complete_all: bool,
    pub cancel: Option<CancellationToken>,
}

impl<'a> CompleteMultipartUploadInput<'a> {
    pub fn new(session: &'a UploadSession, parts: Vec<UploadedPart>) -> Self {
        CompleteMultipartUploadInput {
            session,
            parts,
            complete_all: false,
            cancel: None,
        }
    }

    pub fn all(session: &'a UploadSession) -> Self {
        CompleteMultipartUploadInput {
            session,
            parts: Vec::new(),
            complete_all: true,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteMultipartUploadOutput {
    pub request_info: RequestInfo,
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub location: String,
    pub version_id: String,
    /// Checksum of the assembled object as reported by the server
    pub hash_crc64ecma: Option<u64>,
    pub callback_result: String,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartUploadInput<'a> {
    pub session: &'a UploadSession,
    pub cancel: Option<CancellationToken>,
}

impl<'a> AbortMultipartUploadInput<'a> {
    pub fn new(session: &'a UploadSession) -> Self {
        AbortMultipartUploadInput {
            session,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AbortMultipartUploadOutput {
    pub request_info: RequestInfo,
    /// The upload was already gone: aborted earlier or unknown to the server
    pub already_gone: bool,
}

impl<T: Transport> Client<T> {
    /// Upload one part with checksum verification and retry
    ///
    /// A seekable body is rewound to its starting position before each
    /// retry and is retried on any transient failure. A non-seekable body
    /// is retried only on server faults and failed connection attempts, and
    /// never once any of its bytes were consumed.
    pub async fn upload_part(&self, input: UploadPartInput<'_>) -> Result<UploadPartOutput> {
        let UploadPartInput {
            session,
            part_number,
            mut body,
            content_length,
            listener,
            rate_limiter,
            cancel,
        } = input;

        if part_number == 0 {
            return Err(ParcelError::invalid_input("part number must be positive"));
        }
        session.ensure_active()?;
        let length = body.resolve_length(content_length).await?;
        let start = body.position().await?;
        let classifier = Classifier::for_body(body.is_seekable());

        debug!(
            "Uploading part {} of {} ({} bytes, {:?})",
            part_number,
            session.upload_id(),
            length,
            classifier
        );

        let mut attempt = PartAttempt {
            client: self,
            session,
            part_number,
            length,
            body,
            start,
            listener,
            limiter: rate_limiter,
            enable_crc: self.config().enable_crc,
            consumed: 0,
        };
        self.retryer(classifier, cancel.as_ref(), "upload_part")
            .run(&mut attempt)
            .await
    }

    /// Upload `part_size` bytes of a file starting at `offset`
    pub async fn upload_part_from_file(
        &self,
        input: UploadPartFromFileInput,
    ) -> Result<UploadPartOutput> {
        let mut file = tokio::fs::File::open(&input.path).await?;
        let file_len = file.metadata().await?.len();
        if input.offset > file_len {
            return Err(ParcelError::InvalidInput(format!(
                "offset {} is beyond the end of {} ({} bytes)",
                input.offset,
                input.path.display(),
                file_len
            )));
        }
        let available = file_len - input.offset;
        let length = match input.part_size {
            Some(size) if size > available => {
                return Err(ParcelError::InvalidInput(format!(
                    "part of {} bytes at offset {} exceeds {} ({} bytes)",
                    size,
                    input.offset,
                    input.path.display(),
                    file_len
                )))
            }
            Some(size) => size,
            None => available,
        };
        file.seek(SeekFrom::Start(input.offset)).await?;

        let body = PartBody::seekable(&mut file);
        let mut part = UploadPartInput::new(&input.session, input.part_number, body)
            .with_content_length(length);
        part.listener = input.listener.clone();
        part.rate_limiter = input.rate_limiter.clone();
        part.cancel = input.cancel.clone();

        self.upload_part(part).await
    }

    /// Assemble the uploaded parts into the final object
    ///
    /// Parts are sent in ascending part-number order whatever order they
    /// were given in. A 4xx answer means the server rejected the manifest
    /// and is returned as [`ParcelError::ManifestRejected`].
    ///
    /// A success status with an undecodable body is returned as
    /// [`ParcelError::InvalidResponse`]; the server has assembled the object
    /// by then, so the session is already marked completed.
    pub async fn complete_multipart_upload(
        &self,
        input: CompleteMultipartUploadInput<'_>,
    ) -> Result<CompleteMultipartUploadOutput> {
        let session = input.session;
        session.ensure_active()?;
        match (input.complete_all, input.parts.is_empty()) {
            (true, false) => {
                return Err(ParcelError::invalid_input(
                    "parts must be empty when completing all uploaded parts",
                ))
            }
            (false, true) => {
                return Err(ParcelError::invalid_input("at least one part is required"))
            }
            _ => {}
        }
        if let Some(part) = input.parts.iter().find(|p| p.part_number == 0) {
            return Err(ParcelError::InvalidInput(format!(
                "part number must be positive, got {} with ETag {}",
                part.part_number, part.etag
            )));
        }

        let manifest = CompletionManifest::from_parts(&input.parts);
        let payload = Bytes::from(manifest.to_bytes()?);
        let complete_all = input.complete_all;

        let mut attempt = FnAttempt(move || {
            let mut request =
                TransportRequest::new(Method::POST, session.bucket(), session.key())
                    .with_query(query::UPLOAD_ID, session.upload_id())
                    .with_body(
                        RequestBody::Full(payload.clone()),
                        Some(payload.len() as u64),
                    );
            if complete_all {
                request = request.with_header(headers::COMPLETE_ALL, COMPLETE_ALL_YES);
            }
            self.round_trip(request, expect::COMPLETE)
        });

        let response = self
            .retryer(Classifier::ServerError, input.cancel.as_ref(), "complete_multipart_upload")
            .run(&mut attempt)
            .await
            .map_err(|err| match err {
                ParcelError::Server(e) if (400..500).contains(&e.status) => {
                    ParcelError::ManifestRejected(e)
                }
                other => other,
            })?;

        let request_info = response.request_info();
        if session.terminate(SessionState::Completed) != SessionState::Active {
            warn!(
                "Upload {} was terminated concurrently with its completion",
                session.upload_id()
            );
        }

        let hash_crc64ecma = match response.header(headers::HASH_CRC64ECMA).map(parse_crc64) {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => {
                warn!("Ignoring object checksum header: {}", e);
                None
            }
            None => None,
        };
        let body: CompleteMultipartUploadResult =
            match decode_body(&response.body, &request_info.request_id) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Completed upload {} but: {}", session.upload_id(), e);
                    return Err(e);
                }
            };

        info!(
            "Completed multipart upload {} with {} parts",
            session.upload_id(),
            if complete_all {
                "all".to_string()
            } else {
                manifest.parts.len().to_string()
            }
        );

        Ok(CompleteMultipartUploadOutput {
            bucket: or_else(body.bucket, session.bucket()),
            key: or_else(body.key, session.key()),
            etag: or_else(body.etag, response.header(headers::ETAG).unwrap_or_default()),
            location: body.location,
            version_id: response
                .header(headers::VERSION_ID)
                .unwrap_or_default()
                .to_string(),
            hash_crc64ecma,
            callback_result: body.callback_result,
            request_info,
        })
    }

    /// Abandon an upload and let the server discard its parts
    ///
    /// Aborting an upload that is already aborted, or that the server no
    /// longer knows, succeeds with `already_gone` set.
    pub async fn abort_multipart_upload(
        &self,
        input: AbortMultipartUploadInput<'_>,
    ) -> Result<AbortMultipartUploadOutput> {
        let session = input.session;
        if session.upload_id().is_empty() {
            return Err(ParcelError::invalid_input("upload id is empty"));
        }
        match session.state() {
            SessionState::Aborted => {
                debug!("Upload {} already aborted", session.upload_id());
                return Ok(AbortMultipartUploadOutput {
                    already_gone: true,
                    ..Default::default()
                });
            }
            SessionState::Completed => {
                return Err(ParcelError::InvalidInput(format!(
                    "upload '{}' is already completed",
                    session.upload_id()
                )))
            }
            SessionState::Active => {}
        }

        let mut attempt = FnAttempt(move || {
            let request = TransportRequest::new(Method::DELETE, session.bucket(), session.key())
                .with_query(query::UPLOAD_ID, session.upload_id());
            self.round_trip(request, expect::ABORT)
        });

        let output = match self
            .retryer(Classifier::ServerError, input.cancel.as_ref(), "abort_multipart_upload")
            .run(&mut attempt)
            .await
        {
            Ok(response) => AbortMultipartUploadOutput {
                request_info: response.request_info(),
                already_gone: false,
            },
            Err(ParcelError::Server(e)) if e.is_not_found() => {
                info!(
                    "Upload {} not found while aborting, request id '{}'",
                    session.upload_id(),
                    e.request_id
                );
                AbortMultipartUploadOutput {
                    request_info: RequestInfo {
                        status_code: e.status,
                        request_id: e.request_id,
                        host_id: e.host_id,
                    },
                    already_gone: true,
                }
            }
            Err(e) => return Err(e),
        };

        session.terminate(SessionState::Aborted);
        Ok(output)
    }
}

fn or_else(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
