//! Listing of uploaded parts and of in-progress uploads

use crate::client::Client;
use crate::retry::{Classifier, FnAttempt};
use futures::stream::{self, Stream};
use parcel_core::{ParcelError, RequestInfo, Result, UploadSession};
use parcel_net::protocol::{expect, query};
use parcel_net::{
    decode_body, ListMultipartUploadsResult, ListPartsResult, ListedPart, ListedUpload, Method,
    Transport, TransportRequest,
};
use serde::Serialize;
use std::collections::VecDeque;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ListPartsInput<'a> {
    pub session: &'a UploadSession,
    pub max_parts: Option<u32>,
    /// List parts after this part number
    pub part_number_marker: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl<'a> ListPartsInput<'a> {
    pub fn new(session: &'a UploadSession) -> Self {
        ListPartsInput {
            session,
            max_parts: None,
            part_number_marker: None,
            cancel: None,
        }
    }

    pub fn with_max_parts(mut self, max_parts: u32) -> Self {
        self.max_parts = Some(max_parts);
        self
    }

    pub fn with_marker(mut self, part_number_marker: u32) -> Self {
        self.part_number_marker = Some(part_number_marker);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListPartsOutput {
    pub request_info: RequestInfo,
    #[serde(flatten)]
    pub result: ListPartsResult,
}

#[derive(Debug, Clone, Default)]
pub struct ListMultipartUploadsInput {
    pub bucket: String,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
    pub max_uploads: Option<u32>,
    pub encoding_type: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl ListMultipartUploadsInput {
    pub fn new(bucket: impl Into<String>) -> Self {
        ListMultipartUploadsInput {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_max_uploads(mut self, max_uploads: u32) -> Self {
        self.max_uploads = Some(max_uploads);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListMultipartUploadsOutput {
    pub request_info: RequestInfo,
    #[serde(flatten)]
    pub result: ListMultipartUploadsResult,
}

impl ListMultipartUploadsOutput {
    /// Sessions for the listed uploads, ready for part upload or abort
    pub fn sessions(&self) -> Vec<UploadSession> {
        self.result
            .uploads
            .iter()
            .map(|u| {
                let bucket = self.result.bucket.clone();
                UploadSession::resume(bucket, u.key.clone(), u.upload_id.clone())
            })
            .collect()
    }
}

impl<T: Transport> Client<T> {
    /// One page of the parts uploaded so far
    pub async fn list_parts(&self, input: ListPartsInput<'_>) -> Result<ListPartsOutput> {
        let session = input.session;
        session.ensure_active()?;

        let max_parts = input.max_parts;
        let marker = input.part_number_marker;
        let mut attempt = FnAttempt(move || {
            let request = TransportRequest::new(Method::GET, session.bucket(), session.key())
                .with_query(query::UPLOAD_ID, session.upload_id())
                .with_optional_query(query::MAX_PARTS, max_parts)
                .with_optional_query(query::PART_NUMBER_MARKER, marker);
            self.round_trip(request, expect::LIST)
        });
        let response = self
            .retryer(Classifier::ServerError, input.cancel.as_ref(), "list_parts")
            .run(&mut attempt)
            .await?;

        let request_info = response.request_info();
        let result = decode_body(&response.body, &request_info.request_id)?;
        Ok(ListPartsOutput {
            request_info,
            result,
        })
    }

    /// Every uploaded part, following pagination to the end
    pub async fn list_all_parts(
        &self,
        session: &UploadSession,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<ListedPart>> {
        let mut parts = Vec::new();
        let mut marker = None;

        loop {
            let mut input = ListPartsInput::new(session);
            input.part_number_marker = marker;
            input.cancel = cancel.clone();

            let page = self.list_parts(input).await?.result;
            debug!(
                "Listed {} parts of {} after marker {:?}",
                page.parts.len(),
                session.upload_id(),
                marker
            );
            parts.extend(page.parts);

            if !page.is_truncated {
                return Ok(parts);
            }
            if page.next_part_number_marker == 0 || Some(page.next_part_number_marker) == marker {
                return Err(ParcelError::InvalidResponse(format!(
                    "truncated part listing of '{}' did not advance its marker",
                    session.upload_id()
                )));
            }
            marker = Some(page.next_part_number_marker);
        }
    }

    /// One page of uploads that were created but neither completed nor aborted
    pub async fn list_multipart_uploads(
        &self,
        input: ListMultipartUploadsInput,
    ) -> Result<ListMultipartUploadsOutput> {
        if input.bucket.is_empty() {
            return Err(ParcelError::invalid_input("bucket is required"));
        }

        let bucket = input.bucket.as_str();
        let mut attempt = FnAttempt(|| {
            let request = TransportRequest::new(Method::GET, bucket, "")
                .with_query(query::UPLOADS, "")
                .with_optional_query(query::PREFIX, input.prefix.as_deref())
                .with_optional_query(query::DELIMITER, input.delimiter.as_deref())
                .with_optional_query(query::KEY_MARKER, input.key_marker.as_deref())
                .with_optional_query(query::UPLOAD_ID_MARKER, input.upload_id_marker.as_deref())
                .with_optional_query(query::MAX_UPLOADS, input.max_uploads)
                .with_optional_query(query::ENCODING_TYPE, input.encoding_type.as_deref());
            self.round_trip(request, expect::LIST)
        });
        let response = self
            .retryer(Classifier::ServerError, input.cancel.as_ref(), "list_multipart_uploads")
            .run(&mut attempt)
            .await?;

        let request_info = response.request_info();
        let mut result: ListMultipartUploadsResult =
            decode_body(&response.body, &request_info.request_id)?;
        if result.bucket.is_empty() {
            result.bucket = input.bucket.clone();
        }
        Ok(ListMultipartUploadsOutput {
            request_info,
            result,
        })
    }

    /// Every in-progress upload matching `input`, fetched page by page as
    /// the stream is polled
    pub fn multipart_uploads_stream(
        &self,
        input: ListMultipartUploadsInput,
    ) -> impl Stream<Item = Result<ListedUpload>> + Send + '_ {
        struct Cursor {
            input: ListMultipartUploadsInput,
            pending: VecDeque<ListedUpload>,
            exhausted: bool,
            stalled: bool,
        }

        let cursor = Cursor {
            input,
            pending: VecDeque::new(),
            exhausted: false,
            stalled: false,
        };

        stream::try_unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(upload) = cursor.pending.pop_front() {
                    return Ok(Some((upload, cursor)));
                }
                if cursor.stalled {
                    return Err(ParcelError::InvalidResponse(format!(
                        "truncated upload listing of '{}' did not advance its markers",
                        cursor.input.bucket
                    )));
                }
                if cursor.exhausted {
                    return Ok(None);
                }

                let page = self.list_multipart_uploads(cursor.input.clone()).await?.result;
                cursor.pending.extend(page.uploads);
                cursor.exhausted = !page.is_truncated;

                if page.is_truncated {
                    let key_marker = Some(page.next_key_marker);
                    let upload_id_marker = Some(page.next_upload_id_marker);
                    let no_markers = key_marker.as_deref() == Some("")
                        && upload_id_marker.as_deref() == Some("");
                    if no_markers
                        || (key_marker == cursor.input.key_marker
                            && upload_id_marker == cursor.input.upload_id_marker)
                    {
                        warn!("Truncated upload listing did not advance; stopping");
                        cursor.stalled = true;
                    }
                    cursor.input.key_marker = key_marker;
                    cursor.input.upload_id_marker = upload_id_marker;
                }
            }
        })
    }
}
