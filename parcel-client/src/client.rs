//! Main client implementation

use crate::config::ClientConfig;
use crate::retry::{Classifier, FnAttempt, Retryer};
use crate::transport::HttpTransport;
use parcel_core::{ParcelError, RequestInfo, Result, UploadSession};
use parcel_net::protocol::{expect, query};
use parcel_net::{
    decode_body, InitiateMultipartUploadResult, Method, Transport, TransportRequest,
    TransportResponse,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Multipart upload client
///
/// Cloning is cheap; clones share the transport and configuration, and every
/// operation may run concurrently with any other.
pub struct Client<T: Transport = HttpTransport> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    transport: T,
    config: ClientConfig,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Client {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<HttpTransport> {
    /// Create a client talking HTTP to `config.endpoint`
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> Client<T> {
    /// Create a client over any transport
    pub fn with_transport(transport: T, config: ClientConfig) -> Self {
        Client {
            inner: Arc::new(ClientInner { transport, config }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Send one request and require one of the `expected` statuses
    pub(crate) async fn round_trip<'r>(
        &'r self,
        request: TransportRequest<'r>,
        expected: &[u16],
    ) -> Result<TransportResponse> {
        let response = self.inner.transport.send(request).await?;
        if expected.contains(&response.status) {
            Ok(response)
        } else {
            Err(ParcelError::Server(response.server_error()))
        }
    }

    pub(crate) fn retryer<'a>(
        &'a self,
        classifier: Classifier,
        cancel: Option<&'a CancellationToken>,
        operation: &'static str,
    ) -> Retryer<'a> {
        Retryer::new(&self.inner.config.retry, classifier, operation).with_cancellation(cancel)
    }

    /// Start a multipart upload for `bucket`/`key`
    pub async fn create_multipart_upload(
        &self,
        input: CreateMultipartUploadInput,
    ) -> Result<CreateMultipartUploadOutput> {
        if input.bucket.is_empty() || input.key.is_empty() {
            return Err(ParcelError::invalid_input("bucket and key are required"));
        }

        let bucket = input.bucket.as_str();
        let key = input.key.as_str();
        let mut attempt = FnAttempt(move || {
            let request =
                TransportRequest::new(Method::POST, bucket, key).with_query(query::UPLOADS, "");
            self.round_trip(request, expect::CREATE)
        });
        let response = self
            .retryer(Classifier::ServerError, input.cancel.as_ref(), "create_multipart_upload")
            .run(&mut attempt)
            .await?;

        let request_info = response.request_info();
        let body: InitiateMultipartUploadResult =
            decode_body(&response.body, &request_info.request_id)?;
        if body.upload_id.is_empty() {
            return Err(ParcelError::InvalidResponse(format!(
                "no upload id in response, request id '{}'",
                request_info.request_id
            )));
        }

        info!("Created multipart upload {} for {}/{}", body.upload_id, bucket, key);
        Ok(CreateMultipartUploadOutput {
            session: UploadSession::new(bucket, key, body.upload_id),
            encoding_type: body.encoding_type,
            request_info,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateMultipartUploadInput {
    pub bucket: String,
    pub key: String,
    pub cancel: Option<CancellationToken>,
}

impl CreateMultipartUploadInput {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        CreateMultipartUploadInput {
            bucket: bucket.into(),
            key: key.into(),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMultipartUploadOutput {
    pub request_info: RequestInfo,
    #[serde(skip)]
    pub session: UploadSession,
    pub encoding_type: String,
}

impl CreateMultipartUploadOutput {
    pub fn upload_id(&self) -> &str {
        self.session.upload_id()
    }
}
