//! Scripted in-memory transport for tests

use crate::client::Client;
use crate::config::ClientConfig;
use crate::progress::{DataTransferListener, DataTransferStatus};
use crate::retry::RetryPolicy;
use parcel_core::{crc64, TransportError};
use parcel_net::protocol::headers;
use parcel_net::{Method, RequestBody, Transport, TransportRequest, TransportResponse};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// What the mock does with the next request
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Read the whole body, then answer; with `echo_crc` the answer carries
    /// the CRC-64 of the bytes actually received
    Respond {
        response: TransportResponse,
        echo_crc: bool,
    },
    /// Fail as if the connection could not be opened; the body is untouched
    FailConnect,
    /// Read `after` bytes of the body, then drop the connection
    FailMidStream { after: usize },
    /// Read the whole body, then time out waiting for the answer
    TimeOut,
    /// Never answer
    Hang,
}

/// A request as the mock saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub bucket: String,
    pub key: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport answering from a script, one behavior per request
///
/// Requests beyond the end of the script fail with
/// [`TransportError::InvalidRequest`].
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockBehavior>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, behavior: MockBehavior) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(behavior);
        self
    }

    pub fn respond(self, response: TransportResponse) -> Self {
        self.then(MockBehavior::Respond {
            response,
            echo_crc: false,
        })
    }

    pub fn respond_echoing_crc(self, response: TransportResponse) -> Self {
        self.then(MockBehavior::Respond {
            response,
            echo_crc: true,
        })
    }

    pub fn fail_connect(self) -> Self {
        self.then(MockBehavior::FailConnect)
    }

    pub fn fail_mid_stream(self, after: usize) -> Self {
        self.then(MockBehavior::FailMidStream { after })
    }

    pub fn time_out(self) -> Self {
        self.then(MockBehavior::TimeOut)
    }

    pub fn hang(self) -> Self {
        self.then(MockBehavior::Hang)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn next_behavior(&self) -> Option<MockBehavior> {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn record(&self, request: RecordedRequest) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
    }
}

async fn read_body(
    body: RequestBody<'_>,
    limit: Option<usize>,
) -> Result<Vec<u8>, TransportError> {
    let mut received = Vec::new();
    match body {
        RequestBody::Empty => {}
        RequestBody::Full(bytes) => {
            let end = limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
            received.extend_from_slice(&bytes[..end]);
        }
        RequestBody::Stream(reader) => {
            let result = match limit {
                Some(limit) => reader.take(limit as u64).read_to_end(&mut received).await,
                None => reader.read_to_end(&mut received).await,
            };
            result.map_err(TransportError::Body)?;
        }
    }
    Ok(received)
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        request: TransportRequest<'a>,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send + 'a {
        async move {
            let behavior = self.next_behavior();
            let mut recorded = RecordedRequest {
                method: request.method.clone(),
                bucket: request.bucket.to_string(),
                key: request.key.to_string(),
                query: request
                    .query
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.clone()))
                    .collect(),
                headers: request
                    .headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.clone()))
                    .collect(),
                content_length: request.content_length,
                body: Vec::new(),
            };

            let behavior = match behavior {
                Some(behavior) => behavior,
                None => {
                    self.record(recorded);
                    return Err(TransportError::InvalidRequest(
                        "mock transport script exhausted".to_string(),
                    ));
                }
            };

            match behavior {
                MockBehavior::FailConnect => {
                    self.record(recorded);
                    Err(TransportError::Connect("connection refused".to_string()))
                }
                MockBehavior::FailMidStream { after } => {
                    let read = read_body(request.body, Some(after)).await;
                    recorded.body = read.unwrap_or_default();
                    self.record(recorded);
                    Err(TransportError::Interrupted("connection reset by peer".to_string()))
                }
                MockBehavior::TimeOut => {
                    let read = read_body(request.body, None).await;
                    recorded.body = read.unwrap_or_default();
                    self.record(recorded);
                    Err(TransportError::Timeout(Duration::from_secs(1)))
                }
                MockBehavior::Hang => {
                    self.record(recorded);
                    std::future::pending().await
                }
                MockBehavior::Respond { response, echo_crc } => {
                    let read = read_body(request.body, None).await;
                    let body = match read {
                        Ok(body) => body,
                        Err(e) => {
                            self.record(recorded);
                            return Err(e);
                        }
                    };
                    let response = if echo_crc {
                        response.with_header(headers::HASH_CRC64ECMA, &crc64(&body).to_string())
                    } else {
                        response
                    };
                    recorded.body = body;
                    self.record(recorded);
                    Ok(response)
                }
            }
        }
    }
}

/// Listener keeping every event it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<DataTransferStatus>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<DataTransferStatus> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DataTransferListener for RecordingListener {
    fn on_transfer(&self, status: &DataTransferStatus) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*status);
    }
}

/// Successful part upload answer
pub fn part_response(etag: &str, request_id: &str) -> TransportResponse {
    TransportResponse::new(200)
        .with_header(headers::ETAG, etag)
        .with_header(headers::REQUEST_ID, request_id)
}

/// Error answer with a service error document
pub fn error_response(status: u16, code: &str, request_id: &str) -> TransportResponse {
    TransportResponse::new(status)
        .with_header(headers::REQUEST_ID, request_id)
        .with_body(format!(
            r#"{{"Code":"{}","Message":"{}","RequestId":"{}"}}"#,
            code, code, request_id
        ))
}

/// Configuration with fast, deterministic retries
pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://mock.invalid").with_retry(
        RetryPolicy::exponential(4)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(false),
    )
}

/// Client over a scripted transport
pub fn mock_client(transport: MockTransport, config: ClientConfig) -> Client<MockTransport> {
    Client::with_transport(transport, config)
}
