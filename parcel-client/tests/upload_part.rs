//! Part transfer behavior against a scripted transport

use parcel_client::testing::*;
use parcel_client::*;
use parcel_core::test_utils::TestDataGenerator;
use parcel_core::{crc64, TransportError};
use parcel_net::protocol::{headers, query};
use parcel_net::{Method, TransportResponse};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

fn session() -> UploadSession {
    UploadSession::new("photos", "2024/cat.jpg", "upload-1")
}

/// Reader that yields some bytes, then fails
struct FailingReader {
    good: usize,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.good == 0 {
            return Poll::Ready(Err(io::Error::other("disk read failed")));
        }
        let n = self.good.min(buf.remaining());
        buf.put_slice(&vec![1u8; n]);
        self.good -= n;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn part_result_surfaces_server_etag_and_checksum() {
    let transport = MockTransport::new().respond(
        part_response("\"abc123\"", "req-1").with_header(headers::HASH_CRC64ECMA, "9876543210"),
    );
    let client = mock_client(transport, test_config().with_crc(false));
    let session = session();

    let data = TestDataGenerator::patterned_bytes(1024);
    let mut source = Cursor::new(data.clone());
    let output = client
        .upload_part(
            UploadPartInput::new(&session, 3, PartBody::seekable(&mut source))
                .with_content_length(1024),
        )
        .await
        .unwrap();

    assert_eq!(output.part_number, 3);
    assert_eq!(output.etag, "\"abc123\"");
    assert_eq!(output.hash_crc64ecma, Some(9_876_543_210));
    assert_eq!(output.request_info.request_id, "req-1");
    assert_eq!(output.to_uploaded_part(), UploadedPart::new(3, "\"abc123\""));

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::PUT);
    assert_eq!(request.bucket, "photos");
    assert_eq!(request.key, "2024/cat.jpg");
    assert_eq!(request.query_value(query::PART_NUMBER), Some("3"));
    assert_eq!(request.query_value(query::UPLOAD_ID), Some("upload-1"));
    assert_eq!(request.content_length, Some(1024));
    assert_eq!(request.body, data);
}

#[tokio::test]
async fn matching_checksum_is_accepted() {
    let transport = MockTransport::new().respond_echoing_crc(part_response("\"e\"", "req-1"));
    let client = mock_client(transport, test_config());
    let session = session();

    let data = TestDataGenerator::random_bytes(10_000);
    let mut source = Cursor::new(data.clone());
    let output = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap();

    assert_eq!(output.hash_crc64ecma, Some(crc64(&data)));
}

#[tokio::test]
async fn checksum_mismatch_is_an_integrity_error_and_not_retried() {
    let transport = MockTransport::new()
        .respond(part_response("\"e\"", "req-bad").with_header(headers::HASH_CRC64ECMA, "12345"))
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(TestDataGenerator::patterned_bytes(512));
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(err.request_id(), Some("req-bad"));
    match err {
        ParcelError::ChecksumMismatch { part_number, server, .. } => {
            assert_eq!(part_number, 1);
            assert_eq!(server, 12345);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.transport().request_count(), 1);
}

#[tokio::test]
async fn missing_checksum_header_skips_verification() {
    let transport = MockTransport::new().respond(part_response("\"e\"", "req-1"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(vec![5u8; 64]);
    let output = client
        .upload_part(UploadPartInput::new(&session, 2, PartBody::seekable(&mut source)))
        .await
        .unwrap();
    assert_eq!(output.hash_crc64ecma, None);
}

#[tokio::test]
async fn unparseable_checksum_header_is_invalid_response() {
    let response =
        part_response("\"e\"", "req-1").with_header(headers::HASH_CRC64ECMA, "not-a-number");
    let transport = MockTransport::new().respond(response);
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(vec![5u8; 64]);
    let err = client
        .upload_part(UploadPartInput::new(&session, 2, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();
    assert!(matches!(err, ParcelError::InvalidResponse(_)));
}

#[tokio::test]
async fn seekable_body_is_rewound_and_fully_resent_after_mid_stream_failure() {
    let transport = MockTransport::new()
        .fail_mid_stream(3000)
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let data = TestDataGenerator::random_bytes(100_000);
    let mut source = Cursor::new(data.clone());
    let output = client
        .upload_part(UploadPartInput::new(&session, 4, PartBody::seekable(&mut source)))
        .await
        .unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body.len(), 3000);
    assert_eq!(requests[1].body, data);
    assert_eq!(output.hash_crc64ecma, Some(crc64(&data)));
}

#[tokio::test]
async fn seekable_body_starting_mid_source_is_rewound_to_its_start() {
    let transport = MockTransport::new()
        .respond(error_response(503, "ServiceUnavailable", "req-1"))
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let data = TestDataGenerator::patterned_bytes(4000);
    let mut source = Cursor::new(data.clone());
    source.set_position(1000);
    client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::seekable(&mut source))
                .with_content_length(2000),
        )
        .await
        .unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, &data[1000..3000]);
    assert_eq!(requests[1].body, &data[1000..3000]);
}

#[tokio::test]
async fn seekable_body_retries_timeouts() {
    let transport = MockTransport::new()
        .time_out()
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(vec![1u8; 256]);
    client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap();
    assert_eq!(client.transport().request_count(), 2);
}

#[tokio::test]
async fn stream_body_is_retried_after_connect_failure() {
    let transport = MockTransport::new()
        .fail_connect()
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let data = TestDataGenerator::patterned_bytes(2048);
    let mut stream: &[u8] = &data;
    let output = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::stream(&mut stream))
                .with_content_length(2048),
        )
        .await
        .unwrap();

    let requests = client.transport().requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body, data);
    assert_eq!(output.hash_crc64ecma, Some(crc64(&data)));
}

#[tokio::test]
async fn stream_body_is_not_retried_on_interrupted_connection() {
    let transport = MockTransport::new()
        .fail_mid_stream(100)
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let data = TestDataGenerator::patterned_bytes(2048);
    let mut stream: &[u8] = &data;
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::stream(&mut stream))
                .with_content_length(2048),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ParcelError::Transport(TransportError::Interrupted(_))));
    assert_eq!(client.transport().request_count(), 1);
}

#[tokio::test]
async fn stream_body_is_not_replayed_after_server_fault_once_consumed() {
    let transport = MockTransport::new()
        .respond(error_response(503, "ServiceUnavailable", "req-1"))
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut stream: &[u8] = &[9u8; 300];
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::stream(&mut stream))
                .with_content_length(300),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(503));
    assert_eq!(client.transport().request_count(), 1);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let transport = MockTransport::new()
        .respond(error_response(403, "AccessDenied", "req-1"))
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.server_error().map(|e| e.code.as_str()), Some("AccessDenied"));
    assert_eq!(client.transport().request_count(), 1);
}

#[tokio::test]
async fn persistent_server_faults_exhaust_the_attempt_budget() {
    let mut transport = MockTransport::new();
    for i in 0..4 {
        transport = transport.respond(error_response(500, "InternalError", &format!("req-{}", i)));
    }
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();

    assert!(matches!(err, ParcelError::RetryExhausted { attempts: 4, .. }));
    assert_eq!(err.request_id(), Some("req-3"));
    assert_eq!(client.transport().request_count(), 4);
}

#[tokio::test]
async fn invalid_input_fails_before_any_request() {
    let client = mock_client(MockTransport::new(), test_config());
    let session = session();

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(UploadPartInput::new(&session, 0, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientInput);

    let mut empty = Cursor::new(Vec::<u8>::new());
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut empty)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientInput);

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::seekable(&mut source))
                .with_content_length(0),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientInput);

    let mut stream: &[u8] = b"unknown length";
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::stream(&mut stream)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientInput);

    let no_id = UploadSession::new("photos", "cat.jpg", "");
    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(UploadPartInput::new(&no_id, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientInput);

    assert_eq!(client.transport().request_count(), 0);
}

#[tokio::test]
async fn terminated_session_rejects_parts() {
    let client = mock_client(MockTransport::new(), test_config());
    let session = session();
    session.terminate(SessionState::Aborted);

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientInput);
    assert_eq!(client.transport().request_count(), 0);
}

#[tokio::test]
async fn source_read_failure_is_local_and_not_retried() {
    let transport = MockTransport::new()
        .respond_echoing_crc(part_response("\"e\"", "req-1"))
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut reader = FailingReader { good: 100 };
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::stream(&mut reader))
                .with_content_length(500),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Local);
    assert_eq!(client.transport().request_count(), 1);
}

#[tokio::test]
async fn short_stream_fails_with_unexpected_eof() {
    let transport = MockTransport::new().respond_echoing_crc(part_response("\"e\"", "req-1"));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut stream: &[u8] = &[1u8; 50];
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::stream(&mut stream))
                .with_content_length(100),
        )
        .await
        .unwrap_err();

    match err {
        ParcelError::Transport(TransportError::Body(e)) => {
            assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancelled_token_prevents_any_attempt() {
    let client = mock_client(MockTransport::new(), test_config());
    let session = session();
    let token = CancellationToken::new();
    token.cancel();

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::seekable(&mut source))
                .with_cancellation(token),
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(client.transport().request_count(), 0);
}

#[tokio::test]
async fn cancellation_interrupts_a_hanging_attempt() {
    let transport = MockTransport::new()
        .hang()
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();
    let token = CancellationToken::new();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::seekable(&mut source))
                .with_cancellation(token),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(client.transport().request_count(), 1);
}

#[tokio::test]
async fn progress_restarts_with_each_attempt() {
    let transport = MockTransport::new()
        .fail_mid_stream(10)
        .respond_echoing_crc(part_response("\"e\"", "req-2"));
    let client = mock_client(transport, test_config());
    let session = session();
    let listener = Arc::new(RecordingListener::default());

    let mut source = Cursor::new(vec![1u8; 40]);
    client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::seekable(&mut source))
                .with_listener(listener.clone()),
        )
        .await
        .unwrap();

    let kinds: Vec<DataTransferType> = listener
        .events()
        .iter()
        .filter(|e| e.transfer_type != DataTransferType::Rw)
        .map(|e| e.transfer_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            DataTransferType::Started,
            DataTransferType::Failed,
            DataTransferType::Started,
            DataTransferType::Succeed
        ]
    );
    let last = listener.events().last().copied().unwrap();
    assert_eq!(last.consumed_bytes, 40);
    assert_eq!(last.total_bytes, 40);
}

#[tokio::test]
async fn rate_limited_part_still_arrives_intact() {
    let transport = MockTransport::new().respond_echoing_crc(part_response("\"e\"", "req-1"));
    let client = mock_client(transport, test_config());
    let session = session();
    let limiter = Arc::new(TokenBucketRateLimiter::new(4 * 1024 * 1024, 4096).unwrap());

    let data = TestDataGenerator::random_bytes(64 * 1024);
    let mut source = Cursor::new(data.clone());
    let output = client
        .upload_part(
            UploadPartInput::new(&session, 1, PartBody::seekable(&mut source))
                .with_rate_limiter(limiter),
        )
        .await
        .unwrap();

    assert_eq!(output.hash_crc64ecma, Some(crc64(&data)));
    assert_eq!(client.transport().requests()[0].body, data);
}

#[tokio::test]
async fn concurrent_parts_share_one_client() {
    let mut transport = MockTransport::new();
    for i in 0..4 {
        transport = transport.respond_echoing_crc(part_response(&format!("\"e{}\"", i), "req"));
    }
    let client = mock_client(transport, test_config());
    let session = session();

    let data = TestDataGenerator::patterned_bytes(4000);
    let parts = TestDataGenerator::split_parts(&data, 1000);

    let uploads = parts.into_iter().map(|(number, bytes)| {
        let client = client.clone();
        let session = session.clone();
        async move {
            let mut source = Cursor::new(bytes);
            client
                .upload_part(
                    UploadPartInput::new(&session, number, PartBody::seekable(&mut source)),
                )
                .await
        }
    });
    let outputs = futures::future::join_all(uploads).await;

    assert!(outputs.iter().all(|o| o.is_ok()));
    assert_eq!(client.transport().request_count(), 4);
}

#[tokio::test]
async fn upload_part_from_file_sends_the_requested_range() {
    use std::io::Write;

    let data = TestDataGenerator::patterned_bytes(10_000);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let transport = MockTransport::new()
        .fail_mid_stream(500)
        .respond_echoing_crc(part_response("\"file\"", "req-2"));
    let client = mock_client(transport, test_config());

    let output = client
        .upload_part_from_file(
            UploadPartFromFileInput::new(session(), 2, file.path())
                .with_range(3000, 4000),
        )
        .await
        .unwrap();

    assert_eq!(output.etag, "\"file\"");
    assert_eq!(output.hash_crc64ecma, Some(crc64(&data[3000..7000])));
    let requests = client.transport().requests();
    assert_eq!(requests[1].body, &data[3000..7000]);
    assert_eq!(requests[1].content_length, Some(4000));
}

#[tokio::test]
async fn upload_part_from_file_rejects_ranges_past_the_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &[0u8; 100]).unwrap();

    let client = mock_client(MockTransport::new(), test_config());
    let err = client
        .upload_part_from_file(
            UploadPartFromFileInput::new(session(), 1, file.path())
                .with_range(50, 100),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClientInput);
    assert_eq!(client.transport().request_count(), 0);
}

#[tokio::test]
async fn empty_etag_is_an_invalid_response() {
    let transport = MockTransport::new().respond(TransportResponse::new(200));
    let client = mock_client(transport, test_config());
    let session = session();

    let mut source = Cursor::new(vec![1u8; 16]);
    let err = client
        .upload_part(UploadPartInput::new(&session, 1, PartBody::seekable(&mut source)))
        .await
        .unwrap_err();
    assert!(matches!(err, ParcelError::InvalidResponse(_)));
}
