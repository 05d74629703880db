//! HTTP/1 transport over hyper

use crate::config::ClientConfig;
use crate::streaming::{self, BoxBody};
use http_body_util::BodyExt;
use hyper::header::{CONTENT_LENGTH, USER_AGENT};
use hyper::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use parcel_core::{ParcelError, Result, TransportError};
use parcel_net::{object_path, RequestBody, Transport, TransportRequest, TransportResponse};
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// [`Transport`] speaking plain HTTP/1.1 to a path-style endpoint
///
/// Requests go to `{endpoint}/{bucket}/{key}?{query}`. TLS is not handled
/// here; put a TLS-terminating proxy in front or supply another transport.
pub struct HttpTransport {
    client: HyperClient<HttpConnector, BoxBody>,
    endpoint: String,
    request_timeout: Duration,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let endpoint = normalize_endpoint(&config.endpoint)?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_nodelay(true);

        let client = HyperClient::builder(TokioExecutor::new()).build(connector);

        Ok(HttpTransport {
            client,
            endpoint,
            request_timeout: config.request_timeout,
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(
        &self,
        request: hyper::Request<BoxBody>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let response = self.client.request(request).await.map_err(classify)?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| TransportError::Interrupted(format!("reading response body: {}", e)))?
            .to_bytes();
        Ok(TransportResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
        })
    }

    /// Exchange one request, streaming its body from `request.body`
    async fn exchange(
        &self,
        request: TransportRequest<'_>,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let uri = format!(
            "{}{}",
            self.endpoint,
            object_path(request.bucket, request.key, &request.query)
        );
        debug!("{} {}", request.method, uri);

        let mut builder = hyper::Request::builder()
            .method(request.method.clone())
            .uri(uri)
            .header(USER_AGENT, self.user_agent.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(length) = request.content_length {
            builder = builder.header(CONTENT_LENGTH, length.to_string());
        }

        let build = |builder: hyper::http::request::Builder, body: BoxBody| {
            builder
                .body(body)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))
        };

        match request.body {
            RequestBody::Empty => self.execute(build(builder, streaming::empty())?).await,
            RequestBody::Full(bytes) => {
                self.execute(build(builder, streaming::full(bytes))?).await
            }
            RequestBody::Stream(reader) => {
                let (pump, body) = streaming::channel_body(request.content_length);
                let http_request = build(builder, body)?;
                let (response, pumped) =
                    tokio::join!(self.execute(http_request), pump.run(reader));
                match pumped {
                    Err(e) => Err(TransportError::Body(e)),
                    Ok(_) => response,
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    /// The request timeout covers the whole exchange, body upload included
    fn send<'a>(
        &'a self,
        request: TransportRequest<'a>,
    ) -> impl Future<Output = std::result::Result<TransportResponse, TransportError>> + Send + 'a
    {
        async move {
            tokio::time::timeout(self.request_timeout, self.exchange(request))
                .await
                .map_err(|_| TransportError::Timeout(self.request_timeout))?
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return Err(ParcelError::invalid_input("endpoint is empty"));
    }

    let with_scheme = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let uri: Uri = with_scheme
        .parse()
        .map_err(|e| ParcelError::InvalidInput(format!("invalid endpoint '{}': {}", endpoint, e)))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => {
            return Err(ParcelError::InvalidInput(format!(
                "unsupported endpoint scheme '{}'",
                other
            )))
        }
        None => return Err(ParcelError::invalid_input("endpoint has no scheme")),
    }
    if uri.authority().is_none() {
        return Err(ParcelError::invalid_input("endpoint has no host"));
    }

    Ok(with_scheme)
}

/// Map a hyper client failure onto the transport taxonomy
fn classify(err: hyper_util::client::legacy::Error) -> TransportError {
    let detail = error_chain(&err);
    if err.is_connect() {
        TransportError::Connect(detail)
    } else {
        TransportError::Interrupted(detail)
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
