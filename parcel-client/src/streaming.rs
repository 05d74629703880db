//! Streaming request bodies
//!
//! hyper needs an owned `'static` body while part sources are borrowed from
//! the caller. The reader is therefore pumped into a bounded channel on the
//! same task that awaits the response, and the body side of the channel is
//! what hyper polls.

use bytes::{Bytes, BytesMut};
use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, Stream};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Body type sent by the HTTP transport
pub(crate) type BoxBody = UnsyncBoxBody<Bytes, io::Error>;

/// Size of each chunk read from the source
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the source and the connection
const CHANNEL_DEPTH: usize = 4;

pub(crate) fn empty() -> BoxBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn full(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// Body fed by a [`BodyPump`]
///
/// The first poll signals demand, so nothing is read from the source before
/// the connection is ready to send it.
#[pin_project]
pub(crate) struct ChannelBody {
    #[pin]
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    demand: Option<oneshot::Sender<()>>,
    length: Option<u64>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.project();
        if let Some(demand) = this.demand.take() {
            let _ = demand.send(());
        }
        this.chunks
            .poll_next(cx)
            .map(|chunk| chunk.map(|result| result.map(Frame::data)))
    }

    fn size_hint(&self) -> SizeHint {
        match self.length {
            Some(length) => SizeHint::with_exact(length),
            None => SizeHint::default(),
        }
    }
}

/// Sending half of a [`ChannelBody`]
pub(crate) struct BodyPump {
    chunks: mpsc::Sender<io::Result<Bytes>>,
    demand: oneshot::Receiver<()>,
}

pub(crate) fn channel_body(length: Option<u64>) -> (BodyPump, BoxBody) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let (demand_tx, demand_rx) = oneshot::channel();
    let body = ChannelBody {
        chunks: rx,
        demand: Some(demand_tx),
        length,
    };
    (
        BodyPump {
            chunks: tx,
            demand: demand_rx,
        },
        body.boxed_unsync(),
    )
}

impl BodyPump {
    /// Copy `reader` into the body until it ends or the body is dropped
    ///
    /// Returns the number of bytes handed to the body. A read failure is
    /// forwarded to the body, which aborts the request, and returned.
    pub(crate) async fn run(
        mut self,
        reader: &mut (dyn AsyncRead + Send + Unpin + '_),
    ) -> io::Result<u64> {
        // The request ended before its body was wanted
        if self.demand.await.is_err() {
            return Ok(0);
        }

        let mut sent = 0u64;
        loop {
            let mut chunk = BytesMut::with_capacity(CHUNK_SIZE);
            let n = match reader.read_buf(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    let forwarded = io::Error::new(e.kind(), e.to_string());
                    let _ = self.chunks.send(Err(forwarded)).await;
                    return Err(e);
                }
            };
            if n == 0 {
                return Ok(sent);
            }
            if self.chunks.send(Ok(chunk.freeze())).await.is_err() {
                return Ok(sent);
            }
            sent += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_waits_for_demand() {
        let mut source: &[u8] = b"never read";
        let (pump, body) = channel_body(Some(10));
        drop(body);

        let sent = pump.run(&mut source).await.unwrap();
        assert_eq!(sent, 0);
        assert_eq!(source.len(), 10);
    }

    #[tokio::test]
    async fn test_pump_delivers_all_bytes() {
        let data = vec![9u8; CHUNK_SIZE * 2 + 17];
        let mut source: &[u8] = &data;
        let (pump, body) = channel_body(Some(data.len() as u64));

        let (sent, collected) = tokio::join!(pump.run(&mut source), body.collect());
        assert_eq!(sent.unwrap(), data.len() as u64);
        assert_eq!(collected.unwrap().to_bytes(), Bytes::from(data));
    }
}
