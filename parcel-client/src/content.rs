//! Part bodies and the reader that wraps them for one transfer attempt

use crate::limiter::RateLimiter;
use crate::progress::{DataTransferListener, DataTransferStatus, DataTransferType};
use parcel_core::{Crc64, ParcelError, Result};
use pin_project::pin_project;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};
use tokio::time::Sleep;

/// A byte source that can be repositioned
pub trait SeekableSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> SeekableSource for T {}

/// Caller-owned source of one part's bytes
///
/// The variant decides how failures are retried: a seekable body is rewound
/// to its starting position before every retry, a plain stream is not.
pub enum PartBody<'a> {
    Seekable(&'a mut dyn SeekableSource),
    Stream(&'a mut (dyn AsyncRead + Send + Unpin)),
}

impl<'a> PartBody<'a> {
    pub fn seekable(source: &'a mut dyn SeekableSource) -> Self {
        PartBody::Seekable(source)
    }

    pub fn stream(source: &'a mut (dyn AsyncRead + Send + Unpin)) -> Self {
        PartBody::Stream(source)
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, PartBody::Seekable(_))
    }

    /// Current position of a seekable body
    pub async fn position(&mut self) -> Result<Option<u64>> {
        match self {
            PartBody::Seekable(source) => Ok(Some(source.stream_position().await?)),
            PartBody::Stream(_) => Ok(None),
        }
    }

    /// Move a seekable body back to `position`; streams are left alone
    pub async fn rewind_to(&mut self, position: u64) -> Result<()> {
        if let PartBody::Seekable(source) = self {
            source.seek(SeekFrom::Start(position)).await?;
        }
        Ok(())
    }

    /// Number of bytes this part will carry
    ///
    /// A declared length wins. Otherwise a seekable body measures the bytes
    /// between its current position and its end, and leaves the position
    /// unchanged; a stream's length is unknown, which is an input error.
    pub async fn resolve_length(&mut self, declared: Option<u64>) -> Result<u64> {
        let length = match (declared, &mut *self) {
            (Some(length), _) => length,
            (None, PartBody::Seekable(source)) => {
                let current = source.stream_position().await?;
                let end = source.seek(SeekFrom::End(0)).await?;
                source.seek(SeekFrom::Start(current)).await?;
                end.saturating_sub(current)
            }
            (None, PartBody::Stream(_)) => {
                return Err(ParcelError::invalid_input(
                    "content length is required for a non-seekable part body",
                ))
            }
        };

        if length == 0 {
            return Err(ParcelError::invalid_input("part content length must be positive"));
        }
        Ok(length)
    }
}

impl AsyncRead for PartBody<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            PartBody::Seekable(source) => Pin::new(&mut **source).poll_read(cx, buf),
            PartBody::Stream(source) => Pin::new(&mut **source).poll_read(cx, buf),
        }
    }
}

/// Reader handed to the transport for one attempt
///
/// Reads at most `length` bytes from the inner source. Every read is
/// throttled by the rate limiter, reported to the listener, and folded into
/// the checksum, in that order. A source ending before `length` bytes fails
/// with [`io::ErrorKind::UnexpectedEof`].
#[pin_project]
pub struct WrappedContent<R> {
    #[pin]
    inner: R,
    total: u64,
    consumed: u64,
    crc: Option<Crc64>,
    listener: Option<Arc<dyn DataTransferListener>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    delay: Option<Pin<Box<Sleep>>>,
    allowance: u64,
    /// Holds reads capped below the caller's buffer size
    scratch: Vec<u8>,
    started: bool,
    finished: bool,
}

impl<R: AsyncRead> WrappedContent<R> {
    pub fn new(inner: R, length: u64) -> Self {
        WrappedContent {
            inner,
            total: length,
            consumed: 0,
            crc: None,
            listener: None,
            limiter: None,
            delay: None,
            allowance: 0,
            scratch: Vec::new(),
            started: false,
            finished: false,
        }
    }

    /// Accumulate a CRC-64 of the bytes read
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.crc = enabled.then(Crc64::new);
        self
    }

    pub fn with_listener(mut self, listener: Option<Arc<dyn DataTransferListener>>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Option<Arc<dyn RateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// CRC of the bytes read so far, when checksumming is enabled
    pub fn checksum(&self) -> Option<u64> {
        self.crc.as_ref().map(Crc64::value)
    }

    /// Report the attempt as failed unless it already finished
    pub fn report_failed(&mut self) {
        if !self.finished {
            self.finished = true;
            notify(&self.listener, self.consumed, self.total, 0, DataTransferType::Failed);
        }
    }
}

fn notify(
    listener: &Option<Arc<dyn DataTransferListener>>,
    consumed: u64,
    total: u64,
    once: u64,
    transfer_type: DataTransferType,
) {
    if let Some(listener) = listener {
        listener.on_transfer(&DataTransferStatus {
            consumed_bytes: consumed,
            total_bytes: total,
            rw_once_bytes: once,
            transfer_type,
        });
    }
}

impl<R: AsyncRead> AsyncRead for WrappedContent<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();

        let remaining = *this.total - *this.consumed;
        if remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if !*this.started {
            *this.started = true;
            notify(this.listener, 0, *this.total, 0, DataTransferType::Started);
        }

        let mut want = remaining.min(buf.remaining() as u64);
        if let Some(limiter) = this.limiter.as_ref() {
            while *this.allowance == 0 {
                if let Some(delay) = this.delay.as_mut() {
                    ready!(delay.as_mut().poll(cx));
                    *this.delay = None;
                }
                match limiter.acquire(want) {
                    Ok(granted) => *this.allowance = granted.clamp(1, want),
                    Err(wait) => *this.delay = Some(Box::pin(tokio::time::sleep(wait))),
                }
            }
            want = want.min(*this.allowance);
        }

        let filled_before = buf.filled().len();
        let direct = want as usize >= buf.remaining();
        let polled = if direct {
            this.inner
                .poll_read(cx, buf)
                .map_ok(|()| buf.filled().len() - filled_before)
        } else {
            this.scratch.resize(want as usize, 0);
            let mut limited = ReadBuf::new(&mut this.scratch[..]);
            this.inner
                .poll_read(cx, &mut limited)
                .map_ok(|()| limited.filled().len())
        };
        let n = match polled {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => {
                *this.finished = true;
                notify(this.listener, *this.consumed, *this.total, 0, DataTransferType::Failed);
                return Poll::Ready(Err(e));
            }
            Poll::Ready(Ok(n)) => n,
        };

        if n == 0 {
            *this.finished = true;
            notify(this.listener, *this.consumed, *this.total, 0, DataTransferType::Failed);
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "part body ended after {} of {} bytes",
                    this.consumed, this.total
                ),
            )));
        }

        if !direct {
            buf.put_slice(&this.scratch[..n]);
        }

        if let Some(crc) = this.crc.as_mut() {
            crc.update(&buf.filled()[filled_before..filled_before + n]);
        }
        if this.limiter.is_some() {
            *this.allowance -= n as u64;
        }
        *this.consumed += n as u64;
        notify(this.listener, *this.consumed, *this.total, n as u64, DataTransferType::Rw);

        if *this.consumed == *this.total {
            *this.finished = true;
            notify(this.listener, *this.consumed, *this.total, 0, DataTransferType::Succeed);
        }

        Poll::Ready(Ok(()))
    }
}
