//! Seekable streaming reader over a registry blob
//!
//! Reads are served from one ranged `GET` at a time. Seeking drops the open
//! response; the next read issues a new request starting at the new offset.
//! The reader implements [`AsyncRead`] and [`AsyncSeek`], observing the token
//! it was opened with, so it composes with `tokio::io::copy` and `BufReader`.

use crate::error::handlers::{ResponseErrorHandler, Subject};
use crate::error::{RegistryError, Result};
use crate::image::Descriptor;
use crate::registry::repository::Repository;
use crate::registry::transport::cancellable;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use reqwest::header::RANGE;
use reqwest::{Method, Response, StatusCode};
use std::future::poll_fn;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use url::Url;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

type BodyStream = BoxStream<'static, Result<Bytes>>;

enum State {
    Idle,
    /// Ranged request in flight; yields the body and the bytes to discard
    Opening(BoxFuture<'static, Result<(BodyStream, u64)>>),
    Streaming(BodyStream),
}

pub struct BlobReader {
    repo: Repository,
    url: Url,
    descriptor: Descriptor,
    offset: u64,
    state: State,
    pending: Bytes,
    /// Bytes still to discard when a registry ignored our Range header
    skip: u64,
    closed: bool,
    cancel: CancellationToken,
}

impl BlobReader {
    pub fn new(repo: Repository, url: Url, descriptor: Descriptor, cancel: CancellationToken) -> Self {
        Self {
            repo,
            url,
            descriptor,
            offset: 0,
            state: State::Idle,
            pending: Bytes::new(),
            skip: 0,
            closed: false,
            cancel,
        }
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn position(&self) -> u64 {
        self.offset
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the underlying connection. Further reads fail.
    pub fn close(&mut self) {
        self.reset();
        self.closed = true;
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.pending = Bytes::new();
        self.skip = 0;
    }

    /// Move the read position; seeking past the end is allowed and reads as EOF
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.closed {
            return Err(RegistryError::Io("seek on closed blob reader".to_string()));
        }
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.descriptor.size.checked_add_signed(delta),
        }
        .ok_or_else(|| RegistryError::Io("invalid seek to a negative or overflowing position".to_string()))?;

        if target != self.offset {
            self.reset();
            self.offset = target;
        }
        Ok(target)
    }

    fn open_range(&self) -> BoxFuture<'static, Result<(BodyStream, u64)>> {
        let repo = self.repo.clone();
        let url = self.url.clone();
        let digest = self.descriptor.digest.clone();
        let offset = self.offset;
        let cancel = self.cancel.clone();

        async move {
            let mut request = repo.request(Method::GET, url);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={}-", offset));
            }
            let response = repo.send(request, "blob read", &cancel).await?;

            let skip = match response.status() {
                StatusCode::PARTIAL_CONTENT => 0,
                StatusCode::OK => offset,
                _ => {
                    return Err(ResponseErrorHandler::from_response(
                        response,
                        Subject::Blob {
                            repository: repo.name(),
                            digest: &digest,
                        },
                    )
                    .await);
                }
            };
            Ok((body_stream(response, cancel), skip))
        }
        .boxed()
    }

    /// Drive the transfer until bytes are buffered; `Ok(false)` means end of blob
    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<Result<bool>> {
        if self.closed {
            return Poll::Ready(Err(RegistryError::Io("read on closed blob reader".to_string())));
        }

        loop {
            if !self.pending.is_empty() {
                return Poll::Ready(Ok(true));
            }
            if self.offset >= self.descriptor.size {
                return Poll::Ready(Ok(false));
            }

            match &mut self.state {
                State::Idle => self.state = State::Opening(self.open_range()),
                State::Opening(opening) => match ready!(opening.poll_unpin(cx)) {
                    Ok((stream, skip)) => {
                        self.skip = skip;
                        self.state = State::Streaming(stream);
                    }
                    Err(err) => {
                        self.state = State::Idle;
                        return Poll::Ready(Err(err));
                    }
                },
                State::Streaming(stream) => match ready!(stream.poll_next_unpin(cx)) {
                    Some(Ok(mut chunk)) => {
                        if self.skip > 0 {
                            let dropped = self.skip.min(chunk.len() as u64) as usize;
                            let _ = chunk.split_to(dropped);
                            self.skip -= dropped as u64;
                        }
                        self.pending = chunk;
                    }
                    Some(Err(err)) => {
                        self.reset();
                        return Poll::Ready(Err(err));
                    }
                    None => {
                        self.reset();
                        return Poll::Ready(Err(RegistryError::Network(format!(
                            "Blob {} ended at byte {} of {}",
                            self.descriptor.digest, self.offset, self.descriptor.size
                        ))));
                    }
                },
            }
        }
    }

    /// Hand out up to `len` buffered bytes and advance the position
    fn take(&mut self, len: usize) -> Bytes {
        let n = len.min(self.pending.len());
        self.offset += n as u64;
        self.pending.split_to(n)
    }

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of blob
    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        if self.closed {
            return Err(RegistryError::Io("read on closed blob reader".to_string()));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if !cancellable(cancel, poll_fn(|cx| self.poll_fill(cx))).await? {
            return Ok(0);
        }
        let chunk = self.take(buf.len());
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Read everything from the current position
    pub async fn read_to_end(&mut self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let remaining = self.descriptor.size.saturating_sub(self.offset);
        let mut out = Vec::with_capacity(remaining.min(COPY_BUFFER_SIZE as u64 * 16) as usize);
        self.copy_to(&mut out, cancel).await?;
        Ok(out)
    }

    /// Copy from the current position to EOF into `writer`, returning bytes copied
    pub async fn copy_to<W>(&mut self, writer: &mut W, cancel: &CancellationToken) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = self.read(&mut buf, cancel).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            copied += n as u64;
        }
        writer.flush().await?;
        Ok(copied)
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        match ready!(this.poll_fill(cx)) {
            Ok(true) => {
                let chunk = this.take(buf.remaining());
                buf.put_slice(&chunk);
                Poll::Ready(Ok(()))
            }
            Ok(false) => Poll::Ready(Ok(())),
            Err(err) => Poll::Ready(Err(io::Error::other(err))),
        }
    }
}

impl AsyncSeek for BlobReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        self.get_mut()
            .seek(position)
            .map(|_| ())
            .map_err(io::Error::other)
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.offset))
    }
}

/// Response body as a stream that ends in `Cancelled` once `cancel` fires
fn body_stream(response: Response, cancel: CancellationToken) -> BodyStream {
    let chunks = Box::pin(response.bytes_stream());
    futures::stream::unfold((chunks, cancel), |(mut chunks, cancel)| async move {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(Err(RegistryError::Cancelled)),
            chunk = chunks.next() => chunk.map(|chunk| {
                chunk.map_err(|e| RegistryError::Network(format!("Blob stream interrupted: {}", e)))
            }),
        };
        item.map(|item| (item, (chunks, cancel)))
    })
    .boxed()
}
