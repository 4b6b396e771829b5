//! Streams that hold their admission slot until dropped.

use crate::permit::ConnectionPermit;
use pin_project_lite::pin_project;
use std::fmt;
use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pin_project! {
    /// An admitted stream.
    ///
    /// Reads and writes pass straight through to the wrapped stream. The
    /// connection slot is returned to the gate when this value is dropped,
    /// or earlier through [`permit`](Self::permit).
    pub struct GatedStream<S> {
        #[pin]
        inner: S,
        permit: ConnectionPermit,
    }
}

impl<S> GatedStream<S> {
    pub(crate) fn new(inner: S, permit: ConnectionPermit) -> Self {
        Self { inner, permit }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// The permit backing this stream.
    pub fn permit(&self) -> &ConnectionPermit {
        &self.permit
    }

    /// Split into the raw stream and its permit. The slot stays taken until
    /// the permit is dropped or released.
    pub fn into_parts(self) -> (S, ConnectionPermit) {
        (self.inner, self.permit)
    }
}

impl<S: fmt::Debug> fmt::Debug for GatedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedStream")
            .field("inner", &self.inner)
            .field("permit", &self.permit)
            .finish()
    }
}

impl<S: AsyncRead> AsyncRead for GatedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for GatedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
