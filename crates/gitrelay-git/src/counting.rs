//! Byte-counting stream decorators.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Shared, monotonically increasing byte total.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` bytes.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reader that counts every byte passing through it.
pub struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R> CountingReader<R> {
    /// Wraps `inner`, adding the bytes read to `counter`.
    pub fn new(inner: R, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }

    /// Returns the counter handle.
    pub fn counter(&self) -> &ByteCounter {
        &self.counter
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            self.counter.add((buf.filled().len() - before) as u64);
        }
        poll
    }
}

/// Writer that counts every byte accepted by the inner writer.
pub struct CountingWriter<W> {
    inner: W,
    counter: ByteCounter,
}

impl<W> CountingWriter<W> {
    /// Wraps `inner`, adding the bytes written to `counter`.
    pub fn new(inner: W, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }

    /// Returns the counter handle.
    pub fn counter(&self) -> &ByteCounter {
        &self.counter
    }

    /// Consumes the wrapper and returns the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            self.counter.add(*n as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_counting_reader_is_transparent() {
        let data = b"0032want 1111111111111111111111111111111111111111\n0000".to_vec();
        let counter = ByteCounter::new();
        let mut reader = CountingReader::new(data.as_slice(), counter.clone());

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(counter.get(), data.len() as u64);
    }

    #[tokio::test]
    async fn test_counting_writer_is_transparent() {
        let counter = ByteCounter::new();
        let mut writer = CountingWriter::new(Vec::new(), counter.clone());

        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(writer.counter().get(), 11);
        assert_eq!(writer.into_inner(), b"hello world");
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_counter_shared_between_clones() {
        let counter = ByteCounter::new();
        let other = counter.clone();
        counter.add(5);
        other.add(7);
        assert_eq!(counter.get(), 12);
    }
}
