//! Bounded tee capture of a request body prefix.

use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::Notify;

/// Default capture size for upload-pack command decoding.
pub const DEFAULT_CAPTURE_BYTES: usize = 64 * 1024;

/// Buffer keeping at most `capacity` leading bytes of a stream.
///
/// Bytes beyond the capacity are dropped silently. Waiters are woken on
/// every append and when the stream ends.
#[derive(Debug)]
pub struct LimitedCapture {
    buf: Mutex<Vec<u8>>,
    capacity: usize,
    closed: AtomicBool,
    notify: Notify,
}

impl LimitedCapture {
    /// Creates an empty capture holding up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(Vec::with_capacity(capacity.min(DEFAULT_CAPTURE_BYTES))),
            capacity,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Appends as much of `data` as fits; returns the number of bytes kept.
    pub fn write(&self, data: &[u8]) -> usize {
        let kept = {
            let mut buf = self.buf.lock();
            let room = self.capacity.saturating_sub(buf.len());
            let kept = room.min(data.len());
            buf.extend_from_slice(&data[..kept]);
            kept
        };
        if kept > 0 {
            self.notify.notify_waiters();
        }
        kept
    }

    /// Marks the captured stream as finished.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Whether the captured stream has finished.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of bytes captured.
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    /// Whether nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of bytes kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the captured bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    /// Waits until `ready` accepts the captured bytes, the buffer is full or
    /// the stream has ended, giving up after `timeout`.
    ///
    /// Returns `true` unless the timeout elapsed first.
    pub async fn wait_until<F>(&self, ready: F, timeout: Duration) -> bool
    where
        F: Fn(&[u8]) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let buf = self.buf.lock();
                    if ready(buf.as_slice()) || buf.len() >= self.capacity || self.is_closed() {
                        return;
                    }
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Reader that tees the bytes it yields into a [`LimitedCapture`].
pub struct CaptureReader<R> {
    inner: R,
    capture: Arc<LimitedCapture>,
}

impl<R> CaptureReader<R> {
    /// Wraps `inner`, copying its leading bytes into `capture`.
    pub fn new(inner: R, capture: Arc<LimitedCapture>) -> Self {
        Self { inner, capture }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CaptureReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        match &poll {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                if fresh.is_empty() {
                    self.capture.close();
                } else {
                    self.capture.write(fresh);
                }
            }
            Poll::Ready(Err(_)) => self.capture.close(),
            Poll::Pending => {}
        }
        poll
    }
}

impl<R> Drop for CaptureReader<R> {
    fn drop(&mut self) {
        self.capture.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_capture_truncates() {
        let capture = LimitedCapture::new(4);
        assert_eq!(capture.write(b"abc"), 3);
        assert_eq!(capture.write(b"defg"), 1);
        assert_eq!(capture.write(b"h"), 0);
        assert_eq!(capture.snapshot(), b"abcd");
        assert_eq!(capture.capacity(), 4);
    }

    #[tokio::test]
    async fn test_capture_reader_tees_prefix() {
        let data = vec![7u8; 1000];
        let capture = Arc::new(LimitedCapture::new(100));
        let mut reader = CaptureReader::new(data.as_slice(), capture.clone());

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, data);
        assert_eq!(capture.len(), 100);
        assert!(capture.is_closed());
    }

    #[tokio::test]
    async fn test_wait_until_wakes_on_write() {
        let capture = Arc::new(LimitedCapture::new(1024));
        let writer = capture.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.write(b"0000");
        });

        let ready = capture
            .wait_until(|b| b.ends_with(b"0000"), Duration::from_secs(5))
            .await;
        assert!(ready);
        assert_eq!(capture.snapshot(), b"0000");
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let capture = LimitedCapture::new(1024);
        capture.write(b"00");
        let ready = capture
            .wait_until(|b| b.len() > 10, Duration::from_millis(20))
            .await;
        assert!(!ready);
    }

    #[tokio::test]
    async fn test_wait_until_returns_when_closed() {
        let capture = Arc::new(LimitedCapture::new(1024));
        let closer = capture.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(CaptureReader::new(tokio::io::empty(), closer));
        });
        assert!(capture.wait_until(|_| false, Duration::from_secs(5)).await);
        assert!(capture.is_empty());
    }

    proptest! {
        #[test]
        fn prop_capture_never_exceeds_capacity(
            capacity in 0usize..256,
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
        ) {
            let capture = LimitedCapture::new(capacity);
            let mut expected = Vec::new();
            for chunk in &chunks {
                capture.write(chunk);
                expected.extend_from_slice(chunk);
            }
            expected.truncate(capacity);
            prop_assert!(capture.len() <= capacity);
            prop_assert_eq!(capture.snapshot(), expected);
        }
    }
}
