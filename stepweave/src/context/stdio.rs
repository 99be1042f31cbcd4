//! Shared stdio streams handed from step to step and finally to a driver.

use crate::mask::SecretStore;
use std::borrow::Cow;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// A cloneable handle to a writable stream.
///
/// Writes from concurrent tasks serialize on the inner mutex. When a secret
/// store is attached, every registered secret is masked before it reaches the
/// underlying writer. A trailing partial secret is held back until the next
/// write, [`OutputStream::flush`] or [`OutputStream::shutdown`].
#[derive(Clone)]
pub struct OutputStream {
    id: u64,
    inner: Arc<Mutex<BoxWriter>>,
    mask: Option<Masking>,
}

#[derive(Clone)]
struct Masking {
    store: Arc<SecretStore>,
    held: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl OutputStream {
    /// Wraps a writer.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(Box::new(writer))),
            mask: None,
        }
    }

    /// Creates a stream that drops everything written to it.
    #[must_use]
    pub fn sink() -> Self {
        Self::new(tokio::io::sink())
    }

    /// Attaches a secret store used to mask writes. Clones of the returned
    /// handle share its held-back tail.
    #[must_use]
    pub fn with_mask(mut self, store: Arc<SecretStore>) -> Self {
        self.mask = Some(Masking {
            store,
            held: Arc::default(),
        });
        self
    }

    /// Identity of the underlying writer, shared by clones.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Writes the whole buffer and flushes.
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.lock().await;
        let ready = match &self.mask {
            Some(masking) => {
                let mut held = masking.held.lock();
                held.extend_from_slice(buf);
                let (ready, rest) = masking.store.mask_partial(&held);
                *held = rest;
                Cow::Owned(ready)
            }
            None => Cow::Borrowed(buf),
        };

        if !ready.is_empty() {
            writer.write_all(&ready).await?;
        }
        writer.flush().await
    }

    /// Writes out the held-back tail, masked, and flushes.
    pub async fn flush(&self) -> io::Result<()> {
        let mut writer = self.inner.lock().await;
        let rest = match &self.mask {
            Some(masking) => {
                let held = std::mem::take(&mut *masking.held.lock());
                masking.store.mask(&held).into_owned()
            }
            None => Vec::new(),
        };

        if !rest.is_empty() {
            writer.write_all(&rest).await?;
        }
        writer.flush().await
    }

    /// Flushes, then shuts the writer down so readers on the other end see
    /// end-of-stream.
    pub async fn shutdown(&self) -> io::Result<()> {
        self.flush().await?;
        self.inner.lock().await.shutdown().await
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("id", &self.id)
            .field("masked", &self.mask.is_some())
            .finish()
    }
}

/// A cloneable handle to a readable stream.
#[derive(Clone)]
pub struct InputStream {
    inner: Arc<Mutex<BoxReader>>,
}

impl InputStream {
    /// Wraps a reader.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Box::new(reader))),
        }
    }

    /// Reads some bytes into `buf`. Returns 0 at end-of-stream.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.lock().await.read(buf).await
    }

    /// Reads until end-of-stream.
    pub async fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.lock().await.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream").finish_non_exhaustive()
    }
}

/// A fan-out writer over several output streams.
#[derive(Debug, Clone, Default)]
pub struct Tee {
    streams: Vec<OutputStream>,
}

impl Tee {
    /// Creates a tee over the given streams.
    #[must_use]
    pub fn new(streams: Vec<OutputStream>) -> Self {
        Self { streams }
    }

    /// Writes the buffer to every stream.
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        for stream in &self.streams {
            stream.write_all(buf).await?;
        }
        Ok(())
    }

    /// Flushes every stream, releasing held-back tails.
    pub async fn flush(&self) -> io::Result<()> {
        for stream in &self.streams {
            stream.flush().await?;
        }
        Ok(())
    }

    /// Returns whether there is no stream to write to.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// The stdio surface of a step.
#[derive(Debug, Clone, Default)]
pub struct StdioSet {
    /// Standard input, if any.
    pub stdin: Option<InputStream>,
    /// Standard output writers.
    pub stdout: Vec<OutputStream>,
    /// Standard error writers.
    pub stderr: Vec<OutputStream>,
}

impl StdioSet {
    /// Removes a stdout writer by identity.
    pub fn remove_stdout(&mut self, id: u64) {
        self.stdout.retain(|s| s.id() != id);
    }

    /// Removes a stderr writer by identity.
    pub fn remove_stderr(&mut self, id: u64) {
        self.stderr.retain(|s| s.id() != id);
    }
}

/// An in-memory writer whose contents can be inspected after the fact.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl CaptureBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// Returns the contents as lossy UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Returns an output stream writing into this buffer.
    #[must_use]
    pub fn stream(&self) -> OutputStream {
        OutputStream::new(self.clone())
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Creates an in-process byte pipe. Writes to the returned output stream can
/// be read from the input stream; shutting the writer down ends the reader.
#[must_use]
pub fn pipe(capacity: usize) -> (OutputStream, InputStream) {
    let (writer, reader) = tokio::io::duplex(capacity);
    (OutputStream::new(writer), InputStream::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_buffer() {
        let buffer = CaptureBuffer::new();
        let stream = buffer.stream();
        stream.write_all(b"hello ").await.unwrap();
        stream.clone().write_all(b"world").await.unwrap();
        assert_eq!(buffer.text(), "hello world");
    }

    #[tokio::test]
    async fn test_pipe_eof_after_shutdown() {
        let (writer, reader) = pipe(64);
        let handle = tokio::spawn(async move { reader.read_to_end().await });

        writer.write_all(b"hello\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let read = handle.await.unwrap().unwrap();
        assert_eq!(read, b"hello\n");
    }

    #[tokio::test]
    async fn test_masked_stream() {
        let store = Arc::new(SecretStore::new());
        store.add("hunter2");
        let buffer = CaptureBuffer::new();
        let stream = buffer.stream().with_mask(store);

        stream.write_all(b"password=hunter2").await.unwrap();
        assert_eq!(buffer.text(), "password=***");
    }

    #[tokio::test]
    async fn test_secret_split_across_writes_is_masked() {
        let store = Arc::new(SecretStore::new());
        store.add("hunter2");
        let buffer = CaptureBuffer::new();
        let stream = buffer.stream().with_mask(store);

        stream.write_all(b"pw=hun").await.unwrap();
        assert_eq!(buffer.text(), "pw=");
        stream.clone().write_all(b"ter2\n").await.unwrap();
        assert_eq!(buffer.text(), "pw=***\n");

        stream.write_all(b"bye hunt").await.unwrap();
        stream.shutdown().await.unwrap();
        assert_eq!(buffer.text(), "pw=***\nbye hunt");
    }

    #[test]
    fn test_remove_by_identity() {
        let keep = OutputStream::sink();
        let removed = OutputStream::sink();
        let mut stdio = StdioSet {
            stdin: None,
            stdout: vec![keep.clone(), removed.clone()],
            stderr: vec![],
        };
        stdio.remove_stdout(removed.id());
        assert_eq!(stdio.stdout.len(), 1);
        assert_eq!(stdio.stdout[0].id(), keep.id());
    }
}
