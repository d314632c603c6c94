//! Pass-through stream wrapper.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::extract::FrameExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes read by the wrapped side (client to server for a server tap).
    Inbound,
    /// Bytes written by the wrapped side.
    Outbound,
}

impl Direction {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Inbound => Self::Outbound,
            Self::Outbound => Self::Inbound,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        })
    }
}

/// Receives every complete frame body seen by a [`Tap`].
///
/// Called from inside `poll_read`/`poll_write`, so implementations must not
/// block.
pub trait TrafficSink: Send + Sync {
    fn record(&self, direction: Direction, body: &[u8]);
}

impl<S: TrafficSink + ?Sized> TrafficSink for Arc<S> {
    fn record(&self, direction: Direction, body: &[u8]) {
        (**self).record(direction, body);
    }
}

impl<A: TrafficSink, B: TrafficSink> TrafficSink for (A, B) {
    fn record(&self, direction: Direction, body: &[u8]) {
        self.0.record(direction, body);
        self.1.record(direction, body);
    }
}

/// Logs each frame body at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TrafficSink for TracingSink {
    fn record(&self, direction: Direction, body: &[u8]) {
        tracing::debug!(
            %direction,
            bytes = body.len(),
            "{}",
            String::from_utf8_lossy(body)
        );
    }
}

/// Wraps a stream and copies each framed message to a [`TrafficSink`]
/// without altering the bytes that pass through.
pub struct Tap<T> {
    inner: T,
    sink: Arc<dyn TrafficSink>,
    inbound: FrameExtractor,
    outbound: FrameExtractor,
}

impl<T> Tap<T> {
    pub fn new(inner: T, sink: Arc<dyn TrafficSink>) -> Self {
        Self {
            inner,
            sink,
            inbound: FrameExtractor::new(),
            outbound: FrameExtractor::new(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn observe(&mut self, direction: Direction, data: &[u8]) {
        let extractor = match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        };
        for body in extractor.push(data) {
            self.sink.record(direction, &body);
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Tap<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let fresh = &buf.filled()[before..];
            if !fresh.is_empty() {
                this.observe(Direction::Inbound, fresh);
            }
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Tap<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, data);
        if let Poll::Ready(Ok(written)) = poll {
            this.observe(Direction::Outbound, &data[..written]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Direction, Vec<u8>)>>);

    impl TrafficSink for Recorder {
        fn record(&self, direction: Direction, body: &[u8]) {
            self.0.lock().unwrap().push((direction, body.to_vec()));
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[tokio::test]
    async fn test_reads_pass_through_and_are_recorded() {
        let recorder = Arc::new(Recorder::default());
        let input = [frame(r#"{"id":1}"#), frame(r#"{"id":2}"#)].concat();
        let mut tap = Tap::new(&input[..], recorder.clone() as Arc<dyn TrafficSink>);

        let mut copied = Vec::new();
        let mut chunk = [0u8; 5];
        loop {
            let n = tap.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            copied.extend_from_slice(&chunk[..n]);
        }

        assert_eq!(copied, input);
        let seen = recorder.0.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (Direction::Inbound, br#"{"id":1}"#.to_vec()),
                (Direction::Inbound, br#"{"id":2}"#.to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_writes_pass_through_and_are_recorded() {
        let recorder = Arc::new(Recorder::default());
        let mut tap = Tap::new(Vec::new(), recorder.clone() as Arc<dyn TrafficSink>);

        let output = frame(r#"{"method":"x"}"#);
        let (head, tail) = output.split_at(10);
        tap.write_all(head).await.unwrap();
        assert!(recorder.0.lock().unwrap().is_empty());
        tap.write_all(tail).await.unwrap();
        tap.flush().await.unwrap();

        assert_eq!(tap.get_ref(), &output);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![(Direction::Outbound, br#"{"method":"x"}"#.to_vec())]
        );
    }

    #[test]
    fn test_pair_sink_reaches_both() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let both = (first.clone(), second.clone());
        both.record(Direction::Outbound, b"{}");
        assert_eq!(first.0.lock().unwrap().len(), 1);
        assert_eq!(second.0.lock().unwrap().len(), 1);
    }
}
