//! Downstream relay sessions for proxy mode.
//!
//! A sink receives every raw frame before it is parsed. Writes happen in arrival
//! order and a failed write is reported as an error, never swallowed.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{CoreResult, RelayError};
use crate::stream::RawFrame;

#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: &RawFrame) -> CoreResult<()>;
}

/// Encode a frame in the same event-stream format it arrived in. Only the
/// frame's own `id:` line is written back.
pub fn encode_frame(frame: &RawFrame) -> String {
    let mut out = String::with_capacity(frame.data.len() + 16);
    if let Some(id) = &frame.id {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(event) = &frame.event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in frame.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Writes SSE-encoded frames to any async writer, flushing after each frame.
pub struct SseWriterSink<W> {
    inner: W,
}

impl<W> SseWriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> FrameSink for SseWriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &RawFrame) -> CoreResult<()> {
        let encoded = encode_frame(frame);
        self.inner.write_all(encoded.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Hands encoded frames to another task, e.g. an HTTP response body.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: &RawFrame) -> CoreResult<()> {
        self.tx
            .send(encode_frame(frame))
            .await
            .map_err(|_| RelayError::Other(anyhow::anyhow!("downstream receiver closed")))
    }
}
