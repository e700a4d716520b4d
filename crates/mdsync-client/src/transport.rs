//! Byte transports for the mediator link.
//!
//! A transport moves whole frames. The link does not care how: an in-memory
//! channel pair for tests and simulation, or any byte stream with a length
//! prefix per frame.
//!
//! [`Transport::recv`] is polled inside `select!` and must be cancel-safe:
//! dropping the future before it completes must not lose a frame.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use mdsync_core::CloseCode;
use mdsync_proto::{CommonHeader, Frame};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
};

use crate::error::LinkError;

/// Largest frame a stream transport accepts.
pub const MAX_FRAME_SIZE: usize = CommonHeader::SIZE + Frame::MAX_PAYLOAD_SIZE;

/// Frame transport.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), LinkError>;

    /// Next frame, `None` once the peer closed. Cancel-safe.
    async fn recv(&mut self) -> Result<Option<Bytes>, LinkError>;

    /// Close with `code`. Sends after close fail.
    async fn close(&mut self, code: CloseCode);
}

/// One end of an in-memory transport pair.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
    close_code: Arc<Mutex<Option<CloseCode>>>,
}

impl ChannelTransport {
    /// Connected pair with room for `capacity` frames per direction.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let close_code = Arc::new(Mutex::new(None));

        (
            Self { tx: Some(a_tx), rx: a_rx, close_code: Arc::clone(&close_code) },
            Self { tx: Some(b_tx), rx: b_rx, close_code },
        )
    }

    /// Code the pair was closed with, by either end.
    pub fn close_code(&self) -> Option<CloseCode> {
        *self.close_code.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::ConnectionLost)?;
        tx.send(frame).await.map_err(|_| LinkError::ConnectionLost)
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, LinkError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self, code: CloseCode) {
        self.close_code.lock().unwrap_or_else(PoisonError::into_inner).get_or_insert(code);
        self.tx = None;
        self.rx.close();
    }
}

/// Length-prefixed frames over a byte stream.
///
/// ```text
/// ┌──────────────┬───────────────┐
/// │ length (BE)  │ frame         │
/// │     4B       │ length bytes  │
/// └──────────────┴───────────────┘
/// ```
///
/// A reader task owns the read half so [`recv`](Transport::recv) only
/// polls a channel. Raw streams carry no close code; closing shuts the
/// write half down.
pub struct StreamTransport<S> {
    writer: WriteHalf<S>,
    frames: mpsc::Receiver<Result<Bytes, LinkError>>,
    reader: JoinHandle<()>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `stream`. Must be called inside a tokio runtime.
    pub fn new(stream: S, capacity: usize) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        let (tx, frames) = mpsc::channel(capacity);
        let reader = tokio::spawn(read_frames(read_half, tx));
        Self { writer, frames, reader }
    }
}

impl<S> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn send(&mut self, frame: Bytes) -> Result<(), LinkError> {
        let length = u32::try_from(frame.len())
            .ok()
            .filter(|_| frame.len() <= MAX_FRAME_SIZE)
            .ok_or_else(|| {
                LinkError::Transport(format!("frame of {} bytes too large", frame.len()))
            })?;

        self.writer
            .write_all(&length.to_be_bytes())
            .await
            .map_err(|e| LinkError::Transport(format!("write failed: {e}")))?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| LinkError::Transport(format!("write failed: {e}")))?;
        self.writer.flush().await.map_err(|e| LinkError::Transport(format!("flush failed: {e}")))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, LinkError> {
        self.frames.recv().await.transpose()
    }

    async fn close(&mut self, code: CloseCode) {
        tracing::debug!(code = code.code(), "closing stream transport");
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "stream shutdown failed");
        }
        self.reader.abort();
    }
}

async fn read_frames<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    frames: mpsc::Sender<Result<Bytes, LinkError>>,
) {
    loop {
        let result = match reader.read_u32().await {
            Ok(length) => read_frame(&mut reader, length as usize).await,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("stream closed by peer");
                return;
            },
            Err(e) => Err(LinkError::Transport(format!("read failed: {e}"))),
        };

        let failed = result.is_err();
        if frames.send(result).await.is_err() || failed {
            return;
        }
    }
}

async fn read_frame<S: AsyncRead>(
    reader: &mut ReadHalf<S>,
    length: usize,
) -> Result<Bytes, LinkError> {
    if length > MAX_FRAME_SIZE {
        return Err(LinkError::Transport(format!("frame of {length} bytes too large")));
    }

    let mut frame = vec![0u8; length];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| LinkError::Transport(format!("read failed: {e}")))?;
    Ok(Bytes::from(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_pair_delivers_both_ways() {
        let (mut a, mut b) = ChannelTransport::pair(4);

        a.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(Bytes::from_static(b"ping")));

        b.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(Bytes::from_static(b"pong")));
    }

    #[tokio::test]
    async fn channel_close_is_seen_by_peer() {
        let (mut a, mut b) = ChannelTransport::pair(4);
        a.close(CloseCode::UnsupportedProtocolVersion).await;

        assert_eq!(b.recv().await.unwrap(), None);
        assert_eq!(b.close_code(), Some(CloseCode::UnsupportedProtocolVersion));
        assert_eq!(a.send(Bytes::from_static(b"x")).await, Err(LinkError::ConnectionLost));
    }

    #[tokio::test]
    async fn stream_frames_keep_boundaries() {
        let (left, right) = tokio::io::duplex(1024);
        let mut a = StreamTransport::new(left, 4);
        let mut b = StreamTransport::new(right, 4);

        a.send(Bytes::from_static(&[0x10, 0, 0, 0, 1, 2, 3])).await.unwrap();
        a.send(Bytes::new()).await.unwrap();
        a.send(Bytes::from_static(&[0x83, 0, 0, 0])).await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap().as_ref(), &[0x10, 0, 0, 0, 1, 2, 3]);
        assert_eq!(b.recv().await.unwrap().unwrap().len(), 0);
        assert_eq!(b.recv().await.unwrap().unwrap().as_ref(), &[0x83, 0, 0, 0]);
    }

    #[tokio::test]
    async fn stream_peer_shutdown_ends_recv() {
        let (left, right) = tokio::io::duplex(64);
        let mut a = StreamTransport::new(left, 4);
        let mut b = StreamTransport::new(right, 4);

        a.close(CloseCode::Normal).await;
        assert_eq!(b.recv().await.unwrap(), None);
    }
}
