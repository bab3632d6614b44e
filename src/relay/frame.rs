//! Frames and the shared frame stream
//!
//! The active run and the relay are connected by a byte pipe plus a channel
//! of frame-size announcements. The writer always announces a size before
//! writing that many bytes, so the reader knows exactly how much to read to
//! get one whole frame and never has to guess at frame boundaries.
//!
//! ```text
//!   FrameSink                                 FrameReader
//!   write_frame(&[u8])                        next_size() / read_frame(n)
//!     ├── announce n ──► mpsc<usize> ─────────► n
//!     └── n bytes ────► duplex pipe ─────────► read_exact(n) ──► Frame
//! ```

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use super::config::RelayConfig;
use crate::error::RelayError;

/// One encoder-emitted unit, delivered atomically to each subscriber
///
/// Cheap to clone: the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Frame payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Create a connected sink/reader pair
pub fn frame_stream(config: &RelayConfig) -> (FrameSink, FrameReader) {
    let (writer, reader) = tokio::io::duplex(config.stream_buffer_size);
    let (announce_tx, announce_rx) = mpsc::channel(config.announce_capacity);

    (
        FrameSink {
            announce: announce_tx,
            stream: writer,
        },
        FrameReader {
            announcements: announce_rx,
            stream: reader,
        },
    )
}

/// Writer end of the frame stream
///
/// There is exactly one sink. It is owned by whichever run is active, so
/// two runs can never interleave bytes on the stream.
#[derive(Debug)]
pub struct FrameSink {
    announce: mpsc::Sender<usize>,
    stream: DuplexStream,
}

impl FrameSink {
    /// Announce and write one frame
    pub async fn write_frame(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.announce
            .send(data.len())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "relay is not reading"))?;
        self.stream.write_all(data).await
    }

    /// Announce a frame without writing its bytes
    #[cfg(test)]
    pub(crate) async fn announce_only(&mut self, size: usize) {
        let _ = self.announce.send(size).await;
    }
}

/// Reader end of the frame stream
#[derive(Debug)]
pub struct FrameReader {
    announcements: mpsc::Receiver<usize>,
    stream: DuplexStream,
}

impl FrameReader {
    /// Wait for the next frame-size announcement
    ///
    /// Cancel safe. Returns `None` once the sink is gone.
    pub async fn next_size(&mut self) -> Option<usize> {
        self.announcements.recv().await
    }

    /// Read exactly `size` bytes from the stream as one frame
    pub async fn read_frame(&mut self, size: usize) -> Result<Frame, RelayError> {
        let mut buf = BytesMut::zeroed(size);
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(RelayError::StreamRead)?;
        Ok(Frame::new(buf.freeze()))
    }
}
