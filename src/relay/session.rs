//! Client sessions
//!
//! A session is split in two halves when a listener connects:
//!
//! - [`Subscriber`] goes to the relay. The relay is its only producer and the
//!   only party allowed to drop it from the registry, which closes the queue.
//! - [`ClientSession`] stays with the HTTP layer, which takes frames out of
//!   the queue and writes them to the connection.
//!
//! Either side can end the session. The relay evicts by dropping the
//! subscriber; the HTTP side finishes by asserting the disconnect signal and
//! draining what is left in the queue.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::frame::Frame;
use crate::supervisor::DemandLease;

/// One-shot, idempotent disconnect flag shared by both halves of a session
#[derive(Debug, Clone, Default)]
pub struct DisconnectSignal {
    token: CancellationToken,
}

impl DisconnectSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal (no effect if already raised)
    pub fn assert(&self) {
        self.token.cancel();
    }

    pub fn is_asserted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal is raised
    pub async fn asserted(&self) {
        self.token.cancelled().await
    }
}

/// Result of offering a frame to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued
    Queued,
    /// The client side has gone away
    Disconnected,
    /// The queue is full
    Full,
}

/// Relay-side half of a session
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    queue: mpsc::Sender<Frame>,
    disconnect: DisconnectSignal,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Try to queue a frame without waiting
    pub fn offer(&self, frame: &Frame) -> Delivery {
        if self.disconnect.is_asserted() {
            return Delivery::Disconnected;
        }

        match self.queue.try_send(frame.clone()) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }
}

/// HTTP-side half of a session
///
/// Yields frame payloads as a byte stream until the relay closes the queue.
/// Dropping the session finishes it.
#[derive(Debug)]
pub struct ClientSession {
    id: u64,
    queue: mpsc::Receiver<Frame>,
    disconnect: DisconnectSignal,
    lease: Option<DemandLease>,
    finished: bool,
}

impl ClientSession {
    /// Create both halves of a session with a queue of `capacity` frames
    pub fn new(id: u64, capacity: usize) -> (ClientSession, Subscriber) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let disconnect = DisconnectSignal::new();

        let session = ClientSession {
            id,
            queue: rx,
            disconnect: disconnect.clone(),
            lease: None,
            finished: false,
        };
        let subscriber = Subscriber {
            id,
            queue: tx,
            disconnect,
        };

        (session, subscriber)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn disconnect_signal(&self) -> &DisconnectSignal {
        &self.disconnect
    }

    /// Tie the session to a unit of encoder demand, released on finish
    pub fn attach_lease(&mut self, lease: DemandLease) {
        self.lease = Some(lease);
    }

    /// Next frame, or `None` once the relay has closed the queue
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.queue.recv().await
    }

    /// Whether the session has been finished
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// End the session from the client side
    ///
    /// Releases the demand lease, raises the disconnect signal, then closes
    /// and drains the queue. Safe to call more than once.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        self.disconnect.assert();

        self.queue.close();
        let mut discarded = 0usize;
        while self.queue.try_recv().is_ok() {
            discarded += 1;
        }

        tracing::debug!(
            session_id = self.id,
            discarded_frames = discarded,
            "Client cleaned up"
        );
    }
}

impl Stream for ClientSession {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.queue.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame.into_bytes()))),
            Poll::Ready(None) => {
                tracing::debug!(session_id = self.id, "Relay closed audio queue");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.finish();
    }
}
