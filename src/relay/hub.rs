//! Frame relay loop
//!
//! A single task owns the [`SubscriberRegistry`] and the reader end of the
//! frame stream. It waits on three things: shutdown, a new registration, or
//! a frame-size announcement. Nothing else touches the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::RelayConfig;
use super::frame::FrameReader;
use super::registry::SubscriberRegistry;
use super::session::{ClientSession, Subscriber};
use crate::error::RelayError;

/// A subscriber waiting to be added, plus the channel used to confirm it
#[derive(Debug)]
struct Registration {
    subscriber: Subscriber,
    ack: oneshot::Sender<()>,
}

/// Cloneable handle used by the HTTP layer to join the broadcast
#[derive(Debug, Clone)]
pub struct RelayHandle {
    registrations: mpsc::Sender<Registration>,
    next_session_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl RelayHandle {
    /// Hand a subscriber to the relay loop and wait until it is registered
    ///
    /// Frames announced after this returns are delivered to the subscriber.
    pub async fn register(&self, subscriber: Subscriber) -> Result<(), RelayError> {
        let (ack, confirmed) = oneshot::channel();

        self.registrations
            .send(Registration { subscriber, ack })
            .await
            .map_err(|_| RelayError::Closed)?;

        confirmed.await.map_err(|_| RelayError::Closed)
    }

    /// Create a new session and register its subscriber half
    pub async fn subscribe(&self) -> Result<ClientSession, RelayError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (session, subscriber) = ClientSession::new(session_id, self.queue_capacity);

        self.register(subscriber).await?;
        Ok(session)
    }

    /// Whether the relay loop has exited
    pub fn is_closed(&self) -> bool {
        self.registrations.is_closed()
    }
}

/// The relay loop task
pub struct Relay {
    reader: FrameReader,
    registrations: mpsc::Receiver<Registration>,
    registry: SubscriberRegistry,
    shutdown: CancellationToken,
}

impl Relay {
    /// Create the relay around the reader end of the frame stream
    pub fn new(
        config: &RelayConfig,
        reader: FrameReader,
        shutdown: CancellationToken,
    ) -> (Relay, RelayHandle) {
        // Capacity 1 plus the ack makes registration a rendezvous
        let (tx, rx) = mpsc::channel(1);

        let relay = Relay {
            reader,
            registrations: rx,
            registry: SubscriberRegistry::new(),
            shutdown,
        };
        let handle = RelayHandle {
            registrations: tx,
            next_session_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: config.client_queue_capacity,
        };

        (relay, handle)
    }

    /// Spawn the loop on the runtime
    pub fn spawn(self) -> JoinHandle<Result<(), RelayError>> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown or a fatal stream error
    ///
    /// Every session is evicted when the loop exits.
    pub async fn run(mut self) -> Result<(), RelayError> {
        tracing::debug!("Relay started");

        let result = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break Ok(()),

                Some(registration) = self.registrations.recv() => {
                    self.register(registration);
                }

                size = self.reader.next_size() => {
                    let Some(size) = size else {
                        tracing::error!("Frame stream writer is gone");
                        break Err(RelayError::Closed);
                    };
                    if let Err(e) = self.relay_frame(size).await {
                        tracing::error!(error = %e, size = size, "Failed to read frame");
                        break Err(e);
                    }
                }
            }
        };

        let evicted = self.registry.close_all();
        tracing::info!(closed_sessions = evicted.len(), "Relay stopped");

        result
    }

    fn register(&mut self, registration: Registration) {
        let session_id = registration.subscriber.id();
        self.registry.insert(registration.subscriber);

        // The caller may have given up waiting; the subscriber stays
        // registered and is evicted on the next frame once its session drops
        let _ = registration.ack.send(());

        tracing::info!(
            session_id = session_id,
            subscribers = self.registry.len(),
            "Subscriber joined"
        );
    }

    async fn relay_frame(&mut self, size: usize) -> Result<(), RelayError> {
        let frame = self.reader.read_frame(size).await?;
        let report = self.registry.broadcast(&frame);

        tracing::trace!(size = size, delivered = report.delivered, "Frame relayed");

        for eviction in report.evicted {
            tracing::warn!(
                session_id = eviction.session_id,
                reason = %eviction.reason,
                subscribers = self.registry.len(),
                "Subscriber evicted"
            );
        }

        Ok(())
    }
}
