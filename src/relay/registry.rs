//! Subscriber registry
//!
//! The set of sessions currently receiving the broadcast. It is owned by the
//! relay loop and never shared, so it needs no locking.

use std::fmt;

use super::frame::Frame;
use super::session::{Delivery, Subscriber};

/// Why a subscriber was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The client side signalled disconnect or dropped its queue
    Disconnected,
    /// The subscriber could not keep up
    QueueFull,
    /// The relay is shutting down
    Shutdown,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::Disconnected => write!(f, "disconnected"),
            EvictionReason::QueueFull => write!(f, "queue full"),
            EvictionReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A removed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub session_id: u64,
    pub reason: EvictionReason,
}

/// Outcome of broadcasting one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that received the frame
    pub delivered: usize,
    /// Subscribers removed while broadcasting
    pub evicted: Vec<Eviction>,
}

/// Active subscribers
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; it receives frames broadcast from now on
    pub fn insert(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Offer a frame to every subscriber without blocking
    ///
    /// A subscriber that has disconnected or whose queue is full is removed.
    /// Removing it drops the queue's only sender, which closes the queue.
    pub fn broadcast(&mut self, frame: &Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        self.subscribers.retain(|subscriber| {
            let reason = match subscriber.offer(frame) {
                Delivery::Queued => {
                    report.delivered += 1;
                    return true;
                }
                Delivery::Disconnected => EvictionReason::Disconnected,
                Delivery::Full => EvictionReason::QueueFull,
            };

            report.evicted.push(Eviction {
                session_id: subscriber.id(),
                reason,
            });
            false
        });

        report
    }

    /// Remove every subscriber, closing all queues
    pub fn close_all(&mut self) -> Vec<Eviction> {
        self.subscribers
            .drain(..)
            .map(|subscriber| Eviction {
                session_id: subscriber.id(),
                reason: EvictionReason::Shutdown,
            })
            .collect()
    }
}
