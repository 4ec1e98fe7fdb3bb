// ABOUTME: Topic-keyed in-memory fan-out of council events to session subscribers
// ABOUTME: Publishers never block; a subscriber that falls behind is evicted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CouncilEvent, EventKind};

/// Handle identifying one subscription within a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<CouncilEvent>,
}

/// Publish-subscribe hub over topics keyed by session id.
///
/// Each subscriber holds a bounded buffer. `publish` uses `try_send`: when a
/// buffer is full the subscriber is evicted and its channel closed, so one
/// slow reader never blocks the orchestrator or starves its siblings.
/// Ordering within a topic is preserved for any subscriber that keeps up.
#[derive(Clone)]
pub struct EventHub {
    topics: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
    buffer_size: usize,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl EventHub {
    /// Create a hub with the given per-subscriber buffer capacity
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            buffer_size: buffer_size.max(1),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to a session's events.
    ///
    /// Returns the subscription handle and the delivery channel. The channel
    /// closes when the subscriber is evicted, unsubscribed, or the hub shuts
    /// down.
    pub async fn subscribe(&self, topic: Uuid) -> (SubscriberId, mpsc::Receiver<CouncilEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut topics = self.topics.write().await;
        topics.entry(topic).or_default().push(Subscriber { id, tx });
        drop(topics);

        debug!(%topic, subscriber = id.0, "subscriber registered");
        (id, rx)
    }

    /// Publish an event to every subscriber of a topic.
    ///
    /// Never blocks: subscribers whose buffers are full are evicted and their
    /// channels closed; delivery to the remaining subscribers succeeds.
    pub async fn publish(&self, topic: Uuid, event: EventKind, data: Value) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let envelope = CouncilEvent::new(topic, event, data);

        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(&topic) else {
            return;
        };

        subscribers.retain(|subscriber| match subscriber.tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    %topic,
                    subscriber = subscriber.id.0,
                    "evicting slow subscriber"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if subscribers.is_empty() {
            topics.remove(&topic);
        }
    }

    /// Remove one subscription, closing its channel
    pub async fn unsubscribe(&self, topic: Uuid, id: SubscriberId) {
        let mut topics = self.topics.write().await;
        if let Some(subscribers) = topics.get_mut(&topic) {
            subscribers.retain(|subscriber| subscriber.id != id);
            if subscribers.is_empty() {
                topics.remove(&topic);
            }
        }
        drop(topics);
        debug!(%topic, subscriber = id.0, "subscriber removed");
    }

    /// Close every subscriber channel; further publishes are dropped
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut topics = self.topics.write().await;
        topics.clear();
    }

    /// Number of live subscribers on a topic
    pub async fn subscriber_count(&self, topic: Uuid) -> usize {
        let topics = self.topics.read().await;
        topics.get(&topic).map_or(0, Vec::len)
    }
}
