//! # Event Bus Implementation
//!
//! In-process [`MessageTransport`] backed by one Tokio broadcast channel per
//! topic. Every subscriber of a topic receives every message published on it
//! after it subscribed, which matches the fan-out semantics of a broker topic
//! with one consumer group per subscriber.
//!
//! ## Capacity and Backpressure
//!
//! Each topic buffers up to `capacity` messages. Publishing never blocks; a
//! subscriber that falls further behind than the capacity observes
//! [`TransportError::Lagged`] and resumes from the oldest retained message.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::transport::{Message, MessageTransport, Subscription, TransportError, TransportResult};

struct TopicChannel {
    sender: broadcast::Sender<Message>,
    /// Keeps the channel open while nobody is subscribed
    _internal_receiver: broadcast::Receiver<Message>,
}

impl TopicChannel {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            _internal_receiver: receiver,
        }
    }
}

pub struct EventBus {
    topics: DashMap<String, TopicChannel>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus whose topics each buffer `capacity` messages.
    ///
    /// ```rust,no_run
    /// use eventwire::event::event_bus::EventBus;
    /// let event_bus = EventBus::new(100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Message> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicChannel::new(self.capacity))
            .sender
            .clone()
    }

    /// Publishes without awaiting, for synchronous contexts.
    pub fn sync_publish(&self, topic: &str, message: Message) -> TransportResult<()> {
        debug!(topic, key = %message.key, bytes = message.payload.len(), "Publishing");
        self.sender(topic)
            .send(message)
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn subscribers_size(&self, topic: &str) -> usize {
        // Excludes the internal receiver
        self.topics
            .get(topic)
            .map(|channel| channel.sender.receiver_count().saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl MessageTransport for EventBus {
    async fn publish(&self, topic: &str, message: Message) -> TransportResult<()> {
        self.sync_publish(topic, message)
    }

    async fn subscribe(&self, topic: &str) -> TransportResult<Subscription> {
        trace!(topic, "Subscribing");
        Ok(Subscription::new(topic, self.sender(topic).subscribe()))
    }
}
