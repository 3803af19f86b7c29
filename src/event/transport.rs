//! # Message Transport
//!
//! Contract between the orchestration layer and whatever pub/sub system carries
//! the bytes. Delivery is at-least-once with no ordering guarantee across keys,
//! so consumers must tolerate duplicates and reordering.
//!
//! [`EventBus`](super::event_bus::EventBus) is the in-process implementation;
//! broker adapters implement the same trait and bridge their consumer into a
//! [`Subscription`].

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;
use tokio::sync::broadcast;

/// Raw message as seen by the transport: a partition key and an encoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Partition key. Set to the correlation id; routing never depends on it.
    pub key: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(key: &str, payload: Vec<u8>) -> Self {
        Self {
            key: key.to_string(),
            payload,
        }
    }
}

#[automock]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Publishes `message` on `topic`. Returns once the transport has
    /// acknowledged the write, or with an error if it could not.
    async fn publish(&self, topic: &str, message: Message) -> TransportResult<()>;

    /// Opens a subscription that receives every message published on `topic`
    /// from now on.
    async fn subscribe(&self, topic: &str) -> TransportResult<Subscription>;
}

/// Stream of messages from one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Message>,
}

impl Subscription {
    pub fn new(topic: &str, receiver: broadcast::Receiver<Message>) -> Self {
        Self {
            topic: topic.to_string(),
            receiver,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receives the next message. On lag the subscription skips ahead and
    /// reports how many messages were lost; the caller may keep receiving.
    pub async fn recv(&mut self) -> TransportResult<Message> {
        match self.receiver.recv().await {
            Ok(message) => Ok(message),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Err(TransportError::Lagged { count })
            }
            Err(broadcast::error::RecvError::Closed) => Err(TransportError::Closed {
                topic: self.topic.clone(),
            }),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("publish to {topic} failed: {message}")]
    PublishFailed { topic: String, message: String },

    #[error("subscribe to {topic} failed: {message}")]
    SubscribeFailed { topic: String, message: String },

    #[error("subscription lagged, {count} messages skipped")]
    Lagged { count: u64 },

    #[error("subscription to {topic} closed")]
    Closed { topic: String },
}

pub type TransportResult<T> = Result<T, TransportError>;
