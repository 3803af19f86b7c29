//! # Request Client
//!
//! The RequestClient provides a synchronous request-response pattern on top of the
//! asynchronous, at-least-once message transport. It allows a service to send a
//! request and wait for the matching reply, with timeout handling and correlation.
//!
//! ## Key Features
//!
//! - **Request-Response Correlation**: Every call gets a fresh correlation id; the
//!   replying service copies it into the reply envelope
//! - **Single Dispatch Point**: One subscription per workflow response topic routes
//!   every inbound reply through the [`Correlator`]. A subscription that ends
//!   fails the calls waiting on it and is replaced by the next call
//! - **Timeout Handling**: Calls fail with [`CallError::Timeout`] if no reply arrives
//!   in time; late replies are dropped
//! - **Publish Failures Surface**: A failed publish fails the call immediately instead
//!   of leaving it waiting for a reply that will never come
//!
//! ## Call Flow
//!
//! ```text
//! call ──▶ register(id) ──▶ publish(request topic) ──▶ wait(handle)
//!                                                          ▲
//! response topic ──▶ dispatcher ──▶ resolve(id, reply) ────┘
//! ```

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::{
    correlator::{CorrelationError, Correlator},
    envelope::{Envelope, EnvelopeError, RawEvent, TypedEvent},
    topic_registry::{TopicRegistry, Workflow},
    transport::{Message, MessageTransport, Subscription, TransportError},
    workflows::{WorkflowReply, WorkflowRequest},
};

/// Reply routing task for one response topic.
struct Dispatcher {
    task: JoinHandle<()>,
    /// Becomes `true` once the subscription behind `task` has ended
    closed: watch::Receiver<bool>,
}

impl Dispatcher {
    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

pub struct RequestClient {
    transport: Arc<dyn MessageTransport>,
    correlator: Arc<Correlator<RawEvent>>,
    source: String,
    default_timeout: Duration,
    dispatchers: DashMap<Workflow, Dispatcher>,
    /// Serializes subscribe-and-insert so a workflow never has two dispatchers
    listen_lock: Mutex<()>,
}

impl RequestClient {
    /// Creates a client publishing as `source`. Calls that do not pass a
    /// timeout use `default_timeout`.
    ///
    /// ```rust,no_run
    /// use std::{sync::Arc, time::Duration};
    /// use eventwire::event::{event_bus::EventBus, request_client::RequestClient};
    /// let client = RequestClient::new(Arc::new(EventBus::new(100)), "events", Duration::from_secs(6));
    /// ```
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        source: &str,
        default_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            correlator: Arc::new(Correlator::new()),
            source: source.to_string(),
            default_timeout,
            dispatchers: DashMap::new(),
            listen_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn correlator(&self) -> &Arc<Correlator<RawEvent>> {
        &self.correlator
    }

    /// Subscribes to the response topic of every registered workflow.
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn start(&self) -> CallResult<()> {
        for entry in TopicRegistry::entries() {
            self.listen(entry.workflow).await?;
        }
        Ok(())
    }

    /// Subscribes to `workflow`'s response topic unless a live subscription
    /// already exists. A subscription that has ended is replaced.
    pub async fn listen(&self, workflow: Workflow) -> CallResult<()> {
        self.dispatcher(workflow).await.map(|_| ())
    }

    pub fn is_listening(&self, workflow: Workflow) -> bool {
        self.open_dispatcher(workflow).is_some()
    }

    fn open_dispatcher(&self, workflow: Workflow) -> Option<watch::Receiver<bool>> {
        self.dispatchers
            .get(&workflow)
            .filter(|dispatcher| dispatcher.is_open())
            .map(|dispatcher| dispatcher.closed.clone())
    }

    /// Returns the closed signal of `workflow`'s live dispatcher, subscribing
    /// first if there is none.
    async fn dispatcher(&self, workflow: Workflow) -> CallResult<watch::Receiver<bool>> {
        if let Some(closed) = self.open_dispatcher(workflow) {
            return Ok(closed);
        }
        let _guard = self.listen_lock.lock().await;
        // Another caller may have subscribed while we waited for the lock
        if let Some(closed) = self.open_dispatcher(workflow) {
            return Ok(closed);
        }

        let topic = workflow.topics().response;
        let subscription = self.transport.subscribe(topic).await?;
        let (closed_tx, closed_rx) = watch::channel(false);
        let task = tokio::spawn(dispatch(subscription, self.correlator.clone(), closed_tx));
        let dispatcher = Dispatcher {
            task,
            closed: closed_rx.clone(),
        };
        if let Some(ended) = self.dispatchers.insert(workflow, dispatcher) {
            ended.task.abort();
            debug!(%workflow, topic, "replaced ended reply subscription");
        }
        debug!(%workflow, topic, "listening for replies");
        Ok(closed_rx)
    }

    /// Sends a typed request and waits for its typed reply.
    ///
    /// `timeout` defaults to the client's default timeout.
    ///
    /// # Errors
    ///
    /// * `CallError::Timeout` - No reply within the timeout
    /// * `CallError::Transport` - Subscribing or publishing failed
    /// * `CallError::MalformedReply` - The reply payload does not match `R::Reply`
    /// * `CallError::Cancelled` - The client shut down while waiting
    pub async fn call<R: WorkflowRequest>(
        &self,
        request: &R,
        timeout: Option<Duration>,
    ) -> CallResult<R::Reply> {
        let correlation_id = Uuid::new_v4().to_string();
        self.call_with_id(&correlation_id, request, timeout)
            .await
            .map(|reply| reply.payload)
    }

    /// Like [`call`](Self::call) with a caller-supplied correlation id, returning
    /// the full reply event.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus `CallError::DuplicateCorrelation` when
    /// `correlation_id` is already in flight.
    pub async fn call_with_id<R: WorkflowRequest>(
        &self,
        correlation_id: &str,
        request: &R,
        timeout: Option<Duration>,
    ) -> CallResult<TypedEvent<R::Reply>> {
        let raw = self
            .dispatch_call(correlation_id, R::WORKFLOW, R::EVENT_TYPE, request, timeout)
            .await?;
        if raw.envelope.event_type != <R::Reply as WorkflowReply>::EVENT_TYPE {
            debug!(
                expected = <R::Reply as WorkflowReply>::EVENT_TYPE,
                got = %raw.envelope.event_type,
                "reply event type differs from expected"
            );
        }
        raw.into_typed()
            .map_err(|e| CallError::MalformedReply {
                workflow: R::WORKFLOW,
                correlation_id: correlation_id.to_string(),
                message: e.to_string(),
            })
    }

    /// Untyped call: publishes `payload` as `event_type` on `workflow`'s request
    /// topic and returns the decoded reply.
    pub async fn call_raw<P: Serialize + Sync>(
        &self,
        workflow: Workflow,
        event_type: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> CallResult<RawEvent> {
        let correlation_id = Uuid::new_v4().to_string();
        self.dispatch_call(&correlation_id, workflow, event_type, payload, timeout)
            .await
    }

    #[instrument(skip(self, payload), fields(source = %self.source))]
    async fn dispatch_call<P: Serialize + Sync + ?Sized>(
        &self,
        correlation_id: &str,
        workflow: Workflow,
        event_type: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> CallResult<RawEvent> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let envelope = Envelope::builder()
            .event_type(event_type)
            .source(&self.source)
            .correlation_id(correlation_id)
            .build()?;
        let bytes = TypedEvent::new(envelope, payload).encode()?;

        let closed = self.dispatcher(workflow).await?;

        let handle = self
            .correlator
            .register(correlation_id, timeout)
            .map_err(|e| CallError::from_correlation(e, workflow, timeout))?;
        let topic = workflow.topics().request;
        if let Err(e) = self
            .transport
            .publish(topic, Message::new(correlation_id, bytes))
            .await
        {
            self.correlator.cancel(handle);
            warn!(topic, error = %e, "request publish failed");
            return Err(e.into());
        }
        trace!(topic, "request published");

        tokio::select! {
            biased;
            reply = self.correlator.wait(handle) => {
                reply.map_err(|e| CallError::from_correlation(e, workflow, timeout))
            }
            _ = subscription_ended(closed) => {
                let topic = workflow.topics().response;
                warn!(topic, "reply subscription ended while waiting");
                Err(CallError::Transport(TransportError::Closed {
                    topic: topic.to_string(),
                }))
            }
        }
    }

    /// Fails every in-flight call and stops the reply dispatchers.
    pub async fn shutdown(&self) {
        self.correlator.cancel_all("request client shutdown");
        let workflows: Vec<Workflow> = self.dispatchers.iter().map(|e| *e.key()).collect();
        for workflow in workflows {
            if let Some((_, dispatcher)) = self.dispatchers.remove(&workflow) {
                dispatcher.task.abort();
                let _ = dispatcher.task.await;
            }
        }
        debug!(source = %self.source, "request client stopped");
    }
}

impl Drop for RequestClient {
    fn drop(&mut self) {
        for entry in self.dispatchers.iter() {
            entry.value().task.abort();
        }
    }
}

/// Completes once `closed` reports the subscription ended, or its dispatcher
/// is gone.
async fn subscription_ended(mut closed: watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

/// Routes every reply on one response topic to the correlator. Signals
/// `closed` when the subscription ends.
async fn dispatch(
    mut subscription: Subscription,
    correlator: Arc<Correlator<RawEvent>>,
    closed: watch::Sender<bool>,
) {
    loop {
        match subscription.recv().await {
            Ok(message) => match RawEvent::decode(&message.payload) {
                Ok(reply) => {
                    let correlation_id = reply.envelope.correlation_id.clone();
                    correlator.resolve(&correlation_id, reply);
                }
                Err(e) => {
                    warn!(topic = subscription.topic(), key = %message.key, error = %e, "undecodable reply dropped");
                }
            },
            Err(TransportError::Lagged { count }) => {
                warn!(topic = subscription.topic(), count, "reply dispatcher lagged");
            }
            Err(e) => {
                warn!(topic = subscription.topic(), error = %e, "reply subscription ended");
                break;
            }
        }
    }
    closed.send_replace(true);
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("{workflow} call {correlation_id} timed out after {timeout:?}")]
    Timeout {
        workflow: Workflow,
        correlation_id: String,
        timeout: Duration,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed {workflow} reply for {correlation_id}: {message}")]
    MalformedReply {
        workflow: Workflow,
        correlation_id: String,
        message: String,
    },

    #[error("correlation id already in flight: {0}")]
    DuplicateCorrelation(String),

    #[error("call cancelled: {0}")]
    Cancelled(String),

    #[error("request could not be encoded: {0}")]
    Encode(#[from] EnvelopeError),
}

impl CallError {
    fn from_correlation(error: CorrelationError, workflow: Workflow, timeout: Duration) -> Self {
        match error {
            CorrelationError::Duplicate(id) => CallError::DuplicateCorrelation(id),
            CorrelationError::Cancelled(id) => CallError::Cancelled(id),
            CorrelationError::Timeout { correlation_id, .. } => CallError::Timeout {
                workflow,
                correlation_id,
                timeout,
            },
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;
