//! # Responder
//!
//! Remote side of a workflow: consumes the request topic, runs a handler, and
//! publishes the reply on the response topic with the request's correlation id
//! copied verbatim. Each request is handled in its own task, so replies may be
//! published in a different order than the requests arrived.

use std::{future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    envelope::{Envelope, RawEvent, TypedEvent},
    transport::{Message, MessageTransport, TransportError, TransportResult},
    workflows::{WorkflowReply, WorkflowRequest},
};

#[async_trait]
pub trait RequestHandler<R: WorkflowRequest + 'static>: Send + Sync {
    async fn handle(&self, request: TypedEvent<R>) -> HandlerResult<R::Reply>;
}

/// Adapts an async closure into a [`RequestHandler`].
pub struct FnHandler<F, R> {
    f: F,
    _request: PhantomData<fn(R)>,
}

pub fn handler_fn<R, F, Fut>(f: F) -> FnHandler<F, R>
where
    R: WorkflowRequest + 'static,
    F: Fn(TypedEvent<R>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<R::Reply>> + Send,
{
    FnHandler {
        f,
        _request: PhantomData,
    }
}

#[async_trait]
impl<R, F, Fut> RequestHandler<R> for FnHandler<F, R>
where
    R: WorkflowRequest + 'static,
    F: Fn(TypedEvent<R>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<R::Reply>> + Send,
{
    async fn handle(&self, request: TypedEvent<R>) -> HandlerResult<R::Reply> {
        (self.f)(request).await
    }
}

pub struct Responder {
    transport: Arc<dyn MessageTransport>,
    source: String,
}

impl Responder {
    pub fn new(transport: Arc<dyn MessageTransport>, source: &str) -> Self {
        Self {
            transport,
            source: source.to_string(),
        }
    }

    /// Starts serving `R`'s workflow. The returned task runs until aborted or
    /// the subscription closes.
    pub async fn serve<R, H>(&self, handler: Arc<H>) -> TransportResult<JoinHandle<()>>
    where
        R: WorkflowRequest + DeserializeOwned + 'static,
        H: RequestHandler<R> + 'static,
    {
        let topics = R::WORKFLOW.topics();
        let mut subscription = self.transport.subscribe(topics.request).await?;
        let transport = self.transport.clone();
        let source = self.source.clone();
        debug!(workflow = %R::WORKFLOW, topic = topics.request, "serving requests");

        Ok(tokio::spawn(async move {
            loop {
                let message = match subscription.recv().await {
                    Ok(message) => message,
                    Err(TransportError::Lagged { count }) => {
                        warn!(topic = topics.request, count, "responder lagged");
                        continue;
                    }
                    Err(_) => break,
                };
                let decoded =
                    RawEvent::decode(&message.payload).and_then(|raw| raw.into_typed::<R>());
                let request = match decoded {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(
                            topic = topics.request,
                            key = %message.key,
                            error = %e,
                            "undecodable request dropped"
                        );
                        continue;
                    }
                };

                let handler = handler.clone();
                let transport = transport.clone();
                let source = source.clone();
                tokio::spawn(async move {
                    let answered =
                        reply(request, handler.as_ref(), transport.as_ref(), &source).await;
                    if let Err(e) = answered {
                        warn!(topic = topics.response, error = %e, "request not answered");
                    }
                });
            }
            debug!(topic = topics.request, "responder stopped");
        }))
    }
}

async fn reply<R, H>(
    request: TypedEvent<R>,
    handler: &H,
    transport: &dyn MessageTransport,
    source: &str,
) -> HandlerResult<()>
where
    R: WorkflowRequest + 'static,
    H: RequestHandler<R> + ?Sized,
{
    let request_envelope = request.envelope.clone();
    let payload = handler.handle(request).await?;
    let envelope = Envelope::reply_to(
        &request_envelope,
        <R::Reply as WorkflowReply>::EVENT_TYPE,
        source,
    )
    .map_err(|e| HandlerError::Reply(e.to_string()))?;
    let bytes = TypedEvent::new(envelope, payload)
        .encode()
        .map_err(|e| HandlerError::Reply(e.to_string()))?;

    transport
        .publish(
            R::WORKFLOW.topics().response,
            Message::new(&request_envelope.correlation_id, bytes),
        )
        .await?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("reply could not be built: {0}")]
    Reply(String),

    #[error("reply could not be published: {0}")]
    Transport(#[from] TransportError),
}

pub type HandlerResult<T> = Result<T, HandlerError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::{
        event_bus::EventBus,
        request_client::{CallError, RequestClient},
        workflows::{ForgotPasswordRequest, ForgotPasswordSendEmail, UserFetch, UserFetched},
    };

    async fn setup() -> (Arc<EventBus>, RequestClient, Responder) {
        let bus = Arc::new(EventBus::new(64));
        let client = RequestClient::new(bus.clone(), "users", Duration::from_secs(2));
        client.start().await.unwrap();
        let responder = Responder::new(bus.clone(), "email");
        (bus, client, responder)
    }

    #[tokio::test]
    async fn test_responder_round_trip() {
        let (_, client, responder) = setup().await;
        let task = responder
            .serve(Arc::new(handler_fn(
                |request: TypedEvent<ForgotPasswordRequest>| async move {
                    Ok::<_, HandlerError>(ForgotPasswordSendEmail {
                        email: request.payload.email,
                        delivered: true,
                    })
                },
            )))
            .await
            .unwrap();

        let reply = client
            .call_with_id(
                "corr-42",
                &ForgotPasswordRequest {
                    email: "a@b.c".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(reply.correlation_id(), "corr-42");
        assert_eq!(reply.envelope.source, "email");
        assert_eq!(reply.envelope.event_type, "ForgotPasswordSendEmailEvent");
        assert!(reply.payload.delivered);
        task.abort();
    }

    #[tokio::test]
    async fn test_failing_handler_publishes_nothing() {
        let (_, client, responder) = setup().await;
        let task = responder
            .serve(Arc::new(handler_fn(|_: TypedEvent<UserFetch>| async move {
                Err::<UserFetched, _>(HandlerError::Failed("user store down".to_string()))
            })))
            .await
            .unwrap();

        let result = client
            .call(
                &UserFetch {
                    user_id: "u-1".to_string(),
                },
                Some(Duration::from_millis(100)),
            )
            .await;
        assert!(matches!(result, Err(CallError::Timeout { .. })));
        task.abort();
    }

    #[tokio::test]
    async fn test_responder_skips_undecodable_requests() {
        let (bus, client, responder) = setup().await;
        let task = responder
            .serve(Arc::new(handler_fn(|request: TypedEvent<UserFetch>| async move {
                Ok::<_, HandlerError>(UserFetched {
                    user_id: request.payload.user_id,
                    user: "{}".to_string(),
                })
            })))
            .await
            .unwrap();

        bus.publish("user.fetch", Message::new("junk", b"[]".to_vec()))
            .await
            .unwrap();

        let reply = client
            .call(
                &UserFetch {
                    user_id: "u-7".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply.user_id, "u-7");
        task.abort();
    }
}
