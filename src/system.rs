use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::SystemConfig,
    event::{
        event_bus::EventBus,
        request_client::{CallResult, RequestClient},
        responder::{RequestHandler, Responder},
        transport::{MessageTransport, TransportResult},
        workflows::WorkflowRequest,
    },
    scoring::selector::StrategySelector,
};

/// One service's view of the bus: a request client for outbound calls and the
/// responders it serves for inbound ones.
pub struct System {
    transport: Arc<dyn MessageTransport>,
    client: Arc<RequestClient>,
    responder: Responder,
    served: Mutex<Vec<JoinHandle<()>>>,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl System {
    pub fn new(config: &SystemConfig, transport: Arc<dyn MessageTransport>) -> Self {
        let client = Arc::new(RequestClient::new(
            transport.clone(),
            &config.service_name,
            config.request_timeout,
        ));
        let responder = Responder::new(transport.clone(), &config.service_name);
        Self {
            transport,
            client,
            responder,
            served: Mutex::new(Vec::new()),
            request_timeout: config.request_timeout,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// A system on a fresh in-process bus sized by `event_buffer_size`.
    pub fn in_memory(config: &SystemConfig) -> Self {
        Self::new(config, Arc::new(EventBus::new(config.event_buffer_size)))
    }

    /// Subscribes to every workflow's response topic.
    pub async fn start(&self) -> CallResult<()> {
        self.client.start().await?;
        info!(source = %self.client.source(), "system started");
        Ok(())
    }

    pub fn transport(&self) -> Arc<dyn MessageTransport> {
        self.transport.clone()
    }

    pub fn client(&self) -> Arc<RequestClient> {
        self.client.clone()
    }

    pub fn selector(&self) -> StrategySelector {
        StrategySelector::new(self.client.clone()).with_timeout(self.request_timeout)
    }

    /// Serves `R`'s workflow until shutdown.
    pub async fn serve<R, H>(&self, handler: Arc<H>) -> TransportResult<()>
    where
        R: WorkflowRequest + DeserializeOwned + 'static,
        H: RequestHandler<R> + 'static,
    {
        let task = self.responder.serve::<R, H>(handler).await?;
        self.served.lock().await.push(task);
        Ok(())
    }

    /// Fails in-flight calls, then stops dispatchers and responders.
    pub async fn shutdown(&self) -> SystemResult<()> {
        let served: Vec<JoinHandle<()>> = self.served.lock().await.drain(..).collect();
        for task in &served {
            task.abort();
        }
        let stop = async {
            futures::future::join_all(served).await;
            self.client.shutdown().await;
        };
        tokio::time::timeout(self.shutdown_timeout, stop)
            .await
            .map_err(|_| {
                warn!(timeout = ?self.shutdown_timeout, "shutdown did not finish in time");
                SystemError::ShutdownTimeout(self.shutdown_timeout)
            })?;
        info!("system stopped");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

pub type SystemResult<T> = Result<T, SystemError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        envelope::TypedEvent,
        request_client::CallError,
        responder::{HandlerError, handler_fn},
        workflows::{NotificationSend, NotificationSendRequest, UserFetch},
    };

    fn config() -> SystemConfig {
        SystemConfig {
            service_name: "events".to_string(),
            event_buffer_size: 32,
            request_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_served_workflow_is_callable() {
        let system = System::in_memory(&config());
        system.start().await.unwrap();
        system
            .serve(Arc::new(handler_fn(
                |request: TypedEvent<NotificationSendRequest>| async move {
                    Ok::<_, HandlerError>(NotificationSend {
                        user_id: request.payload.user_id,
                        delivered: true,
                    })
                },
            )))
            .await
            .unwrap();

        let reply = system
            .client()
            .call(
                &NotificationSendRequest {
                    user_id: "u-1".to_string(),
                    title: "hi".to_string(),
                    body: "there".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert!(reply.delivered);

        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_calls() {
        let system = Arc::new(System::in_memory(&config()));
        system.start().await.unwrap();

        let caller = {
            let client = system.client();
            tokio::spawn(async move {
                client
                    .call(
                        &UserFetch {
                            user_id: "u-1".to_string(),
                        },
                        Some(Duration::from_secs(30)),
                    )
                    .await
            })
        };
        while system.client().correlator().pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        system.shutdown().await.unwrap();
        let result = caller.await.unwrap();
        assert!(matches!(result, Err(CallError::Cancelled(_))));
    }
}
