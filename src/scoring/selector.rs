//! # Strategy Selector
//!
//! Picks how events get recommended to a user:
//!
//! - Non-empty local history: history-based strategy, built locally with no
//!   remote call.
//! - Empty history: fetch the user's profile over the `user-fetch` workflow and
//!   build a profile-based strategy from it.
//!
//! Call errors, timeouts included, are returned as-is. The selector never
//! retries.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{
    profile::UserProfile,
    strategy::{HistoryBasedStrategy, ParticipatedEvent, ProfileBasedStrategy, Strategy},
};
use crate::event::{
    request_client::{CallError, RequestClient},
    workflows::UserFetch,
};

#[derive(Clone)]
pub struct StrategySelector {
    client: Arc<RequestClient>,
    timeout: Option<Duration>,
}

impl StrategySelector {
    /// Profile fetches use the client's default timeout.
    pub fn new(client: Arc<RequestClient>) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// # Errors
    ///
    /// * `SelectorError::Call` - The profile fetch failed or timed out
    /// * `SelectorError::MalformedProfile` - The profile document is not valid JSON
    #[instrument(skip(self, history), fields(history_len = history.len()))]
    pub async fn select(
        &self,
        user_id: &str,
        history: &[ParticipatedEvent],
    ) -> SelectorResult<Strategy> {
        if !history.is_empty() {
            debug!("selected history-based strategy");
            return Ok(Strategy::History(HistoryBasedStrategy::new(history)));
        }

        let reply = self
            .client
            .call(
                &UserFetch {
                    user_id: user_id.to_string(),
                },
                self.timeout,
            )
            .await?;

        let profile = UserProfile::from_json(&reply.user).map_err(|e| {
            warn!(error = %e, "user profile could not be parsed");
            SelectorError::MalformedProfile {
                user_id: user_id.to_string(),
                message: e.to_string(),
            }
        })?;
        debug!(
            preferences = profile.sports_of_preference.len(),
            "selected profile-based strategy"
        );
        Ok(Strategy::Profile(ProfileBasedStrategy::new(&profile)))
    }
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("profile for user {user_id} is malformed: {message}")]
    MalformedProfile { user_id: String, message: String },
}

pub type SelectorResult<T> = Result<T, SelectorError>;

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::{
        event::{
            envelope::TypedEvent,
            event_bus::EventBus,
            responder::{HandlerError, Responder, handler_fn},
            transport::MockMessageTransport,
            workflows::UserFetched,
        },
        scoring::{
            profile::Ranking,
            strategy::{CandidateEvent, ScoringStrategy},
        },
    };

    fn history(n: usize) -> Vec<ParticipatedEvent> {
        (0..n)
            .map(|i| ParticipatedEvent {
                event_id: format!("e-{i}"),
                sport: "tennis".to_string(),
                level: Ranking::Intermediate,
            })
            .collect()
    }

    async fn serve_profile(bus: Arc<EventBus>, document: &'static str, delay: Duration) {
        let responder = Responder::new(bus, "users");
        responder
            .serve(Arc::new(handler_fn(
                move |request: TypedEvent<UserFetch>| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, HandlerError>(UserFetched {
                        user_id: request.payload.user_id,
                        user: document.to_string(),
                    })
                },
            )))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_history_selects_without_transport() {
        let mut transport = MockMessageTransport::new();
        transport.expect_publish().never();
        transport.expect_subscribe().never();
        let client = Arc::new(RequestClient::new(
            Arc::new(transport),
            "events",
            Duration::from_secs(6),
        ));

        let strategy = StrategySelector::new(client)
            .select("u-1", &history(3))
            .await
            .unwrap();

        match strategy {
            Strategy::History(s) => assert_eq!(s.events_considered(), 3),
            other => panic!("expected history strategy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_history_fetches_profile() {
        let bus = Arc::new(EventBus::new(64));
        serve_profile(
            bus.clone(),
            r#"{"profile":{"sportsOfPreference":[{"name":"Tennis","ranking":"ADVANCED"},{"name":"Golf","ranking":"EXPERT"}]}}"#,
            Duration::from_millis(50),
        )
        .await;
        let client = Arc::new(RequestClient::new(bus, "events", Duration::from_secs(6)));
        client.start().await.unwrap();

        let strategy = StrategySelector::new(client)
            .with_timeout(Duration::from_millis(100))
            .select("u-1", &[])
            .await
            .unwrap();

        let Strategy::Profile(profile) = &strategy else {
            panic!("expected profile strategy, got {strategy:?}");
        };
        assert_eq!(profile.ranking_for("tennis"), Some(Ranking::Advanced));
        assert_eq!(profile.ranking_for("golf"), Some(Ranking::Beginner));

        let ranked = strategy.rank(&[
            CandidateEvent {
                event_id: "golf".to_string(),
                sport: "golf".to_string(),
                level: Ranking::Advanced,
            },
            CandidateEvent {
                event_id: "tennis".to_string(),
                sport: "tennis".to_string(),
                level: Ranking::Advanced,
            },
        ]);
        assert_eq!(ranked[0].event.event_id, "tennis");
    }

    #[tokio::test]
    async fn test_missing_reply_times_out() {
        let bus = Arc::new(EventBus::new(64));
        let client = Arc::new(RequestClient::new(bus, "events", Duration::from_secs(6)));
        client.start().await.unwrap();

        let started = Instant::now();
        let result = StrategySelector::new(client)
            .with_timeout(Duration::from_millis(200))
            .select("u-1", &[])
            .await;
        let elapsed = started.elapsed();

        assert!(matches!(
            result,
            Err(SelectorError::Call(CallError::Timeout { .. }))
        ));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_malformed_profile_fails_selection() {
        let bus = Arc::new(EventBus::new(64));
        serve_profile(bus.clone(), "{\"profile\": ", Duration::ZERO).await;
        let client = Arc::new(RequestClient::new(bus, "events", Duration::from_secs(2)));
        client.start().await.unwrap();

        let result = StrategySelector::new(client).select("u-9", &[]).await;

        match result {
            Err(SelectorError::MalformedProfile { user_id, .. }) => assert_eq!(user_id, "u-9"),
            other => panic!("expected malformed profile, got {other:?}"),
        }
    }
}
