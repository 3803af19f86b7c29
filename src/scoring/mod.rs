//! # Event Recommendation Scoring
//!
//! Strategies that score candidate events for a user, and the selector that
//! chooses one. A user with local participation history is scored from that
//! history. A user without history is scored from the profile fetched from the
//! users service over the `user-fetch` workflow.
//!
//! ```rust,no_run
//! # use eventwire::scoring::{selector::StrategySelector, strategy::ScoringStrategy};
//! # use eventwire::event::request_client::RequestClient;
//! # use std::sync::Arc;
//! # async fn example(client: Arc<RequestClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let strategy = StrategySelector::new(client).select("u-1", &[]).await?;
//! println!("using {} strategy", strategy.name());
//! # Ok(())
//! # }
//! ```

pub mod profile;
pub mod selector;
pub mod strategy;
