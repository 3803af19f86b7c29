//! # Cross-Service Request/Reply
//!
//! Services talk over a publish/subscribe transport that is asynchronous,
//! at-least-once and unordered. This module builds a synchronous-looking remote
//! call on top of it.
//!
//! ## Architecture Overview
//!
//! - **Envelope**: Common header on every message (`envelope`)
//! - **TopicRegistry**: Fixed workflow name to channel name table (`topic_registry`)
//! - **MessageTransport**: Adapter contract over the bus (`transport`), with the
//!   in-process `EventBus` as one implementation (`event_bus`)
//! - **Correlator**: Matches replies to waiting callers (`correlator`)
//! - **RequestClient**: `call(request) -> reply` (`request_client`)
//! - **Responder**: Serves the other end of a workflow (`responder`)
//!
//! ## Request-Reply Flow
//!
//! ```text
//! ┌─────────────┐  request topic   ┌──────────┐
//! │RequestClient│─────────────────▶│Responder │
//! └──────┬──────┘                  └────┬─────┘
//!        │                              │
//!   ┌────▼─────┐   response topic       │
//!   │Correlator│◀───────────────────────┘
//!   └──────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! # use eventwire::event::{event_bus::EventBus, request_client::RequestClient};
//! # use eventwire::event::workflows::UserFetch;
//! # use std::{sync::Arc, time::Duration};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(EventBus::new(100));
//! let client = RequestClient::new(bus, "events", Duration::from_secs(6));
//! client.start().await?;
//!
//! let reply = client
//!     .call(&UserFetch { user_id: "u-1".to_string() }, None)
//!     .await?;
//! println!("profile: {}", reply.user);
//! # Ok(())
//! # }
//! ```

pub mod correlator;
pub mod envelope;
pub mod event_bus;
pub mod request_client;
pub mod responder;
pub mod topic_registry;
pub mod transport;
pub mod workflows;
