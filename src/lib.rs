//! # eventwire: Request/Reply over a Message Bus
//!
//! Services in the platform only share a publish/subscribe transport, which is
//! asynchronous, at-least-once and unordered. eventwire gives them a
//! synchronous-looking remote call on top of it, and uses that call to choose how
//! events are recommended to a user.
//!
//! ## Building Blocks
//!
//! ### 1. Wire Contract
//! - Common event header and codec ([`event::envelope`])
//! - Fixed workflow to topic table ([`event::topic_registry`])
//! - Typed request/reply payloads ([`event::workflows`])
//!
//! ### 2. Transport
//! - Adapter contract over the bus ([`event::transport`])
//! - In-process implementation ([`event::event_bus`])
//!
//! ### 3. Request/Reply
//! - Pending request table with deadlines ([`event::correlator`])
//! - Caller side ([`event::request_client`])
//! - Remote side ([`event::responder`])
//!
//! ### 4. Scoring
//! - User profile with lenient ranking parse ([`scoring::profile`])
//! - History and profile based strategies ([`scoring::strategy`])
//! - Strategy selection with remote profile fetch ([`scoring::selector`])
//!
//! ## Lifecycle
//!
//! ```text
//! SystemConfig → System::new → start → call / select ... → shutdown
//! ```
//!
//! [`system::System`] wires the pieces for one service and owns their
//! lifecycle. Configuration lives in [`config`] and every module error converts
//! into [`Error`].

pub mod config;
pub mod error;
pub mod event;
pub mod scoring;
pub mod system;
pub mod timestamp;

// Re-exports
pub use error::{Error, Result};
pub use event::request_client::{CallError, RequestClient};
pub use system::System;
