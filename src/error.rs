use thiserror::Error;

use crate::config::ConfigError;
use crate::event::{
    correlator::CorrelationError, envelope::EnvelopeError, request_client::CallError,
    responder::HandlerError, transport::TransportError,
};
use crate::scoring::{profile::ProfileError, selector::SelectorError};
use crate::system::SystemError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("System error: {0}")]
    System(#[from] SystemError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    // event layer
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),
    #[error("Call error: {0}")]
    Call(#[from] CallError),
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
    // scoring
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),
}

pub type Result<T> = std::result::Result<T, Error>;
