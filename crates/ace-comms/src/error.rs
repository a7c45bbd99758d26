use thiserror::Error;

use ace_protocol::ProtocolError;

/// Errors raised by the communication stack.
#[derive(Debug, Error)]
pub enum CommsError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("no route to receiver {0}")]
    NoRoute(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol stopped")]
    Stopped,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
