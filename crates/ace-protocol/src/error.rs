use thiserror::Error;

/// Errors raised by the protocol crate.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}
