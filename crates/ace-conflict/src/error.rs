use thiserror::Error;

/// Errors raised by the conflict stack.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("no applicable resolver for conflict {0}")]
    NoApplicableResolver(String),

    #[error("no agreement reached: {0}")]
    NoAgreement(String),

    #[error("bid collection failed: {0}")]
    BidCollection(String),

    #[error("vote collection failed: {0}")]
    VoteCollection(String),

    #[error("detection rule failed: {0}")]
    DetectionRule(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),
}
