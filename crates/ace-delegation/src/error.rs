use thiserror::Error;

/// Errors raised by the delegation stack.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("task queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("delegation manager is stopped")]
    Stopped,
}
