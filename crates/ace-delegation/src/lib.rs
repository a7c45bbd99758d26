//! ACE Delegation - task decomposition, matching, and scheduling
//!
//! The delegation stack turns submitted [`ace_protocol::TaskRequest`]s
//! into dispatched work:
//! - [`TaskDecomposer`] splits composite tasks into ordered or parallel
//!   subtasks
//! - [`AgentMatcher`] scores registered agents against a task's
//!   requirements
//! - [`DelegationManager`] owns the priority queue and drives the
//!   assignment, timeout/retry, and completion lifecycle

pub mod decomposer;
pub mod error;
pub mod executor;
pub mod manager;
pub mod matcher;

pub use decomposer::{DecompositionStrategy, TaskDecomposer};
pub use error::DelegationError;
pub use executor::{Executor, FnExecutor, PendingExecutor};
pub use manager::{DelegationConfig, DelegationManager, DelegationStatus};
pub use matcher::{AgentMatcher, MatcherWeights, MatchingStrategy};
