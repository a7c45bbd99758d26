//! ACE Conflict - contention detection and arbitration
//!
//! Detects competing demands over shared resources and conflicting task
//! assignments, then arbitrates them through pluggable resolution
//! strategies:
//! - [`Resource`]: capacity-bounded lockable pool with lease expiry
//! - [`ConflictDetector`]: resource/priority/deadline scans plus custom
//!   rules
//! - [`ConflictResolver`] variants: priority table, auction,
//!   negotiation, voting
//! - [`ConflictResolutionManager`]: runs detection, selects resolvers,
//!   applies outcomes as resource leases

pub mod case;
pub mod detector;
pub mod error;
pub mod manager;
pub mod resolver;
pub mod resource;

pub use case::{
    AgentBid, ConflictCase, ConflictKind, ConflictStatus, NegotiationProposal, ProposalKind,
    ResolutionOutcome, ResolutionStrategy,
};
pub use detector::{ConflictDetector, DemandPredicate, DetectionRule, ScheduledTask};
pub use error::ConflictError;
pub use manager::{ConflictConfig, ConflictResolutionManager, ConflictStatistics};
pub use resolver::{
    acceptance_probability, AcceptanceModel, AuctionResolver, BidSource, ConflictResolver,
    FnBidSource, FnVoteSource, NegotiationResolver, PriorityResolver, ThresholdAcceptance,
    VoteSource, VotingResolver,
};
pub use resource::Resource;
