//! Conflict case model and resolution artifacts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use ace_protocol::AgentId;

/// Category of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ResourceCompetition,
    TaskPriority,
    CapabilityOverlap,
    DeadlineConflict,
    DependencyCycle,
    AuthorityDispute,
}

/// Lifecycle of a conflict case:
/// detected → analyzing → resolving → {resolved | escalated | failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    #[default]
    Detected,
    Analyzing,
    Resolving,
    Resolved,
    Escalated,
    Failed,
}

/// Arbitration strategy applied to a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    PriorityBased,
    FirstComeFirstServe,
    RoundRobin,
    Auction,
    Negotiation,
    Voting,
    Arbitration,
}

/// One detected instance of agents competing over resources, priority
/// slots, or deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCase {
    pub conflict_id: String,
    pub kind: ConflictKind,
    pub involved_agents: Vec<AgentId>,
    pub contested_resources: Vec<String>,
    pub description: String,
    /// Urgency 1–10; 10 is most urgent.
    pub priority: u8,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub strategy: Option<ResolutionStrategy>,
    pub outcome: Option<ResolutionOutcome>,
}

impl ConflictCase {
    pub fn new(
        kind: ConflictKind,
        involved_agents: Vec<AgentId>,
        contested_resources: Vec<String>,
        description: impl Into<String>,
        priority: u8,
    ) -> Self {
        Self {
            conflict_id: Uuid::new_v4().to_string(),
            kind,
            involved_agents,
            contested_resources,
            description: description.into(),
            priority,
            status: ConflictStatus::Detected,
            created_at: Utc::now(),
            resolved_at: None,
            strategy: None,
            outcome: None,
        }
    }
}

/// One agent's bid for a contested resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBid {
    pub agent_id: AgentId,
    pub resource_id: String,
    pub amount: f64,
    /// Declared urgency 1–10.
    pub priority: u8,
    #[serde(default)]
    pub justification: String,
}

/// Shape of a negotiation proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    /// Time-share the contested resource across the parties.
    ResourceSharing,
    /// Swap task priorities, compensating the yielding party later.
    TaskSwap,
}

/// A proposal one party offers the others during negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationProposal {
    pub proposal_id: String,
    pub proposer: AgentId,
    pub target_agents: Vec<AgentId>,
    pub kind: ProposalKind,
    #[serde(default)]
    pub terms: Map<String, Value>,
    /// Declared benefit per agent, used by the acceptance model.
    #[serde(default)]
    pub benefits: HashMap<AgentId, f64>,
    /// Per-target accept/reject decisions, filled during negotiation.
    #[serde(default)]
    pub responses: HashMap<AgentId, bool>,
}

impl NegotiationProposal {
    pub fn new(proposer: AgentId, target_agents: Vec<AgentId>, kind: ProposalKind) -> Self {
        Self {
            proposal_id: Uuid::new_v4().to_string(),
            proposer,
            target_agents,
            kind,
            terms: Map::new(),
            benefits: HashMap::new(),
            responses: HashMap::new(),
        }
    }
}

/// Typed result of a resolution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub strategy: ResolutionStrategy,
    /// The party granted the contested resources, when one exists.
    /// Negotiated agreements have no single winner.
    pub winner: Option<AgentId>,
    /// Full ordering produced by priority-based resolution.
    #[serde(default)]
    pub ordering: Vec<AgentId>,
    pub winning_bid: Option<f64>,
    #[serde(default)]
    pub bids: Vec<AgentBid>,
    pub agreement: Option<NegotiationProposal>,
    /// Vote tallies per option.
    #[serde(default)]
    pub votes: HashMap<String, usize>,
    pub reasoning: String,
}

impl ResolutionOutcome {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            winner: None,
            ordering: Vec::new(),
            winning_bid: None,
            bids: Vec::new(),
            agreement: None,
            votes: HashMap::new(),
            reasoning: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_starts_detected() {
        let case = ConflictCase::new(
            ConflictKind::ResourceCompetition,
            vec![AgentId::new("a"), AgentId::new("b")],
            vec!["db".into()],
            "two agents want the database",
            7,
        );
        assert_eq!(case.status, ConflictStatus::Detected);
        assert!(case.resolved_at.is_none());
        assert!(case.outcome.is_none());
    }

    #[test]
    fn test_case_serialization_roundtrip() {
        let mut case = ConflictCase::new(
            ConflictKind::DeadlineConflict,
            vec![AgentId::new("a")],
            vec![],
            "task cannot meet deadline",
            8,
        );
        case.status = ConflictStatus::Resolved;
        case.strategy = Some(ResolutionStrategy::PriorityBased);

        let json = serde_json::to_string(&case).unwrap();
        let restored: ConflictCase = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.kind, ConflictKind::DeadlineConflict);
        assert_eq!(restored.status, ConflictStatus::Resolved);
        assert_eq!(restored.strategy, Some(ResolutionStrategy::PriorityBased));
    }
}
