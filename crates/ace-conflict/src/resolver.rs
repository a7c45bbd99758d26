//! Resolution strategies.
//!
//! Each strategy is one implementation of [`ConflictResolver`]; new
//! strategies are added by implementing the trait and registering an
//! instance with the manager, not by editing a dispatch table. The
//! inputs a strategy needs from the outside world (bids, votes,
//! acceptance decisions) come through the pluggable [`BidSource`],
//! [`VoteSource`], and [`AcceptanceModel`] seams, so a deployment can
//! solicit them over the communication protocol while tests inject
//! closures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use ace_protocol::AgentId;

use crate::case::{
    AgentBid, ConflictCase, ConflictKind, NegotiationProposal, ProposalKind, ResolutionOutcome,
    ResolutionStrategy,
};
use crate::error::ConflictError;

/// Resolves one conflict case.
pub trait ConflictResolver: Send + Sync {
    fn strategy(&self) -> ResolutionStrategy;

    fn can_resolve(&self, case: &ConflictCase) -> bool;

    fn resolve<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<ResolutionOutcome, ConflictError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Priority-based
// ---------------------------------------------------------------------------

/// Orders the involved agents by a pre-registered priority table;
/// highest wins.
pub struct PriorityResolver {
    priorities: HashMap<AgentId, i32>,
}

impl PriorityResolver {
    pub fn new(priorities: HashMap<AgentId, i32>) -> Self {
        Self { priorities }
    }

    pub fn set_priority(&mut self, agent: AgentId, priority: i32) {
        self.priorities.insert(agent, priority);
    }
}

impl ConflictResolver for PriorityResolver {
    fn strategy(&self) -> ResolutionStrategy {
        ResolutionStrategy::PriorityBased
    }

    fn can_resolve(&self, case: &ConflictCase) -> bool {
        !case.involved_agents.is_empty()
            && matches!(
                case.kind,
                ConflictKind::ResourceCompetition | ConflictKind::TaskPriority
            )
    }

    fn resolve<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<ResolutionOutcome, ConflictError>> + Send + 'a>> {
        Box::pin(async move {
            // Stable sort keeps first-seen order among equal priorities.
            let mut ordering = case.involved_agents.clone();
            ordering.sort_by_key(|agent| {
                std::cmp::Reverse(self.priorities.get(agent).copied().unwrap_or(0))
            });

            let Some(winner) = ordering.first().cloned() else {
                return Err(ConflictError::NoAgreement("no agents involved".into()));
            };
            let mut outcome = ResolutionOutcome::new(self.strategy());
            outcome.reasoning = format!(
                "agent priority order: {}",
                ordering
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(" > ")
            );
            outcome.winner = Some(winner);
            outcome.ordering = ordering;
            Ok(outcome)
        })
    }
}

// ---------------------------------------------------------------------------
// Auction-based
// ---------------------------------------------------------------------------

/// Collects one bid per involved agent.
pub trait BidSource: Send + Sync {
    fn collect_bids<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AgentBid>, ConflictError>> + Send + 'a>>;
}

/// Closure-backed bid source.
pub struct FnBidSource<F>(pub F);

impl<F> BidSource for FnBidSource<F>
where
    F: Fn(&ConflictCase) -> Result<Vec<AgentBid>, ConflictError> + Send + Sync,
{
    fn collect_bids<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AgentBid>, ConflictError>> + Send + 'a>> {
        let bids = (self.0)(case);
        Box::pin(async move { bids })
    }
}

/// The highest bid wins; ties break toward the bid seen first.
pub struct AuctionResolver {
    bid_source: Box<dyn BidSource>,
}

impl AuctionResolver {
    pub fn new(bid_source: Box<dyn BidSource>) -> Self {
        Self { bid_source }
    }
}

impl ConflictResolver for AuctionResolver {
    fn strategy(&self) -> ResolutionStrategy {
        ResolutionStrategy::Auction
    }

    fn can_resolve(&self, case: &ConflictCase) -> bool {
        case.kind == ConflictKind::ResourceCompetition && !case.involved_agents.is_empty()
    }

    fn resolve<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<ResolutionOutcome, ConflictError>> + Send + 'a>> {
        Box::pin(async move {
            let bids = self.bid_source.collect_bids(case).await?;
            if bids.is_empty() {
                return Err(ConflictError::NoAgreement("no bids received".into()));
            }

            let mut best = 0usize;
            for (i, bid) in bids.iter().enumerate().skip(1) {
                if bid.amount > bids[best].amount {
                    best = i;
                }
            }
            let winning = &bids[best];

            let mut outcome = ResolutionOutcome::new(self.strategy());
            outcome.winner = Some(winning.agent_id.clone());
            outcome.winning_bid = Some(winning.amount);
            outcome.reasoning = format!(
                "highest bid {} from {}",
                winning.amount, winning.agent_id
            );
            outcome.bids = bids;
            Ok(outcome)
        })
    }
}

// ---------------------------------------------------------------------------
// Negotiation-based
// ---------------------------------------------------------------------------

/// Decides whether a target agent accepts a proposal.
pub trait AcceptanceModel: Send + Sync {
    fn accepts(&self, proposal: &NegotiationProposal, agent: &AgentId) -> bool;
}

/// Acceptance likelihood of a proposal for one agent: base 0.5, plus
/// 0.3 for resource sharing or 0.2 for a task swap, plus up to 0.3
/// scaled by the declared benefit.
pub fn acceptance_probability(proposal: &NegotiationProposal, agent: &AgentId) -> f64 {
    let mut probability: f64 = 0.5;
    probability += match proposal.kind {
        ProposalKind::ResourceSharing => 0.3,
        ProposalKind::TaskSwap => 0.2,
    };
    let benefit = proposal.benefits.get(agent).copied().unwrap_or(0.0);
    if benefit > 0.0 {
        probability += (benefit / 100.0).min(0.3);
    }
    probability.min(1.0)
}

/// Deterministic acceptance: the probability formula against a fixed
/// threshold. Resource-sharing proposals pass by default; task swaps
/// need a declared benefit.
pub struct ThresholdAcceptance {
    pub threshold: f64,
}

impl Default for ThresholdAcceptance {
    fn default() -> Self {
        Self { threshold: 0.75 }
    }
}

impl AcceptanceModel for ThresholdAcceptance {
    fn accepts(&self, proposal: &NegotiationProposal, agent: &AgentId) -> bool {
        acceptance_probability(proposal, agent) >= self.threshold
    }
}

const SHARING_SLOTS: [&str; 3] = ["09:00-12:00", "12:00-15:00", "15:00-18:00"];

/// Generates one proposal per party; the first proposal every target
/// accepts wins.
pub struct NegotiationResolver {
    acceptance: Box<dyn AcceptanceModel>,
}

impl NegotiationResolver {
    pub fn new(acceptance: Box<dyn AcceptanceModel>) -> Self {
        Self { acceptance }
    }

    fn generate_proposals(&self, case: &ConflictCase) -> Vec<NegotiationProposal> {
        case.involved_agents
            .iter()
            .map(|proposer| {
                let targets: Vec<AgentId> = case
                    .involved_agents
                    .iter()
                    .filter(|a| *a != proposer)
                    .cloned()
                    .collect();
                let mut proposal = match case.kind {
                    ConflictKind::ResourceCompetition => {
                        let mut proposal = NegotiationProposal::new(
                            proposer.clone(),
                            targets,
                            ProposalKind::ResourceSharing,
                        );
                        if let Some(resource_id) = case.contested_resources.first() {
                            proposal
                                .terms
                                .insert("resource_id".into(), Value::String(resource_id.clone()));
                        }
                        let mut schedule = serde_json::Map::new();
                        for (slot, agent) in SHARING_SLOTS.iter().zip(case.involved_agents.iter()) {
                            schedule.insert(
                                slot.to_string(),
                                Value::Array(vec![Value::String(agent.to_string())]),
                            );
                        }
                        proposal
                            .terms
                            .insert("sharing_schedule".into(), Value::Object(schedule));
                        proposal
                    }
                    _ => {
                        let mut proposal = NegotiationProposal::new(
                            proposer.clone(),
                            targets,
                            ProposalKind::TaskSwap,
                        );
                        proposal.terms.insert(
                            "swap_type".into(),
                            Value::String("priority_adjustment".into()),
                        );
                        proposal.terms.insert(
                            "compensation".into(),
                            Value::String("future_priority_boost".into()),
                        );
                        proposal
                    }
                };
                proposal
                    .terms
                    .insert("duration".into(), Value::String("flexible".into()));
                proposal
            })
            .collect()
    }
}

impl ConflictResolver for NegotiationResolver {
    fn strategy(&self) -> ResolutionStrategy {
        ResolutionStrategy::Negotiation
    }

    fn can_resolve(&self, case: &ConflictCase) -> bool {
        case.involved_agents.len() >= 2
    }

    fn resolve<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<ResolutionOutcome, ConflictError>> + Send + 'a>> {
        Box::pin(async move {
            let proposals = self.generate_proposals(case);
            for mut proposal in proposals {
                let mut accepted = 0usize;
                let targets = proposal.target_agents.clone();
                for target in &targets {
                    let accepts = self.acceptance.accepts(&proposal, target);
                    proposal.responses.insert(target.clone(), accepts);
                    if accepts {
                        accepted += 1;
                    }
                }
                if accepted == proposal.target_agents.len() {
                    let mut outcome = ResolutionOutcome::new(self.strategy());
                    outcome.reasoning = format!(
                        "proposal from {} accepted by all {} targets",
                        proposal.proposer, accepted
                    );
                    outcome.agreement = Some(proposal);
                    return Ok(outcome);
                }
            }
            Err(ConflictError::NoAgreement(
                "no proposal was unanimously accepted".into(),
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Voting-based
// ---------------------------------------------------------------------------

/// Collects one vote per involved agent over the offered options.
pub trait VoteSource: Send + Sync {
    fn collect_votes<'a>(
        &'a self,
        case: &'a ConflictCase,
        options: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<AgentId, String>, ConflictError>> + Send + 'a>>;
}

/// Closure-backed vote source.
pub struct FnVoteSource<F>(pub F);

impl<F> VoteSource for FnVoteSource<F>
where
    F: Fn(&ConflictCase, &[String]) -> Result<HashMap<AgentId, String>, ConflictError>
        + Send
        + Sync,
{
    fn collect_votes<'a>(
        &'a self,
        case: &'a ConflictCase,
        options: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<AgentId, String>, ConflictError>> + Send + 'a>>
    {
        let votes = (self.0)(case, options);
        Box::pin(async move { votes })
    }
}

/// The most-voted option wins; ties break by option enumeration order.
pub struct VotingResolver {
    vote_source: Box<dyn VoteSource>,
}

impl VotingResolver {
    pub fn new(vote_source: Box<dyn VoteSource>) -> Self {
        Self { vote_source }
    }

    fn options_for(case: &ConflictCase) -> Vec<String> {
        match case.kind {
            ConflictKind::ResourceCompetition => case
                .involved_agents
                .iter()
                .map(|a| a.to_string())
                .collect(),
            ConflictKind::TaskPriority => vec![
                "keep_current_order".into(),
                "swap_priorities".into(),
                "equal_share".into(),
            ],
            _ => vec!["defer".into(), "split".into(), "escalate".into()],
        }
    }
}

impl ConflictResolver for VotingResolver {
    fn strategy(&self) -> ResolutionStrategy {
        ResolutionStrategy::Voting
    }

    fn can_resolve(&self, case: &ConflictCase) -> bool {
        case.involved_agents.len() >= 3
    }

    fn resolve<'a>(
        &'a self,
        case: &'a ConflictCase,
    ) -> Pin<Box<dyn Future<Output = Result<ResolutionOutcome, ConflictError>> + Send + 'a>> {
        Box::pin(async move {
            let options = Self::options_for(case);
            let votes = self.vote_source.collect_votes(case, &options).await?;
            if votes.is_empty() {
                return Err(ConflictError::NoAgreement("no votes received".into()));
            }

            let mut tallies: HashMap<String, usize> =
                options.iter().map(|o| (o.clone(), 0)).collect();
            for choice in votes.values() {
                if let Some(count) = tallies.get_mut(choice) {
                    *count += 1;
                }
            }

            // Enumeration order breaks ties.
            let mut winner = options[0].clone();
            let mut best = tallies.get(&winner).copied().unwrap_or(0);
            for option in &options[1..] {
                let count = tallies.get(option).copied().unwrap_or(0);
                if count > best {
                    winner = option.clone();
                    best = count;
                }
            }

            let mut outcome = ResolutionOutcome::new(self.strategy());
            outcome.reasoning = format!("option '{winner}' won with {best} votes");
            // When the options are the contenders themselves, the vote
            // picks a winning agent.
            if case.kind == ConflictKind::ResourceCompetition {
                outcome.winner = Some(AgentId::new(winner.clone()));
            }
            outcome.votes = tallies;
            Ok(outcome)
        })
    }
}
