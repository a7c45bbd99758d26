//! Agent scoring and selection.

use ace_protocol::{AgentProfile, DelegationResult, TaskRequest};

/// Scoring mode for the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchingStrategy {
    /// Capability coverage plus a bounded versatility bonus.
    CapabilityBased,
    /// Blend of performance and reliability scores.
    PerformanceBased,
    /// Prefer the least-loaded eligible agent.
    LoadBalanced,
    /// Weighted blend of all three, scaled by task priority.
    #[default]
    Hybrid,
}

/// Weights for the hybrid score. Must be meaningful as a convex blend;
/// the defaults sum to 1.
#[derive(Debug, Clone, Copy)]
pub struct MatcherWeights {
    pub capability: f64,
    pub performance: f64,
    pub load: f64,
}

impl Default for MatcherWeights {
    fn default() -> Self {
        Self {
            capability: 0.4,
            performance: 0.4,
            load: 0.2,
        }
    }
}

/// Scores and selects the best agent for a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentMatcher {
    pub strategy: MatchingStrategy,
    pub weights: MatcherWeights,
}

impl AgentMatcher {
    pub fn new(strategy: MatchingStrategy) -> Self {
        Self {
            strategy,
            weights: MatcherWeights::default(),
        }
    }

    /// Pick the best eligible agent, or None when no candidate has the
    /// required capabilities and free capacity. Ties break toward the
    /// earlier candidate.
    pub fn find_best_agent(
        &self,
        task: &TaskRequest,
        candidates: &[AgentProfile],
    ) -> Option<DelegationResult> {
        let mut scored: Vec<(&AgentProfile, f64)> = Vec::new();

        for agent in candidates {
            if !agent.is_available() {
                continue;
            }
            if !task
                .required_capabilities
                .iter()
                .all(|c| agent.capabilities.contains(c))
            {
                continue;
            }
            scored.push((agent, self.score(task, agent)));
        }

        if scored.is_empty() {
            return None;
        }

        let mut best = 0usize;
        for (i, (_, score)) in scored.iter().enumerate().skip(1) {
            if *score > scored[best].1 {
                best = i;
            }
        }
        let (winner, assignment_score) = scored[best];

        // Runners-up, best first; stable sort keeps input order on ties.
        let mut backups: Vec<(&AgentProfile, f64)> = scored
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best)
            .map(|(_, entry)| *entry)
            .collect();
        backups.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Some(DelegationResult {
            task_id: task.task_id.clone(),
            assigned_agent: winner.agent_id.clone(),
            assignment_score,
            backup_agents: backups
                .into_iter()
                .take(2)
                .map(|(agent, _)| agent.agent_id.clone())
                .collect(),
        })
    }

    fn score(&self, task: &TaskRequest, agent: &AgentProfile) -> f64 {
        match self.strategy {
            MatchingStrategy::CapabilityBased => self.capability_score(task, agent),
            MatchingStrategy::PerformanceBased => performance_score(agent),
            MatchingStrategy::LoadBalanced => 1.0 - agent.load_factor(),
            MatchingStrategy::Hybrid => {
                let blended = self.weights.capability * self.capability_score(task, agent)
                    + self.weights.performance * performance_score(agent)
                    + self.weights.load * (1.0 - agent.load_factor());
                blended * task.priority.weight()
            }
        }
    }

    /// Coverage of required capabilities plus a versatility bonus for
    /// extra capabilities, capped at 0.5.
    fn capability_score(&self, task: &TaskRequest, agent: &AgentProfile) -> f64 {
        let required = task.required_capabilities.len().max(1) as f64;
        let covered = task
            .required_capabilities
            .iter()
            .filter(|c| agent.capabilities.contains(*c))
            .count() as f64;
        let extra = agent
            .capabilities
            .len()
            .saturating_sub(task.required_capabilities.len()) as f64;
        covered / required + (extra * 0.1).min(0.5)
    }
}

fn performance_score(agent: &AgentProfile) -> f64 {
    agent.performance_score * 0.6 + agent.reliability_score * 0.4
}
