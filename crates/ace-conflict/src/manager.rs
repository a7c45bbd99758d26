//! The conflict resolution manager.
//!
//! Owns the resource registry, runs detection, picks the first
//! applicable resolver in registration order (urgent cases prefer fast
//! strategies), and applies successful outcomes as time-bounded
//! resource leases. A failed or escalated case leaves its contested
//! resources unreserved: visibility for an operator, never a silent
//! grant to either side.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use ace_protocol::{
    AgentId, DEFAULT_RESOLUTION_TIMEOUT_SECS, DEFAULT_RESOURCE_LEASE_SECS,
};

use crate::case::{ConflictCase, ConflictStatus, ResolutionOutcome, ResolutionStrategy};
use crate::detector::{ConflictDetector, ScheduledTask};
use crate::resolver::ConflictResolver;
use crate::resource::Resource;

/// Tunables for the conflict manager.
#[derive(Debug, Clone)]
pub struct ConflictConfig {
    /// Budget for a single resolution attempt; expiry escalates.
    pub resolution_timeout: Duration,
    /// Lease granted on contested resources to a resolution winner.
    pub resource_lease: Duration,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            resolution_timeout: Duration::from_secs(DEFAULT_RESOLUTION_TIMEOUT_SECS),
            resource_lease: Duration::from_secs(DEFAULT_RESOURCE_LEASE_SECS),
        }
    }
}

/// Aggregate conflict counters.
#[derive(Debug, Clone, Default)]
pub struct ConflictStats {
    pub total_conflicts: u64,
    pub resolved_conflicts: u64,
    pub failed_resolutions: u64,
    pub escalated_conflicts: u64,
    pub strategy_counts: HashMap<ResolutionStrategy, u64>,
}

/// Snapshot of the manager's observable state.
#[derive(Debug, Clone)]
pub struct ConflictStatistics {
    pub stats: ConflictStats,
    pub active_conflicts: usize,
    pub total_resources: usize,
    pub available_resolvers: usize,
}

/// Detects and arbitrates contention across the system.
pub struct ConflictResolutionManager {
    config: ConflictConfig,
    detector: ConflictDetector,
    resolvers: Vec<Box<dyn ConflictResolver>>,
    resources: HashMap<String, Resource>,
    active: HashMap<String, ConflictCase>,
    resolved: HashMap<String, ConflictCase>,
    stats: ConflictStats,
}

impl ConflictResolutionManager {
    pub fn new(config: ConflictConfig) -> Self {
        Self {
            config,
            detector: ConflictDetector::default(),
            resolvers: Vec::new(),
            resources: HashMap::new(),
            active: HashMap::new(),
            resolved: HashMap::new(),
            stats: ConflictStats::default(),
        }
    }

    pub fn detector_mut(&mut self) -> &mut ConflictDetector {
        &mut self.detector
    }

    /// Register a resolver. Registration order is selection order.
    pub fn add_resolver(&mut self, resolver: Box<dyn ConflictResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn register_resource(&mut self, resource: Resource) {
        tracing::info!(resource_id = %resource.resource_id, capacity = resource.capacity, "Registered resource");
        self.resources.insert(resource.resource_id.clone(), resource);
    }

    pub fn unregister_resource(&mut self, resource_id: &str) {
        self.resources.remove(resource_id);
    }

    pub fn resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.get(resource_id)
    }

    pub fn resource_mut(&mut self, resource_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(resource_id)
    }

    /// One monitoring pass: detect conflicts, resolve new ones, and
    /// escalate anything stuck past the timeout.
    pub async fn monitor_and_resolve(&mut self, agents: &[AgentId], tasks: &[ScheduledTask]) {
        let detected = self.detector.detect(agents, &self.resources, tasks);
        for case in detected {
            if self.is_tracked(&case) {
                continue;
            }
            self.stats.total_conflicts += 1;
            tracing::info!(
                conflict_id = %case.conflict_id,
                kind = ?case.kind,
                agents = ?case.involved_agents,
                "New conflict detected"
            );
            self.resolve_case(case).await;
        }
        self.sweep_stuck();
    }

    /// Drive one case through analysis, resolution, and application.
    pub async fn resolve_case(&mut self, mut case: ConflictCase) {
        case.status = ConflictStatus::Analyzing;

        let Some(index) = self.select_resolver(&case) else {
            tracing::warn!(conflict_id = %case.conflict_id, "No applicable resolver");
            case.status = ConflictStatus::Failed;
            self.stats.failed_resolutions += 1;
            self.active.insert(case.conflict_id.clone(), case);
            return;
        };

        let strategy = self.resolvers[index].strategy();
        case.status = ConflictStatus::Resolving;
        case.strategy = Some(strategy);

        let attempt = tokio::time::timeout(
            self.config.resolution_timeout,
            self.resolvers[index].resolve(&case),
        )
        .await;

        match attempt {
            Err(_elapsed) => {
                tracing::warn!(conflict_id = %case.conflict_id, "Resolution timed out, escalating");
                case.status = ConflictStatus::Escalated;
                self.stats.escalated_conflicts += 1;
                self.active.insert(case.conflict_id.clone(), case);
            }
            Ok(Err(e)) => {
                tracing::warn!(conflict_id = %case.conflict_id, error = %e, "Resolution failed");
                case.status = ConflictStatus::Failed;
                self.stats.failed_resolutions += 1;
                self.active.insert(case.conflict_id.clone(), case);
            }
            Ok(Ok(outcome)) => {
                self.apply_outcome(&mut case, outcome);
                tracing::info!(
                    conflict_id = %case.conflict_id,
                    strategy = ?strategy,
                    "Conflict resolved"
                );
                self.resolved.insert(case.conflict_id.clone(), case);
            }
        }
    }

    /// Grant the winner a lease on every contested resource and close
    /// the case.
    fn apply_outcome(&mut self, case: &mut ConflictCase, outcome: ResolutionOutcome) {
        if let Some(winner) = &outcome.winner {
            for resource_id in &case.contested_resources {
                match self.resources.get_mut(resource_id) {
                    Some(resource) => {
                        if !resource.reserve(1, winner.clone(), self.config.resource_lease) {
                            tracing::warn!(
                                resource_id = %resource_id,
                                winner = %winner,
                                "Could not reserve contested resource for winner"
                            );
                        }
                    }
                    None => tracing::warn!(
                        resource_id = %resource_id,
                        "Contested resource is not registered"
                    ),
                }
            }
        }

        case.status = ConflictStatus::Resolved;
        case.resolved_at = Some(Utc::now());
        self.stats.resolved_conflicts += 1;
        *self
            .stats
            .strategy_counts
            .entry(outcome.strategy)
            .or_insert(0) += 1;
        case.outcome = Some(outcome);
    }

    /// First applicable resolver in registration order; urgent cases
    /// (priority >= 8) prefer a fast ordering strategy when one applies.
    fn select_resolver(&self, case: &ConflictCase) -> Option<usize> {
        let applicable: Vec<usize> = self
            .resolvers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.can_resolve(case))
            .map(|(i, _)| i)
            .collect();

        if case.priority >= 8 {
            if let Some(fast) = applicable.iter().find(|&&i| {
                matches!(
                    self.resolvers[i].strategy(),
                    ResolutionStrategy::PriorityBased | ResolutionStrategy::FirstComeFirstServe
                )
            }) {
                return Some(*fast);
            }
        }
        applicable.first().copied()
    }

    /// Escalate cases stuck in `Resolving` past the timeout.
    fn sweep_stuck(&mut self) {
        let deadline =
            chrono::Duration::from_std(self.config.resolution_timeout).unwrap_or_default();
        let now = Utc::now();
        for case in self.active.values_mut() {
            if case.status == ConflictStatus::Resolving && now - case.created_at > deadline {
                tracing::warn!(conflict_id = %case.conflict_id, "Conflict stuck, escalating");
                case.status = ConflictStatus::Escalated;
                self.stats.escalated_conflicts += 1;
            }
        }
    }

    /// A case matches a tracked one when kind, parties, and resources
    /// coincide; detection re-emits live contention every pass.
    fn is_tracked(&self, case: &ConflictCase) -> bool {
        let signature = Self::signature(case);
        self.active
            .values()
            .chain(self.resolved.values())
            .any(|tracked| Self::signature(tracked) == signature)
    }

    fn signature(case: &ConflictCase) -> String {
        let mut agents: Vec<&str> = case.involved_agents.iter().map(|a| a.as_str()).collect();
        agents.sort();
        let mut resources: Vec<&str> =
            case.contested_resources.iter().map(|r| r.as_str()).collect();
        resources.sort();
        format!("{:?}|{}|{}", case.kind, agents.join(","), resources.join(","))
    }

    pub fn statistics(&self) -> ConflictStatistics {
        ConflictStatistics {
            stats: self.stats.clone(),
            active_conflicts: self.active.len(),
            total_resources: self.resources.len(),
            available_resolvers: self.resolvers.len(),
        }
    }

    pub fn active_conflicts(&self) -> Vec<&ConflictCase> {
        self.active.values().collect()
    }

    pub fn resolved_conflicts(&self) -> Vec<&ConflictCase> {
        self.resolved.values().collect()
    }
}
