//! Conflict detection over agents, resources, and scheduled work.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use ace_protocol::AgentId;

use crate::case::{ConflictCase, ConflictKind};
use crate::error::ConflictError;
use crate::resource::Resource;

/// The detector's snapshot view of one in-flight task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task_id: String,
    pub assigned_agent: Option<AgentId>,
    /// Urgency 1–10.
    pub priority: u8,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration: Option<Duration>,
}

/// Decides whether an agent currently demands a resource. Production
/// wiring derives this from task requirements; tests inject closures.
pub type DemandPredicate = Box<dyn Fn(&AgentId, &str) -> bool + Send + Sync>;

/// A custom detection rule contributing extra conflict cases.
pub type DetectionRule = Box<
    dyn Fn(
            &[AgentId],
            &HashMap<String, Resource>,
            &[ScheduledTask],
        ) -> Result<Vec<ConflictCase>, ConflictError>
        + Send
        + Sync,
>;

/// Scans the system for competing demands.
pub struct ConflictDetector {
    demand: DemandPredicate,
    rules: Vec<DetectionRule>,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self {
            // Until wired to real demand data, nobody contends.
            demand: Box::new(|_, _| false),
            rules: Vec::new(),
        }
    }
}

impl ConflictDetector {
    pub fn new(demand: DemandPredicate) -> Self {
        Self {
            demand,
            rules: Vec::new(),
        }
    }

    pub fn set_demand_predicate(&mut self, demand: DemandPredicate) {
        self.demand = demand;
    }

    pub fn add_rule(&mut self, rule: DetectionRule) {
        self.rules.push(rule);
    }

    /// Run all detection passes. A failing custom rule is logged and
    /// skipped, never fatal.
    pub fn detect(
        &self,
        agents: &[AgentId],
        resources: &HashMap<String, Resource>,
        tasks: &[ScheduledTask],
    ) -> Vec<ConflictCase> {
        let mut conflicts = Vec::new();
        conflicts.extend(self.detect_resource_competition(agents, resources));
        conflicts.extend(self.detect_priority_conflicts(tasks));
        conflicts.extend(self.detect_deadline_conflicts(tasks));

        for rule in &self.rules {
            match rule(agents, resources, tasks) {
                Ok(extra) => conflicts.extend(extra),
                Err(e) => tracing::error!(error = %e, "Detection rule failed, skipping"),
            }
        }
        conflicts
    }

    fn detect_resource_competition(
        &self,
        agents: &[AgentId],
        resources: &HashMap<String, Resource>,
    ) -> Vec<ConflictCase> {
        let mut resource_ids: Vec<&String> = resources.keys().collect();
        resource_ids.sort();

        let mut conflicts = Vec::new();
        for resource_id in resource_ids {
            let competing: Vec<AgentId> = agents
                .iter()
                .filter(|agent| (self.demand)(agent, resource_id))
                .cloned()
                .collect();
            if competing.len() > 1 {
                conflicts.push(ConflictCase::new(
                    ConflictKind::ResourceCompetition,
                    competing,
                    vec![resource_id.clone()],
                    format!("Multiple agents competing for resource {resource_id}"),
                    7,
                ));
            }
        }
        conflicts
    }

    /// Tasks sharing a priority of 8 or above spread over more than one
    /// agent contend for the same urgency slot.
    fn detect_priority_conflicts(&self, tasks: &[ScheduledTask]) -> Vec<ConflictCase> {
        let mut by_priority: HashMap<u8, Vec<&ScheduledTask>> = HashMap::new();
        for task in tasks {
            by_priority.entry(task.priority).or_default().push(task);
        }

        let mut priorities: Vec<u8> = by_priority.keys().copied().collect();
        priorities.sort();

        let mut conflicts = Vec::new();
        for priority in priorities {
            if priority < 8 {
                continue;
            }
            let group = &by_priority[&priority];
            if group.len() < 2 {
                continue;
            }
            let mut involved: Vec<AgentId> = Vec::new();
            for task in group {
                if let Some(agent) = &task.assigned_agent {
                    if !involved.contains(agent) {
                        involved.push(agent.clone());
                    }
                }
            }
            if involved.len() > 1 {
                conflicts.push(ConflictCase::new(
                    ConflictKind::TaskPriority,
                    involved,
                    Vec::new(),
                    format!("Multiple high-priority tasks at priority level {priority}"),
                    priority,
                ));
            }
        }
        conflicts
    }

    fn detect_deadline_conflicts(&self, tasks: &[ScheduledTask]) -> Vec<ConflictCase> {
        let now = Utc::now();
        let mut conflicts = Vec::new();
        for task in tasks {
            let (Some(deadline), Some(duration), Some(agent)) = (
                task.deadline,
                task.estimated_duration,
                task.assigned_agent.as_ref(),
            ) else {
                continue;
            };
            let projected = now + chrono::Duration::from_std(duration).unwrap_or_default();
            if projected > deadline {
                conflicts.push(ConflictCase::new(
                    ConflictKind::DeadlineConflict,
                    vec![agent.clone()],
                    Vec::new(),
                    format!("Task {} cannot meet its deadline", task.task_id),
                    8,
                ));
            }
        }
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents(ids: &[&str]) -> Vec<AgentId> {
        ids.iter().map(|id| AgentId::new(*id)).collect()
    }

    #[test]
    fn test_resource_competition_detected() {
        let mut resources = HashMap::new();
        resources.insert("db".to_string(), Resource::new("db", "database", 1));

        let detector = ConflictDetector::new(Box::new(|agent, resource| {
            resource == "db" && (agent.as_str() == "a" || agent.as_str() == "b")
        }));

        let conflicts = detector.detect(&agents(&["a", "b", "c"]), &resources, &[]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::ResourceCompetition);
        assert_eq!(conflicts[0].involved_agents, agents(&["a", "b"]));
        assert_eq!(conflicts[0].contested_resources, vec!["db"]);
        assert_eq!(conflicts[0].priority, 7);
    }

    #[test]
    fn test_single_demander_is_no_conflict() {
        let mut resources = HashMap::new();
        resources.insert("db".to_string(), Resource::new("db", "database", 1));

        let detector = ConflictDetector::new(Box::new(|agent, _| agent.as_str() == "a"));
        let conflicts = detector.detect(&agents(&["a", "b"]), &resources, &[]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_priority_conflict_requires_two_agents() {
        let tasks = vec![
            ScheduledTask {
                task_id: "t1".into(),
                assigned_agent: Some(AgentId::new("a")),
                priority: 9,
                deadline: None,
                estimated_duration: None,
            },
            ScheduledTask {
                task_id: "t2".into(),
                assigned_agent: Some(AgentId::new("b")),
                priority: 9,
                deadline: None,
                estimated_duration: None,
            },
            ScheduledTask {
                task_id: "t3".into(),
                assigned_agent: Some(AgentId::new("c")),
                priority: 5,
                deadline: None,
                estimated_duration: None,
            },
        ];

        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[], &HashMap::new(), &tasks);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::TaskPriority);
        assert_eq!(conflicts[0].priority, 9);
    }

    #[test]
    fn test_low_priority_duplicates_ignored() {
        let tasks = vec![
            ScheduledTask {
                task_id: "t1".into(),
                assigned_agent: Some(AgentId::new("a")),
                priority: 5,
                deadline: None,
                estimated_duration: None,
            },
            ScheduledTask {
                task_id: "t2".into(),
                assigned_agent: Some(AgentId::new("b")),
                priority: 5,
                deadline: None,
                estimated_duration: None,
            },
        ];
        let detector = ConflictDetector::default();
        assert!(detector.detect(&[], &HashMap::new(), &tasks).is_empty());
    }

    #[test]
    fn test_deadline_conflict_detected() {
        let tasks = vec![ScheduledTask {
            task_id: "late".into(),
            assigned_agent: Some(AgentId::new("a")),
            priority: 5,
            deadline: Some(Utc::now() + chrono::Duration::minutes(30)),
            estimated_duration: Some(Duration::from_secs(2 * 3_600)),
        }];
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[], &HashMap::new(), &tasks);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::DeadlineConflict);
        assert_eq!(conflicts[0].priority, 8);
    }

    #[test]
    fn test_failing_rule_is_skipped() {
        let mut detector = ConflictDetector::default();
        detector.add_rule(Box::new(|_, _, _| {
            Err(ConflictError::DetectionRule("broken rule".into()))
        }));
        detector.add_rule(Box::new(|_, _, _| {
            Ok(vec![ConflictCase::new(
                ConflictKind::AuthorityDispute,
                vec![AgentId::new("a"), AgentId::new("b")],
                vec![],
                "custom rule fired",
                6,
            )])
        }));

        let conflicts = detector.detect(&[], &HashMap::new(), &[]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::AuthorityDispute);
    }
}
