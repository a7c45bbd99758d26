use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{
    DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_MAX_RETRIES, DEPENDENCIES_KEY, PARENT_TASK_KEY,
};
use crate::identity::AgentId;

/// Scheduling priority of a task. Lower value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Numeric queue rank (1 = most urgent).
    pub fn value(&self) -> u8 {
        match self {
            TaskPriority::Critical => 1,
            TaskPriority::High => 2,
            TaskPriority::Medium => 3,
            TaskPriority::Low => 4,
        }
    }

    /// Multiplier applied to matching scores for tasks at this priority.
    pub fn weight(&self) -> f64 {
        match self {
            TaskPriority::Critical => 1.2,
            TaskPriority::High => 1.1,
            TaskPriority::Medium => 1.0,
            TaskPriority::Low => 0.9,
        }
    }
}

/// Current status of a task in the delegation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// A unit of work submitted to the delegation manager.
///
/// Immutable once submitted, except for `metadata` (dependency links,
/// assignment bookkeeping) and the retry counter tracked by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub description: String,
    pub task_type: String,
    pub priority: TaskPriority,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration: Option<Duration>,
    pub max_retries: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            description: description.into(),
            task_type: task_type.into(),
            priority: TaskPriority::Medium,
            required_capabilities: Vec::new(),
            inputs: HashMap::new(),
            deadline: None,
            estimated_duration: None,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Task ids this task depends on, read from metadata.
    pub fn dependencies(&self) -> Vec<String> {
        self.metadata
            .get(DEPENDENCIES_KEY)
            .and_then(|v| v.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|d| d.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record a predecessor this task must wait for.
    pub fn add_dependency(&mut self, task_id: &str) {
        let deps = self
            .metadata
            .entry(DEPENDENCIES_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(arr) = deps.as_array_mut() {
            arr.push(Value::String(task_id.to_string()));
        }
    }

    /// Mark this task as a subtask split from `parent_id`.
    pub fn set_parent(&mut self, parent_id: &str) {
        self.metadata
            .insert(PARENT_TASK_KEY.to_string(), Value::String(parent_id.to_string()));
    }
}

/// Terminal outcome of one task attempt. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    pub error: Option<String>,
    /// Wall-clock execution time in seconds.
    pub execution_time: f64,
    pub assigned_agent: Option<AgentId>,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output,
            error: None,
            execution_time: 0.0,
            assigned_agent: None,
            attempts: 1,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            execution_time: 0.0,
            assigned_agent: None,
            attempts: 1,
            completed_at: Utc::now(),
        }
    }
}

/// Liveness/availability status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Overloaded,
    Offline,
    Maintenance,
}

/// A registered worker: capabilities, capacity, and live status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: AgentId,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub max_concurrent_tasks: usize,
    /// Rolling execution quality score in [0, 1].
    pub performance_score: f64,
    /// Long-term dependability score in [0, 1].
    pub reliability_score: f64,
    pub current_load: usize,
    pub status: AgentStatus,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub task_history: Vec<String>,
}

impl AgentProfile {
    pub fn new(
        agent_id: impl Into<AgentId>,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            performance_score: 1.0,
            reliability_score: 1.0,
            current_load: 0,
            status: AgentStatus::Idle,
            last_seen: Utc::now(),
            task_history: Vec::new(),
        }
    }

    /// An agent can take work while idle or busy and below its
    /// concurrency limit.
    pub fn is_available(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Busy)
            && self.current_load < self.max_concurrent_tasks
    }

    /// Fraction of capacity in use, in [0, 1].
    pub fn load_factor(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 1.0;
        }
        self.current_load as f64 / self.max_concurrent_tasks as f64
    }
}

/// A matching decision: which agent gets a task and how confident the
/// matcher is. Transient, never persisted.
#[derive(Debug, Clone)]
pub struct DelegationResult {
    pub task_id: String,
    pub assigned_agent: AgentId,
    pub assignment_score: f64,
    /// Ranked runners-up usable if the assignment falls through.
    pub backup_agents: Vec<AgentId>,
}
