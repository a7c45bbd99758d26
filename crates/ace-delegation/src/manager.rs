//! The delegation manager: task queue, assignment, timeout/retry, and
//! completion bookkeeping.
//!
//! Task lifecycle: pending → assigned → in_progress →
//! {completed | failed | cancelled | timeout}. A task leaves pending
//! only once every dependency has a successful result; an assignment
//! that times out is retried until the task's retry budget is spent.
//! Agent load is mutated only here, at assignment, completion, and
//! timeout, so load accounting stays centralized.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use ace_protocol::{
    AgentId, AgentProfile, AgentStatus, TaskRequest, TaskResult, TaskStatus,
    DEFAULT_OFFLINE_AFTER_SECS, DEFAULT_TASK_QUEUE_CAPACITY, DEFAULT_TASK_TIMEOUT_SECS,
};

use crate::decomposer::{DecompositionStrategy, TaskDecomposer};
use crate::error::DelegationError;
use crate::executor::Executor;
use crate::matcher::AgentMatcher;

/// Tunables for the delegation manager.
#[derive(Debug, Clone)]
pub struct DelegationConfig {
    /// Bound on the pending task queue.
    pub max_queue_size: usize,
    /// Timeout applied to tasks without an explicit deadline.
    pub default_timeout: Duration,
    /// Cadence of the dispatch/timeout monitor.
    pub monitor_interval: Duration,
    /// Maximum tasks dispatched per monitor pass.
    pub dispatch_batch: usize,
    /// Agents unseen for this long are marked offline.
    pub offline_after: Duration,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_TASK_QUEUE_CAPACITY,
            default_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            monitor_interval: Duration::from_millis(500),
            dispatch_batch: 10,
            offline_after: Duration::from_secs(DEFAULT_OFFLINE_AFTER_SECS),
        }
    }
}

/// Aggregate counters exposed through [`DelegationStatus`].
#[derive(Debug, Clone, Default)]
pub struct DelegationStats {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

/// Snapshot of the manager's observable state.
#[derive(Debug, Clone)]
pub struct DelegationStatus {
    pub running: bool,
    pub total_agents: usize,
    pub active_agents: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    pub stats: DelegationStats,
    /// Load factor per agent, in [0, 1].
    pub agent_utilization: HashMap<AgentId, f64>,
}

/// Queue entry ordering: lower priority rank first, FIFO within equal
/// rank. `BinaryHeap` is a max-heap, so the ordering is reversed.
struct PendingEntry {
    rank: u8,
    seq: u64,
    task: TaskRequest,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ActiveTask {
    task: TaskRequest,
    agent_id: AgentId,
    /// Dispatch number of this assignment; stale executor results from
    /// an earlier assignment are rejected by comparing against it.
    attempt: u32,
    dispatched_at: DateTime<Utc>,
}

struct ManagerState {
    agents: HashMap<AgentId, AgentProfile>,
    /// Registration order; candidate iteration follows it so matcher
    /// tie-breaks stay deterministic.
    order: Vec<AgentId>,
    queue: BinaryHeap<PendingEntry>,
    seq: u64,
    active: HashMap<String, ActiveTask>,
    completed: HashMap<String, TaskResult>,
    statuses: HashMap<String, TaskStatus>,
    /// Total dispatches per task id.
    dispatches: HashMap<String, u32>,
    /// Timeouts per task id; this is the retry budget counter.
    timeouts: HashMap<String, u32>,
    cancelled: HashSet<String>,
    stats: DelegationStats,
    running: bool,
}

impl ManagerState {
    fn push_pending(&mut self, task: TaskRequest) {
        self.seq += 1;
        self.statuses
            .insert(task.task_id.clone(), TaskStatus::Pending);
        self.queue.push(PendingEntry {
            rank: task.priority.value(),
            seq: self.seq,
            task,
        });
    }

    fn release_agent(&mut self, agent_id: &AgentId, success: Option<bool>) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.current_load = agent.current_load.saturating_sub(1);
            agent.status = if agent.current_load > 0 {
                AgentStatus::Busy
            } else {
                AgentStatus::Idle
            };
            match success {
                Some(true) => {
                    agent.performance_score = (agent.performance_score + 0.01).min(1.0);
                }
                Some(false) => {
                    agent.performance_score = (agent.performance_score - 0.05).max(0.1);
                }
                None => {}
            }
        }
    }
}

/// Owns the task queue and drives decomposition, matching, dispatch,
/// timeout/retry, and completion.
pub struct DelegationManager {
    config: DelegationConfig,
    decomposer: TaskDecomposer,
    matcher: AgentMatcher,
    executor: Arc<dyn Executor>,
    state: RwLock<ManagerState>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    results_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskResult>>>,
    shutdown: watch::Sender<bool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl DelegationManager {
    pub fn new(executor: Arc<dyn Executor>) -> Arc<Self> {
        Self::with_config(executor, DelegationConfig::default())
    }

    pub fn with_config(executor: Arc<dyn Executor>, config: DelegationConfig) -> Arc<Self> {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            decomposer: TaskDecomposer::default(),
            matcher: AgentMatcher::default(),
            executor,
            state: RwLock::new(ManagerState {
                agents: HashMap::new(),
                order: Vec::new(),
                queue: BinaryHeap::new(),
                seq: 0,
                active: HashMap::new(),
                completed: HashMap::new(),
                statuses: HashMap::new(),
                dispatches: HashMap::new(),
                timeouts: HashMap::new(),
                cancelled: HashSet::new(),
                stats: DelegationStats::default(),
                running: false,
            }),
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
            shutdown,
            monitor: Mutex::new(None),
        })
    }

    // ── Agent registry ──

    pub async fn register_agent(&self, agent: AgentProfile) {
        let mut state = self.state.write().await;
        tracing::info!(agent_id = %agent.agent_id, name = %agent.name, "Registered agent");
        if !state.order.contains(&agent.agent_id) {
            state.order.push(agent.agent_id.clone());
        }
        state.agents.insert(agent.agent_id.clone(), agent);
    }

    /// Remove an agent; every task assigned to it is requeued with its
    /// priority preserved, never failed.
    pub async fn unregister_agent(&self, agent_id: &AgentId) {
        let mut state = self.state.write().await;
        let orphaned: Vec<String> = state
            .active
            .iter()
            .filter(|(_, active)| &active.agent_id == agent_id)
            .map(|(task_id, _)| task_id.clone())
            .collect();

        for task_id in orphaned {
            if let Some(active) = state.active.remove(&task_id) {
                tracing::info!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    "Requeued task after agent unregistration"
                );
                state.push_pending(active.task);
            }
        }

        state.agents.remove(agent_id);
        state.order.retain(|id| id != agent_id);
        tracing::info!(agent_id = %agent_id, "Unregistered agent");
    }

    /// Record agent liveness; an offline agent seen again becomes
    /// schedulable.
    pub async fn touch_agent(&self, agent_id: &AgentId) {
        let mut state = self.state.write().await;
        if let Some(agent) = state.agents.get_mut(agent_id) {
            agent.last_seen = Utc::now();
            if agent.status == AgentStatus::Offline {
                agent.status = if agent.current_load > 0 {
                    AgentStatus::Busy
                } else {
                    AgentStatus::Idle
                };
            }
        }
    }

    pub async fn agent(&self, agent_id: &AgentId) -> Option<AgentProfile> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    // ── Task intake ──

    /// Decompose and enqueue a task. Returns the root task id.
    pub async fn submit_task(&self, task: TaskRequest) -> Result<String, DelegationError> {
        {
            let state = self.state.read().await;
            if state.queue.len() >= self.config.max_queue_size {
                return Err(DelegationError::QueueFull(self.config.max_queue_size));
            }
        }

        let task_id = task.task_id.clone();
        let subtasks = self.decomposer.decompose(&task, DecompositionStrategy::Auto);
        let count = subtasks.len();

        let mut state = self.state.write().await;
        for subtask in subtasks {
            state.push_pending(subtask);
            state.stats.total_tasks += 1;
        }
        tracing::info!(task_id = %task_id, subtasks = count, "Submitted task");
        Ok(task_id)
    }

    /// Mark a pending task cancelled; it is discarded when it surfaces
    /// in the queue.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), DelegationError> {
        let mut state = self.state.write().await;
        match state.statuses.get(task_id) {
            Some(TaskStatus::Pending) => {
                state.cancelled.insert(task_id.to_string());
                state
                    .statuses
                    .insert(task_id.to_string(), TaskStatus::Cancelled);
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(DelegationError::UnknownTask(task_id.to_string())),
        }
    }

    // ── Lifecycle ──

    pub async fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        let Some(results_rx) = self.results_rx.lock().await.take() else {
            return;
        };
        self.shutdown.send_replace(false);
        self.state.write().await.running = true;

        let manager = Arc::clone(self);
        *monitor = Some(tokio::spawn(async move {
            manager.monitor_loop(results_rx).await;
        }));
        tracing::info!("Delegation manager started");
    }

    /// Stop the monitor loop. Every in-flight task is requeued so
    /// nothing stays permanently in progress.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        if let Some(handle) = self.monitor.lock().await.take() {
            let _ = handle.await;
        }
        self.state.write().await.running = false;
        tracing::info!("Delegation manager stopped");
    }

    async fn monitor_loop(self: Arc<Self>, mut results_rx: mpsc::UnboundedReceiver<TaskResult>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(result) = results_rx.recv() => {
                    self.complete_task(result).await;
                }
                _ = ticker.tick() => {
                    self.dispatch_ready().await;
                    self.check_timeouts().await;
                    self.sweep_offline().await;
                }
            }
        }
        self.requeue_in_flight().await;
        *self.results_rx.lock().await = Some(results_rx);
    }

    // ── Dispatch ──

    async fn dispatch_ready(&self) {
        let mut dispatched = 0usize;
        while dispatched < self.config.dispatch_batch {
            let mut state = self.state.write().await;
            let Some(entry) = state.queue.pop() else {
                break;
            };

            if state.cancelled.remove(&entry.task.task_id) {
                tracing::debug!(task_id = %entry.task.task_id, "Dropped cancelled task");
                continue;
            }

            // Every dependency must have completed successfully. An
            // unready head is pushed back and the pass ends so queue
            // order is preserved.
            let ready = entry.task.dependencies().iter().all(|dep| {
                state
                    .completed
                    .get(dep)
                    .map(|result| result.success)
                    .unwrap_or(false)
            });
            if !ready {
                state.queue.push(entry);
                break;
            }

            let candidates: Vec<AgentProfile> = state
                .order
                .iter()
                .filter_map(|id| state.agents.get(id))
                .filter(|agent| agent.is_available())
                .cloned()
                .collect();
            let Some(delegation) = self.matcher.find_best_agent(&entry.task, &candidates) else {
                // No eligible agent right now; the task stays queued.
                state.queue.push(entry);
                break;
            };

            let task_id = entry.task.task_id.clone();
            let agent_id = delegation.assigned_agent.clone();
            if let Some(agent) = state.agents.get_mut(&agent_id) {
                agent.current_load += 1;
                agent.status = AgentStatus::Busy;
            }
            let attempt = {
                let dispatches = state.dispatches.entry(task_id.clone()).or_insert(0);
                *dispatches += 1;
                *dispatches
            };
            state
                .statuses
                .insert(task_id.clone(), TaskStatus::Assigned);
            state.active.insert(
                task_id.clone(),
                ActiveTask {
                    task: entry.task.clone(),
                    agent_id: agent_id.clone(),
                    attempt,
                    dispatched_at: Utc::now(),
                },
            );
            state
                .statuses
                .insert(task_id.clone(), TaskStatus::InProgress);
            drop(state);

            tracing::info!(
                task_id = %task_id,
                agent_id = %agent_id,
                score = delegation.assignment_score,
                attempt,
                "Dispatched task"
            );

            let executor = Arc::clone(&self.executor);
            let results_tx = self.results_tx.clone();
            let task = entry.task;
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let mut result = executor.execute(task).await;
                result.execution_time = started.elapsed().as_secs_f64();
                result.attempts = attempt;
                let _ = results_tx.send(result);
            });
            dispatched += 1;
        }
    }

    // ── Completion ──

    /// Record a terminal attempt result. Idempotent per task id: a
    /// result for a task that is no longer active, or from a superseded
    /// attempt, is dropped.
    pub async fn complete_task(&self, mut result: TaskResult) {
        let mut state = self.state.write().await;
        let current_attempt = match state.active.get(&result.task_id) {
            Some(active) => active.attempt,
            None => {
                tracing::debug!(task_id = %result.task_id, "Ignoring result for inactive task");
                return;
            }
        };
        if result.attempts != 0 && result.attempts != current_attempt {
            tracing::debug!(
                task_id = %result.task_id,
                stale_attempt = result.attempts,
                current_attempt,
                "Ignoring stale attempt result"
            );
            return;
        }

        let Some(active) = state.active.remove(&result.task_id) else {
            return;
        };
        state.release_agent(&active.agent_id, Some(result.success));
        if let Some(agent) = state.agents.get_mut(&active.agent_id) {
            agent.task_history.push(result.task_id.clone());
        }

        result.assigned_agent = Some(active.agent_id);
        result.attempts = active.attempt;
        let status = if result.success {
            state.stats.completed_tasks += 1;
            TaskStatus::Completed
        } else {
            state.stats.failed_tasks += 1;
            TaskStatus::Failed
        };
        state.statuses.insert(result.task_id.clone(), status);
        tracing::info!(
            task_id = %result.task_id,
            success = result.success,
            "Task completed"
        );
        state.completed.insert(result.task_id.clone(), result);
    }

    // ── Timeouts ──

    async fn check_timeouts(&self) {
        let now = Utc::now();
        let default_timeout =
            chrono::Duration::from_std(self.config.default_timeout).unwrap_or_default();
        let expired: Vec<String> = {
            let state = self.state.read().await;
            state
                .active
                .iter()
                .filter(|(_, active)| {
                    let limit = active
                        .task
                        .deadline
                        .unwrap_or(active.dispatched_at + default_timeout);
                    now > limit
                })
                .map(|(task_id, _)| task_id.clone())
                .collect()
        };

        for task_id in expired {
            self.handle_timeout(&task_id).await;
        }
    }

    async fn handle_timeout(&self, task_id: &str) {
        let mut state = self.state.write().await;
        let Some(active) = state.active.remove(task_id) else {
            return;
        };
        state.release_agent(&active.agent_id, Some(false));

        let timeouts = {
            let counter = state.timeouts.entry(task_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        if timeouts <= active.task.max_retries {
            tracing::warn!(
                task_id = %task_id,
                agent_id = %active.agent_id,
                timeouts,
                max_retries = active.task.max_retries,
                "Task timed out, resubmitting"
            );
            state.push_pending(active.task);
        } else {
            tracing::warn!(
                task_id = %task_id,
                agent_id = %active.agent_id,
                "Task timed out, retry budget exhausted"
            );
            let attempts = state.dispatches.get(task_id).copied().unwrap_or(1);
            let mut result = TaskResult::failure(task_id, "task timed out");
            result.assigned_agent = Some(active.agent_id);
            result.attempts = attempts;
            state.stats.failed_tasks += 1;
            state
                .statuses
                .insert(task_id.to_string(), TaskStatus::Timeout);
            state.completed.insert(task_id.to_string(), result);
        }
    }

    // ── Maintenance ──

    async fn sweep_offline(&self) {
        let now = Utc::now();
        let offline_after =
            chrono::Duration::from_std(self.config.offline_after).unwrap_or_default();
        let mut state = self.state.write().await;
        for agent in state.agents.values_mut() {
            if now - agent.last_seen > offline_after && agent.status != AgentStatus::Offline {
                tracing::warn!(agent_id = %agent.agent_id, "Agent appears to be offline");
                agent.status = AgentStatus::Offline;
            }
        }
    }

    async fn requeue_in_flight(&self) {
        let mut state = self.state.write().await;
        let in_flight: Vec<String> = state.active.keys().cloned().collect();
        for task_id in in_flight {
            if let Some(active) = state.active.remove(&task_id) {
                state.release_agent(&active.agent_id, None);
                state.push_pending(active.task);
                tracing::info!(task_id = %task_id, "Requeued in-flight task on shutdown");
            }
        }
    }

    // ── Introspection ──

    pub async fn status(&self) -> DelegationStatus {
        let state = self.state.read().await;
        let active_agents = state
            .agents
            .values()
            .filter(|a| matches!(a.status, AgentStatus::Idle | AgentStatus::Busy))
            .count();
        DelegationStatus {
            running: state.running,
            total_agents: state.agents.len(),
            active_agents,
            pending_tasks: state.queue.len(),
            active_tasks: state.active.len(),
            completed_tasks: state.completed.len(),
            stats: state.stats.clone(),
            agent_utilization: state
                .agents
                .values()
                .map(|a| (a.agent_id.clone(), a.load_factor()))
                .collect(),
        }
    }

    /// In-flight tasks with their assigned agents, for external
    /// monitors (e.g. conflict detection).
    pub async fn active_tasks(&self) -> Vec<(TaskRequest, AgentId)> {
        let state = self.state.read().await;
        state
            .active
            .values()
            .map(|active| (active.task.clone(), active.agent_id.clone()))
            .collect()
    }

    /// Ids of all registered agents, in registration order.
    pub async fn agent_ids(&self) -> Vec<AgentId> {
        self.state.read().await.order.clone()
    }

    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.state.read().await.statuses.get(task_id).copied()
    }

    pub async fn result(&self, task_id: &str) -> Option<TaskResult> {
        self.state.read().await.completed.get(task_id).cloned()
    }

    /// Pending tasks that can never become ready: a dependency is
    /// unknown or ended without success. Reported for operator
    /// visibility; the dependency graph is never broken automatically.
    pub async fn blocked_tasks(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .queue
            .iter()
            .filter(|entry| {
                entry.task.dependencies().iter().any(|dep| {
                    match state.statuses.get(dep) {
                        Some(TaskStatus::Failed)
                        | Some(TaskStatus::Timeout)
                        | Some(TaskStatus::Cancelled) => true,
                        Some(_) => false,
                        None => true,
                    }
                })
            })
            .map(|entry| entry.task.task_id.clone())
            .collect()
    }
}
