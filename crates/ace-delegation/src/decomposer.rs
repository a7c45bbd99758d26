//! Task decomposition strategies.
//!
//! Decomposition is best-effort: a task that cannot be split sensibly is
//! returned unchanged, never rejected. Subtask ordering is expressed
//! through dependency links in task metadata, which the delegation
//! manager enforces at dispatch time.

use ace_protocol::TaskRequest;

/// How a composite task is split into subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecompositionStrategy {
    /// Pick a strategy from the task's shape: long tasks decompose
    /// hierarchically, capability-heavy tasks in parallel.
    #[default]
    Auto,
    /// Phase chain; each subtask depends on its predecessor.
    Sequential,
    /// One independent subtask per required capability.
    Parallel,
    /// Coordinator subtask plus dependent children, recursing on
    /// children that stay complex.
    Hierarchical,
}

/// Splits composite tasks into schedulable subtasks.
pub struct TaskDecomposer {
    /// Recursion bound for hierarchical decomposition.
    max_depth: u32,
    /// Complexity score above which a task is considered composite.
    complexity_threshold: u32,
}

impl Default for TaskDecomposer {
    fn default() -> Self {
        Self {
            max_depth: 3,
            complexity_threshold: 3,
        }
    }
}

impl TaskDecomposer {
    pub fn new(max_depth: u32, complexity_threshold: u32) -> Self {
        Self {
            max_depth,
            complexity_threshold,
        }
    }

    /// Decompose a task. Always returns at least the task itself.
    pub fn decompose(&self, task: &TaskRequest, strategy: DecompositionStrategy) -> Vec<TaskRequest> {
        let strategy = match strategy {
            DecompositionStrategy::Auto => self.pick_strategy(task),
            other => other,
        };

        let subtasks = match strategy {
            DecompositionStrategy::Sequential => self.sequential(task),
            DecompositionStrategy::Parallel => self.parallel(task),
            DecompositionStrategy::Hierarchical => self.hierarchical(task, 0),
            DecompositionStrategy::Auto => vec![task.clone()],
        };

        if subtasks.is_empty() {
            tracing::warn!(task_id = %task.task_id, "Decomposition produced no subtasks, keeping task whole");
            return vec![task.clone()];
        }
        if subtasks.len() > 1 {
            tracing::debug!(
                task_id = %task.task_id,
                subtasks = subtasks.len(),
                strategy = ?strategy,
                "Task decomposed"
            );
        }
        subtasks
    }

    /// Long tasks split hierarchically, capability-heavy ones in
    /// parallel, explicitly-marked ones sequentially; anything else is
    /// left whole.
    fn pick_strategy(&self, task: &TaskRequest) -> DecompositionStrategy {
        if task
            .estimated_duration
            .is_some_and(|d| d.as_secs() > 3_600)
        {
            DecompositionStrategy::Hierarchical
        } else if task.required_capabilities.len() > 3 {
            DecompositionStrategy::Parallel
        } else if task.metadata.contains_key("sequential") {
            DecompositionStrategy::Sequential
        } else {
            DecompositionStrategy::Auto
        }
    }

    fn sequential(&self, task: &TaskRequest) -> Vec<TaskRequest> {
        let phases: Vec<(String, Vec<String>)> = if task.task_type == "data_analysis" {
            vec![
                ("Fetch and validate data".into(), vec!["data_access".into()]),
                (
                    "Preprocess and clean data".into(),
                    vec!["data_processing".into()],
                ),
                (
                    "Perform statistical analysis".into(),
                    vec!["statistics".into(), "analysis".into()],
                ),
            ]
        } else {
            vec![
                (
                    format!("Prepare: {}", task.description),
                    task.required_capabilities.clone(),
                ),
                (
                    format!("Execute: {}", task.description),
                    task.required_capabilities.clone(),
                ),
                (
                    format!("Review: {}", task.description),
                    task.required_capabilities.clone(),
                ),
            ]
        };

        let mut subtasks: Vec<TaskRequest> = Vec::with_capacity(phases.len());
        for (description, capabilities) in phases {
            let mut subtask = self.child_of(task, &description);
            subtask.required_capabilities = capabilities;
            if let Some(previous) = subtasks.last() {
                subtask.add_dependency(&previous.task_id);
            }
            subtasks.push(subtask);
        }
        subtasks
    }

    fn parallel(&self, task: &TaskRequest) -> Vec<TaskRequest> {
        if task.required_capabilities.len() <= 1 {
            return vec![task.clone()];
        }
        task.required_capabilities
            .iter()
            .map(|capability| {
                let mut subtask =
                    self.child_of(task, &format!("{} ({capability})", task.description));
                subtask.required_capabilities = vec![capability.clone()];
                subtask
            })
            .collect()
    }

    fn hierarchical(&self, task: &TaskRequest, depth: u32) -> Vec<TaskRequest> {
        if depth >= self.max_depth || self.complexity(task) <= self.complexity_threshold {
            return vec![task.clone()];
        }

        let mut coordinator = self.child_of(task, &format!("Coordinate: {}", task.description));
        coordinator.required_capabilities = Vec::new();
        coordinator.estimated_duration = None;

        let chunks: Vec<Vec<String>> = if task.required_capabilities.is_empty() {
            vec![Vec::new(), Vec::new()]
        } else {
            task.required_capabilities
                .chunks(2)
                .map(|c| c.to_vec())
                .collect()
        };
        let share = task
            .estimated_duration
            .map(|d| d / chunks.len().max(1) as u32);

        let mut subtasks = vec![coordinator.clone()];
        for (i, capabilities) in chunks.into_iter().enumerate() {
            let mut child = self.child_of(
                task,
                &format!("{} (part {})", task.description, i + 1),
            );
            child.required_capabilities = capabilities;
            child.estimated_duration = share;
            child.add_dependency(&coordinator.task_id);

            // A child that is still complex splits again, one level down.
            for grandchild in self.hierarchical(&child, depth + 1) {
                subtasks.push(grandchild);
            }
        }
        subtasks
    }

    /// Complexity score: capability count, input breadth, and estimated
    /// hours all add up.
    fn complexity(&self, task: &TaskRequest) -> u32 {
        let mut complexity = 1 + task.required_capabilities.len() as u32;
        complexity += task.inputs.len() as u32 / 3;
        if let Some(duration) = task.estimated_duration {
            complexity += (duration.as_secs() / 3_600) as u32;
        }
        complexity
    }

    fn child_of(&self, task: &TaskRequest, description: &str) -> TaskRequest {
        let mut subtask = TaskRequest::new(description, task.task_type.clone());
        subtask.priority = task.priority;
        subtask.inputs = task.inputs.clone();
        subtask.deadline = task.deadline;
        subtask.max_retries = task.max_retries;
        subtask.set_parent(&task.task_id);
        subtask
    }
}
