//! Execution seam between the scheduler and the agents that do the work.
//!
//! The delegation manager only needs success/failure, a payload, and the
//! elapsed time; how a task actually runs (model invocation, tool call,
//! remote worker) lives behind this trait.

use std::future::Future;
use std::pin::Pin;

use ace_protocol::{TaskRequest, TaskResult};

/// Executes one task on behalf of the assigned agent.
pub trait Executor: Send + Sync {
    fn execute<'a>(
        &'a self,
        task: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>>;
}

/// Closure-backed executor, convenient for wiring and tests.
pub struct FnExecutor<F>(pub F);

impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(TaskRequest) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    fn execute<'a>(
        &'a self,
        task: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        Box::pin((self.0)(task))
    }
}

/// An executor that never completes. Exercises timeout/retry paths.
pub struct PendingExecutor;

impl Executor for PendingExecutor {
    fn execute<'a>(
        &'a self,
        _task: TaskRequest,
    ) -> Pin<Box<dyn Future<Output = TaskResult> + Send + 'a>> {
        Box::pin(std::future::pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_executor_passes_task_through() {
        let executor = FnExecutor(|task: TaskRequest| async move {
            TaskResult::success(task.task_id, serde_json::json!("done"))
        });
        let task = TaskRequest::new("do it", "generic");
        let task_id = task.task_id.clone();
        let result = executor.execute(task).await;
        assert!(result.success);
        assert_eq!(result.task_id, task_id);
    }
}
