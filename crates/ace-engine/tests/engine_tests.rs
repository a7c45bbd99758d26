use std::sync::Arc;
use std::time::Duration;

use ace_comms::ChannelTransport;
use ace_conflict::{AgentBid, AuctionResolver, ConflictCase, FnBidSource, Resource};
use ace_delegation::FnExecutor;
use ace_engine::{CoordinationEngine, EngineConfig};
use ace_protocol::{AgentId, AgentProfile, TaskPriority, TaskRequest, TaskResult, TaskStatus};

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.delegation.monitor_interval_ms = 20;
    config.comms.secret = "engine-secret".into();
    config.conflict.scan_interval_ms = 50;
    config
}

fn echo_executor() -> Arc<FnExecutor<impl Fn(TaskRequest) -> std::pin::Pin<Box<dyn std::future::Future<Output = TaskResult> + Send>> + Send + Sync>> {
    Arc::new(FnExecutor(|task: TaskRequest| {
        Box::pin(async move {
            TaskResult::success(task.task_id, serde_json::json!({"echo": task.description}))
        }) as std::pin::Pin<Box<dyn std::future::Future<Output = TaskResult> + Send>>
    }))
}

fn worker(id: &str) -> AgentProfile {
    AgentProfile::new(id, id, ["generic"])
}

#[tokio::test]
async fn test_submit_and_complete_through_engine() {
    let transport = ChannelTransport::new();
    let engine = CoordinationEngine::new(
        AgentId::new("engine"),
        fast_config(),
        echo_executor(),
        Box::new(transport),
    );

    engine.register_agent(worker("w1"), None).await;
    engine.start().await;

    let mut task = TaskRequest::new("summarize findings", "generic");
    task.priority = TaskPriority::High;
    task.required_capabilities = vec!["generic".into()];
    let task_id = engine.submit_task(task).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.stop().await;

    assert_eq!(
        engine.task_status(&task_id).await,
        Some(TaskStatus::Completed)
    );
    let result = engine.task_result(&task_id).await.unwrap();
    assert!(result.success);
    assert_eq!(result.output["echo"], "summarize findings");

    let status = engine.status().await;
    assert_eq!(status.delegation.stats.completed_tasks, 1);
    assert!(!status.delegation.running);
}

#[tokio::test]
async fn test_conflict_scan_resolves_contention() {
    let transport = ChannelTransport::new();
    let engine = CoordinationEngine::new(
        AgentId::new("engine"),
        fast_config(),
        echo_executor(),
        Box::new(transport),
    );

    engine.register_agent(worker("a"), None).await;
    engine.register_agent(worker("b"), None).await;
    engine
        .register_resource(Resource::new("gpu", "compute", 1))
        .await;
    engine
        .add_resolver(Box::new(AuctionResolver::new(Box::new(FnBidSource(
            |case: &ConflictCase| {
                let amounts = [10.0, 55.0];
                Ok(case
                    .involved_agents
                    .iter()
                    .zip(amounts)
                    .map(|(agent, amount)| AgentBid {
                        agent_id: agent.clone(),
                        resource_id: "gpu".into(),
                        amount,
                        priority: 5,
                        justification: String::new(),
                    })
                    .collect())
            },
        )))))
        .await;
    engine
        .set_demand_predicate(Box::new(|_, resource| resource == "gpu"))
        .await;

    engine.start().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    engine.stop().await;

    let stats = engine.conflict_statistics().await;
    assert_eq!(stats.stats.total_conflicts, 1);
    assert_eq!(stats.stats.resolved_conflicts, 1);
    assert!(engine.active_conflicts().await.is_empty());
}

#[tokio::test]
async fn test_engines_are_isolated() {
    let first = CoordinationEngine::new(
        AgentId::new("engine-1"),
        fast_config(),
        echo_executor(),
        Box::new(ChannelTransport::new()),
    );
    let second = CoordinationEngine::new(
        AgentId::new("engine-2"),
        fast_config(),
        echo_executor(),
        Box::new(ChannelTransport::new()),
    );

    first.register_agent(worker("only-in-first"), None).await;

    let first_status = first.status().await;
    let second_status = second.status().await;
    assert_eq!(first_status.delegation.total_agents, 1);
    assert_eq!(second_status.delegation.total_agents, 0);
}

#[tokio::test]
async fn test_engine_from_toml() {
    let engine = CoordinationEngine::from_toml_str(
        AgentId::new("engine"),
        r#"
            [delegation]
            dispatch_batch = 2

            [comms]
            secret = "from-toml"
        "#,
        echo_executor(),
        Box::new(ChannelTransport::new()),
    )
    .unwrap();

    let status = engine.status().await;
    assert_eq!(status.delegation.total_agents, 0);
}
