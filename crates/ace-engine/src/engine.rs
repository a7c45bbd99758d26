//! The composed coordination engine.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use ace_comms::{CommStatistics, CommunicationProtocol, Transport};
use ace_conflict::{
    ConflictCase, ConflictResolutionManager, ConflictResolver, ConflictStatistics,
    DemandPredicate, Resource, ScheduledTask,
};
use ace_delegation::{DelegationError, DelegationManager, DelegationStatus, Executor};
use ace_protocol::{AgentId, AgentProfile, TaskPriority, TaskRequest, TaskResult, TaskStatus};

use crate::config::EngineConfig;

/// Combined status snapshot across the three stacks.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub delegation: DelegationStatus,
    pub comms: CommStatistics,
    pub conflicts: ConflictStatistics,
}

/// One coordination engine: a delegation manager, a communication
/// endpoint, and a conflict resolution manager wired together.
///
/// All registries live inside the engine instance. Several engines can
/// coexist in one process without sharing any state.
pub struct CoordinationEngine {
    config: EngineConfig,
    delegation: Arc<DelegationManager>,
    protocol: Arc<CommunicationProtocol>,
    conflicts: RwLock<ConflictResolutionManager>,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinationEngine {
    pub fn new(
        engine_id: AgentId,
        config: EngineConfig,
        executor: Arc<dyn Executor>,
        transport: Box<dyn Transport>,
    ) -> Arc<Self> {
        let delegation = DelegationManager::with_config(executor, (&config.delegation).into());
        let protocol = CommunicationProtocol::with_config(
            engine_id,
            config.comms.secret.as_bytes(),
            transport,
            (&config.comms).into(),
        );
        let conflicts = RwLock::new(ConflictResolutionManager::new((&config.conflict).into()));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            delegation,
            protocol,
            conflicts,
            shutdown,
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Build an engine from a TOML configuration document.
    pub fn from_toml_str(
        engine_id: AgentId,
        text: &str,
        executor: Arc<dyn Executor>,
        transport: Box<dyn Transport>,
    ) -> anyhow::Result<Arc<Self>> {
        let config = EngineConfig::from_toml(text)
            .map_err(|e| anyhow::anyhow!("invalid engine configuration: {e}"))?;
        Ok(Self::new(engine_id, config, executor, transport))
    }

    // ── Lifecycle ──

    pub async fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return;
        }
        self.shutdown.send_replace(false);
        self.delegation.start().await;
        self.protocol.start().await;

        let engine = Arc::clone(self);
        loops.push(tokio::spawn(async move {
            engine.conflict_scan_loop().await;
        }));
        tracing::info!("Coordination engine started");
    }

    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.protocol.stop().await;
        self.delegation.stop().await;
        tracing::info!("Coordination engine stopped");
    }

    async fn conflict_scan_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let scan_interval =
            std::time::Duration::from_millis(self.config.conflict.scan_interval_ms);
        let mut ticker = tokio::time::interval(scan_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    let agents = self.delegation.agent_ids().await;
                    let tasks = self.scheduled_snapshot().await;
                    self.conflicts
                        .write()
                        .await
                        .monitor_and_resolve(&agents, &tasks)
                        .await;
                }
            }
        }
    }

    /// The conflict detector's view of in-flight work.
    async fn scheduled_snapshot(&self) -> Vec<ScheduledTask> {
        self.delegation
            .active_tasks()
            .await
            .into_iter()
            .map(|(task, agent_id)| ScheduledTask {
                task_id: task.task_id.clone(),
                assigned_agent: Some(agent_id),
                priority: urgency(task.priority),
                deadline: task.deadline,
                estimated_duration: task.estimated_duration,
            })
            .collect()
    }

    // ── Management surface ──

    /// Register a worker. With an address, the agent also becomes a
    /// trusted, routable messaging peer.
    pub async fn register_agent(&self, profile: AgentProfile, address: Option<&str>) {
        let agent_id = profile.agent_id.clone();
        self.delegation.register_agent(profile).await;
        if let Some(address) = address {
            self.protocol
                .register_peer(agent_id.clone(), address)
                .await;
            self.protocol.add_trusted_peer(agent_id, None).await;
        }
    }

    pub async fn unregister_agent(&self, agent_id: &AgentId) {
        self.delegation.unregister_agent(agent_id).await;
        self.protocol.unregister_peer(agent_id).await;
    }

    pub async fn submit_task(&self, task: TaskRequest) -> Result<String, DelegationError> {
        self.delegation.submit_task(task).await
    }

    pub async fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.delegation.task_status(task_id).await
    }

    pub async fn task_result(&self, task_id: &str) -> Option<TaskResult> {
        self.delegation.result(task_id).await
    }

    pub async fn register_resource(&self, resource: Resource) {
        self.conflicts.write().await.register_resource(resource);
    }

    pub async fn unregister_resource(&self, resource_id: &str) {
        self.conflicts.write().await.unregister_resource(resource_id);
    }

    pub async fn add_resolver(&self, resolver: Box<dyn ConflictResolver>) {
        self.conflicts.write().await.add_resolver(resolver);
    }

    pub async fn set_demand_predicate(&self, predicate: DemandPredicate) {
        self.conflicts
            .write()
            .await
            .detector_mut()
            .set_demand_predicate(predicate);
    }

    pub async fn conflict_statistics(&self) -> ConflictStatistics {
        self.conflicts.read().await.statistics()
    }

    pub async fn active_conflicts(&self) -> Vec<ConflictCase> {
        self.conflicts
            .read()
            .await
            .active_conflicts()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            delegation: self.delegation.status().await,
            comms: self.protocol.statistics().await,
            conflicts: self.conflicts.read().await.statistics(),
        }
    }

    /// The underlying messaging endpoint, for direct wiring.
    pub fn protocol(&self) -> &Arc<CommunicationProtocol> {
        &self.protocol
    }

    /// The underlying delegation manager.
    pub fn delegation(&self) -> &Arc<DelegationManager> {
        &self.delegation
    }
}

/// Map a task's scheduling priority onto the 1–10 conflict urgency
/// scale.
fn urgency(priority: TaskPriority) -> u8 {
    match priority {
        TaskPriority::Critical => 9,
        TaskPriority::High => 8,
        TaskPriority::Medium => 5,
        TaskPriority::Low => 3,
    }
}
