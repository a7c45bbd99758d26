//! The agent communication protocol.
//!
//! One `CommunicationProtocol` instance is an agent's messaging
//! endpoint. Outbound messages are signed, routed, and handed to the
//! [`Transport`]; inbound bytes are verified, expiry-checked, and queued
//! into the priority mailbox. Two background loops drive the endpoint:
//! a processor that drains the mailbox one message at a time, and a
//! heartbeat loop that periodically pings connected peers.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use ace_protocol::{
    AgentId, DeliveryMode, Message, MessagePriority, MessageType, SecurityManager,
    BROADCAST_RECEIVER, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY,
};

use crate::error::CommsError;
use crate::queue::MessageQueue;
use crate::router::{MessageRouter, RoutingPolicy};
use crate::transport::Transport;

/// Application-level message handler. The first registered handler whose
/// `can_handle` claims a message processes it; a returned message is
/// sent back as the response when the inbound message was a request.
pub trait MessageHandler: Send + Sync {
    fn can_handle(&self, message: &Message) -> bool;

    fn handle<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Option<Message>> + Send + 'a>>;
}

/// Callback invoked for notification events the endpoint subscribes to.
pub type EventCallback = Box<dyn Fn(&Value) + Send + Sync>;

/// Tunables for a protocol endpoint.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Bound on the inbound mailbox.
    pub queue_capacity: usize,
    /// How often connected peers are heartbeated.
    pub heartbeat_interval: Duration,
    /// Idle wait between mailbox polls when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Endpoint traffic counters.
#[derive(Debug, Clone, Default)]
pub struct TrafficStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_failed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Snapshot of an endpoint's observable state.
#[derive(Debug, Clone)]
pub struct CommStatistics {
    pub traffic: TrafficStats,
    pub connected_agents: usize,
    pub pending_requests: usize,
    pub queue_depth: usize,
}

struct ProtocolState {
    queue: MessageQueue,
    connected: HashSet<AgentId>,
    pending: HashMap<String, oneshot::Sender<Message>>,
    stats: TrafficStats,
}

/// An agent's secure messaging endpoint.
pub struct CommunicationProtocol {
    agent_id: AgentId,
    config: ProtocolConfig,
    security: RwLock<SecurityManager>,
    router: RwLock<MessageRouter>,
    handlers: RwLock<Vec<Box<dyn MessageHandler>>>,
    events: RwLock<HashMap<String, Vec<EventCallback>>>,
    transport: Box<dyn Transport>,
    state: RwLock<ProtocolState>,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl CommunicationProtocol {
    pub fn new(
        agent_id: AgentId,
        secret: impl AsRef<[u8]>,
        transport: Box<dyn Transport>,
    ) -> Arc<Self> {
        Self::with_config(agent_id, secret, transport, ProtocolConfig::default())
    }

    pub fn with_config(
        agent_id: AgentId,
        secret: impl AsRef<[u8]>,
        transport: Box<dyn Transport>,
        config: ProtocolConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            agent_id,
            security: RwLock::new(SecurityManager::new(secret)),
            router: RwLock::new(MessageRouter::new()),
            handlers: RwLock::new(Vec::new()),
            events: RwLock::new(HashMap::new()),
            transport,
            state: RwLock::new(ProtocolState {
                queue: MessageQueue::new(config.queue_capacity),
                connected: HashSet::new(),
                pending: HashMap::new(),
                stats: TrafficStats::default(),
            }),
            config,
            shutdown,
            loops: Mutex::new(Vec::new()),
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    // ── Registration ──

    pub async fn add_trusted_peer(&self, peer: AgentId, secret: Option<&[u8]>) {
        self.security.write().await.add_trusted_peer(peer, secret);
    }

    pub async fn register_peer(&self, agent_id: AgentId, address: impl Into<String>) {
        self.router.write().await.register_agent(agent_id, address);
    }

    pub async fn unregister_peer(&self, agent_id: &AgentId) {
        self.router.write().await.unregister_agent(agent_id);
        self.state.write().await.connected.remove(agent_id);
    }

    pub async fn add_to_group(&self, agent_id: AgentId, group: impl Into<String>) {
        self.router.write().await.add_to_group(agent_id, group);
    }

    pub async fn remove_from_group(&self, agent_id: &AgentId, group: &str) {
        self.router.write().await.remove_from_group(agent_id, group);
    }

    pub async fn add_routing_policy(&self, policy: RoutingPolicy) {
        self.router.write().await.add_policy(policy);
    }

    pub async fn add_handler(&self, handler: Box<dyn MessageHandler>) {
        self.handlers.write().await.push(handler);
    }

    pub async fn subscribe_event(&self, event_type: impl Into<String>, callback: EventCallback) {
        self.events
            .write()
            .await
            .entry(event_type.into())
            .or_default()
            .push(callback);
    }

    // ── Lifecycle ──

    /// Spawn the processing and heartbeat loops.
    pub async fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return;
        }
        self.shutdown.send_replace(false);

        let processor = {
            let endpoint = Arc::clone(self);
            tokio::spawn(async move { endpoint.process_loop().await })
        };
        let heartbeat = {
            let endpoint = Arc::clone(self);
            tokio::spawn(async move { endpoint.heartbeat_loop().await })
        };
        loops.push(processor);
        loops.push(heartbeat);

        tracing::info!(agent_id = %self.agent_id, "Communication protocol started");
    }

    /// Stop all background loops and fail any pending request waiters.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        // Dropping the senders resolves every outstanding request wait
        // with "no response".
        self.state.write().await.pending.clear();
        tracing::info!(agent_id = %self.agent_id, "Communication protocol stopped");
    }

    /// Forward an inbound byte stream (e.g. a [`crate::ChannelTransport`]
    /// inbox) into this endpoint until it closes or the protocol stops.
    pub async fn spawn_inbound_pump(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        let endpoint = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut shutdown = endpoint.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    inbound = rx.recv() => match inbound {
                        Some(payload) => {
                            if let Err(e) = endpoint.handle_inbound(&payload).await {
                                tracing::debug!(error = %e, "Discarded inbound payload");
                            }
                        }
                        None => break,
                    }
                }
            }
        });
        self.loops.lock().await.push(handle);
    }

    // ── Sending ──

    /// Send a message. For [`MessageType::Request`] the caller suspends
    /// until the correlated response arrives, the timeout elapses, or
    /// the protocol stops; `Ok(None)` means no response. Every other
    /// kind is fire-and-forget and resolves to `Ok(None)` immediately.
    pub async fn send_message(
        &self,
        receiver_id: &str,
        content: Map<String, Value>,
        message_type: MessageType,
        priority: MessagePriority,
        delivery_mode: DeliveryMode,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, CommsError> {
        let mut message = Message::new(self.agent_id.clone(), receiver_id, message_type)
            .with_content(content)
            .with_priority(priority)
            .with_delivery_mode(delivery_mode);

        if let Some(timeout) = timeout {
            message.expires_at = Utc::now()
                .checked_add_signed(chrono::Duration::from_std(timeout).unwrap_or_default());
        }

        let waiter = if message_type == MessageType::Request {
            let correlation_id = uuid::Uuid::new_v4().to_string();
            message.correlation_id = Some(correlation_id.clone());
            let (tx, rx) = oneshot::channel();
            self.state
                .write()
                .await
                .pending
                .insert(correlation_id.clone(), tx);
            Some((correlation_id, rx))
        } else {
            None
        };

        if let Err(e) = self.sign_and_dispatch(&mut message).await {
            if let Some((correlation_id, _)) = &waiter {
                self.state.write().await.pending.remove(correlation_id);
            }
            return Err(e);
        }

        let Some((correlation_id, rx)) = waiter else {
            return Ok(None);
        };

        let response = match timeout {
            Some(t) => tokio::time::timeout(t, rx)
                .await
                .ok()
                .and_then(|r| r.ok()),
            None => rx.await.ok(),
        };
        if response.is_none() {
            self.state.write().await.pending.remove(&correlation_id);
            tracing::debug!(
                correlation_id = %correlation_id,
                "Request completed without a response"
            );
        }
        Ok(response)
    }

    /// Fire-and-forget notification carrying a typed event.
    pub async fn notify(
        &self,
        receiver_id: &str,
        event_type: &str,
        data: Value,
    ) -> Result<(), CommsError> {
        let mut content = Map::new();
        content.insert("event_type".into(), Value::String(event_type.into()));
        content.insert("data".into(), data);
        self.send_message(
            receiver_id,
            content,
            MessageType::Notification,
            MessagePriority::Medium,
            DeliveryMode::Direct,
            None,
        )
        .await?;
        Ok(())
    }

    /// Broadcast to every registered peer.
    pub async fn broadcast(
        &self,
        content: Map<String, Value>,
        priority: MessagePriority,
    ) -> Result<(), CommsError> {
        self.send_message(
            BROADCAST_RECEIVER,
            content,
            MessageType::Broadcast,
            priority,
            DeliveryMode::Broadcast,
            None,
        )
        .await?;
        Ok(())
    }

    // ── Receiving ──

    /// Ingest raw inbound bytes: deserialize, verify, expiry-check,
    /// enqueue. Messages failing verification are dropped without any
    /// reply; an unauthenticated sender learns nothing.
    pub async fn handle_inbound(&self, payload: &[u8]) -> Result<(), CommsError> {
        let message: Message = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                self.state.write().await.stats.messages_failed += 1;
                return Err(CommsError::Validation(format!("malformed message: {e}")));
            }
        };

        {
            let mut state = self.state.write().await;
            state.stats.messages_received += 1;
            state.stats.bytes_received += payload.len() as u64;
        }

        if !self.security.read().await.verify(&message) {
            tracing::debug!(sender = %message.sender_id, "Dropping message that failed verification");
            return Ok(());
        }

        if message.is_expired() {
            tracing::debug!(message_id = %message.message_id, "Dropping expired message");
            return Ok(());
        }

        if let Some(evicted) = self.state.write().await.queue.enqueue(message) {
            tracing::debug!(
                message_id = %evicted.message_id,
                "Mailbox full, evicted oldest low-priority message"
            );
        }
        Ok(())
    }

    // ── Introspection ──

    pub async fn connected_agents(&self) -> HashSet<AgentId> {
        self.state.read().await.connected.clone()
    }

    pub async fn statistics(&self) -> CommStatistics {
        let state = self.state.read().await;
        CommStatistics {
            traffic: state.stats.clone(),
            connected_agents: state.connected.len(),
            pending_requests: state.pending.len(),
            queue_depth: state.queue.len(),
        }
    }

    // ── Internals ──

    async fn sign_and_dispatch(&self, message: &mut Message) -> Result<usize, CommsError> {
        let signature = self.security.read().await.sign(message)?;
        message.signature = Some(signature);
        self.dispatch(message).await
    }

    async fn dispatch(&self, message: &Message) -> Result<usize, CommsError> {
        let targets = self.router.read().await.route(message);
        if targets.is_empty() {
            self.state.write().await.stats.messages_failed += 1;
            return Err(CommsError::NoRoute(message.receiver_id.clone()));
        }

        let payload =
            serde_json::to_vec(message).map_err(|e| CommsError::Validation(e.to_string()))?;

        let mut delivered = 0usize;
        for target in &targets {
            match self.transport.deliver(target, &payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(target = %target, error = %e, "Message delivery failed")
                }
            }
        }

        let mut state = self.state.write().await;
        if delivered > 0 {
            state.stats.messages_sent += 1;
            state.stats.bytes_sent += (payload.len() * delivered) as u64;
            Ok(delivered)
        } else {
            state.stats.messages_failed += 1;
            Err(CommsError::Transport(format!(
                "all {} deliveries failed",
                targets.len()
            )))
        }
    }

    async fn process_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            let message = self.state.write().await.queue.dequeue();
            match message {
                Some(message) => self.process_message(message).await,
                None => {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }

    async fn process_message(&self, message: Message) {
        match message.message_type {
            MessageType::Response => {
                self.resolve_pending(message).await;
                return;
            }
            MessageType::Heartbeat => {
                self.handle_heartbeat(message).await;
                return;
            }
            _ => {}
        }

        let mut response = None;
        {
            let handlers = self.handlers.read().await;
            for handler in handlers.iter() {
                if handler.can_handle(&message) {
                    if let Some(reply) = handler.handle(&message).await {
                        response = Some(reply);
                        break;
                    }
                }
            }
        }

        if message.message_type == MessageType::Request {
            let mut reply = response.unwrap_or_else(|| {
                let mut content = Map::new();
                content.insert("status".into(), Value::String("processed".into()));
                message.reply(self.agent_id.clone(), content)
            });
            reply.receiver_id = message.sender_id.to_string();
            reply.correlation_id = message.correlation_id.clone();
            if let Err(e) = self.sign_and_dispatch(&mut reply).await {
                tracing::warn!(error = %e, "Failed to deliver request response");
            }
            return;
        }

        if message.message_type == MessageType::Notification {
            let event_type = message
                .content
                .get("event_type")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let Some(event_type) = event_type {
                let data = message.content.get("data").cloned().unwrap_or(Value::Null);
                self.emit_event(&event_type, &data).await;
            }
        }
    }

    async fn resolve_pending(&self, message: Message) {
        let Some(correlation_id) = message.correlation_id.clone() else {
            tracing::debug!(message_id = %message.message_id, "Response without correlation id");
            return;
        };
        let slot = self.state.write().await.pending.remove(&correlation_id);
        match slot {
            Some(slot) => {
                let _ = slot.send(message);
            }
            None => {
                tracing::debug!(correlation_id = %correlation_id, "Response without a pending request")
            }
        }
    }

    async fn handle_heartbeat(&self, message: Message) {
        let sender = message.sender_id.clone();
        self.state.write().await.connected.insert(sender.clone());

        // An ack heartbeat is not acked again, so a ping/ack pair never
        // escalates into a storm.
        let is_ack = message
            .content
            .get("ack")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if is_ack {
            return;
        }

        let mut reply = Message::new(self.agent_id.clone(), sender.to_string(), MessageType::Heartbeat)
            .with_priority(MessagePriority::Low);
        reply.content.insert("ack".into(), Value::Bool(true));
        reply
            .content
            .insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        if let Err(e) = self.sign_and_dispatch(&mut reply).await {
            tracing::debug!(peer = %sender, error = %e, "Heartbeat reply failed");
        }
    }

    async fn emit_event(&self, event_type: &str, data: &Value) {
        let events = self.events.read().await;
        if let Some(callbacks) = events.get(event_type) {
            for callback in callbacks {
                callback(data);
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    let has_peers = !self.state.read().await.connected.is_empty();
                    if !has_peers {
                        continue;
                    }
                    let mut heartbeat = Message::new(
                        self.agent_id.clone(),
                        BROADCAST_RECEIVER,
                        MessageType::Heartbeat,
                    )
                    .with_priority(MessagePriority::Low)
                    .with_delivery_mode(DeliveryMode::Broadcast);
                    heartbeat
                        .content
                        .insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
                    if let Err(e) = self.sign_and_dispatch(&mut heartbeat).await {
                        tracing::debug!(error = %e, "Heartbeat broadcast failed");
                    }
                }
            }
        }
    }
}
