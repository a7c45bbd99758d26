use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use ace_comms::{ChannelTransport, CommunicationProtocol, MessageHandler, ProtocolConfig};
use ace_protocol::{
    AgentId, DeliveryMode, Message, MessagePriority, MessageType, SecurityManager,
};

struct EchoHandler {
    self_id: AgentId,
}

impl MessageHandler for EchoHandler {
    fn can_handle(&self, message: &Message) -> bool {
        message.content.get("action").and_then(|v| v.as_str()) == Some("echo")
    }

    fn handle<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = Option<Message>> + Send + 'a>> {
        Box::pin(async move {
            let mut content = Map::new();
            content.insert(
                "echo".into(),
                message.content.get("text").cloned().unwrap_or(Value::Null),
            );
            Some(message.reply(self.self_id.clone(), content))
        })
    }
}

fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(100),
        ..ProtocolConfig::default()
    }
}

async fn linked_pair() -> (
    Arc<CommunicationProtocol>,
    Arc<CommunicationProtocol>,
    ChannelTransport,
) {
    let transport = ChannelTransport::new();
    let a = CommunicationProtocol::with_config(
        AgentId::new("agent-a"),
        "shared-secret",
        Box::new(transport.clone()),
        fast_config(),
    );
    let b = CommunicationProtocol::with_config(
        AgentId::new("agent-b"),
        "shared-secret",
        Box::new(transport.clone()),
        fast_config(),
    );

    let rx_a = transport.register("mem://a");
    let rx_b = transport.register("mem://b");

    a.add_trusted_peer(AgentId::new("agent-b"), None).await;
    b.add_trusted_peer(AgentId::new("agent-a"), None).await;
    a.register_peer(AgentId::new("agent-b"), "mem://b").await;
    b.register_peer(AgentId::new("agent-a"), "mem://a").await;

    a.start().await;
    b.start().await;
    a.spawn_inbound_pump(rx_a).await;
    b.spawn_inbound_pump(rx_b).await;

    (a, b, transport)
}

#[tokio::test]
async fn test_request_response_roundtrip() {
    let (a, b, _transport) = linked_pair().await;
    b.add_handler(Box::new(EchoHandler {
        self_id: AgentId::new("agent-b"),
    }))
    .await;

    let mut content = Map::new();
    content.insert("action".into(), Value::String("echo".into()));
    content.insert("text".into(), Value::String("hello, agent b".into()));

    let response = a
        .send_message(
            "agent-b",
            content,
            MessageType::Request,
            MessagePriority::Medium,
            DeliveryMode::Direct,
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    let response = response.expect("expected echo response");
    assert_eq!(response.content["echo"], "hello, agent b");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unhandled_request_gets_default_ack() {
    let (a, b, _transport) = linked_pair().await;

    let mut content = Map::new();
    content.insert("action".into(), Value::String("unknown".into()));

    let response = a
        .send_message(
            "agent-b",
            content,
            MessageType::Request,
            MessagePriority::Medium,
            DeliveryMode::Direct,
            Some(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    let response = response.expect("expected default acknowledgement");
    assert_eq!(response.content["status"], "processed");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_request_timeout_returns_none() {
    let (a, b, transport) = linked_pair().await;

    // A registered address nobody reads from: the request is delivered
    // but never answered.
    let _blackhole_rx = transport.register("mem://blackhole");
    a.register_peer(AgentId::new("blackhole"), "mem://blackhole")
        .await;

    let response = a
        .send_message(
            "blackhole",
            Map::new(),
            MessageType::Request,
            MessagePriority::Medium,
            DeliveryMode::Direct,
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    assert!(response.is_none());

    let stats = a.statistics().await;
    assert_eq!(stats.pending_requests, 0, "timed-out slot must be dropped");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_forged_message_dropped_silently() {
    let (a, b, _transport) = linked_pair().await;

    let mut forged = Message::new(AgentId::new("agent-a"), "agent-b", MessageType::Request);
    forged.signature = Some("deadbeef".repeat(8));
    let payload = serde_json::to_vec(&forged).unwrap();

    b.handle_inbound(&payload).await.unwrap();
    let stats = b.statistics().await;
    assert_eq!(stats.queue_depth, 0, "forged message must not be queued");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unknown_sender_dropped() {
    let (a, b, _transport) = linked_pair().await;

    // Correctly signed with the shared secret, but from a sender agent-b
    // never registered as trusted.
    let mallory = SecurityManager::new("shared-secret");
    let mut msg = Message::new(AgentId::new("mallory"), "agent-b", MessageType::Request);
    msg.signature = Some(mallory.sign(&msg).unwrap());
    let payload = serde_json::to_vec(&msg).unwrap();

    b.handle_inbound(&payload).await.unwrap();
    assert_eq!(b.statistics().await.queue_depth, 0);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_expired_message_dropped() {
    let (a, b, _transport) = linked_pair().await;

    let signer = SecurityManager::new("shared-secret");
    let mut msg = Message::new(AgentId::new("agent-a"), "agent-b", MessageType::Notification);
    msg.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(5));
    msg.signature = Some(signer.sign(&msg).unwrap());
    let payload = serde_json::to_vec(&msg).unwrap();

    b.handle_inbound(&payload).await.unwrap();
    assert_eq!(b.statistics().await.queue_depth, 0);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_is_validation_error() {
    let (a, b, _transport) = linked_pair().await;

    let result = b.handle_inbound(b"{not json").await;
    assert!(result.is_err());

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_heartbeat_marks_peers_connected() {
    let (a, b, _transport) = linked_pair().await;

    let mut content = Map::new();
    content.insert("timestamp".into(), Value::String("now".into()));
    b.send_message(
        "agent-a",
        content,
        MessageType::Heartbeat,
        MessagePriority::Low,
        DeliveryMode::Direct,
        None,
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(a
        .connected_agents()
        .await
        .contains(&AgentId::new("agent-b")));
    // The ack heartbeat flows back and marks agent-a connected on b.
    assert!(b
        .connected_agents()
        .await
        .contains(&AgentId::new("agent-a")));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_notification_fires_event_callbacks() {
    let (a, b, _transport) = linked_pair().await;

    let received = Arc::new(std::sync::Mutex::new(Vec::<Value>::new()));
    let sink = Arc::clone(&received);
    b.subscribe_event(
        "task_completed",
        Box::new(move |data| {
            sink.lock().unwrap().push(data.clone());
        }),
    )
    .await;

    a.notify(
        "agent-b",
        "task_completed",
        serde_json::json!({"task_id": "t-1"}),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["task_id"], "t-1");

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_stop_resolves_outstanding_request() {
    let (a, b, transport) = linked_pair().await;

    let _blackhole_rx = transport.register("mem://blackhole");
    a.register_peer(AgentId::new("blackhole"), "mem://blackhole")
        .await;

    let requester = Arc::clone(&a);
    let pending = tokio::spawn(async move {
        requester
            .send_message(
                "blackhole",
                Map::new(),
                MessageType::Request,
                MessagePriority::Medium,
                DeliveryMode::Direct,
                None,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    a.stop().await;

    let result = pending.await.unwrap().unwrap();
    assert!(result.is_none(), "stop must resolve the wait with no response");

    b.stop().await;
}
