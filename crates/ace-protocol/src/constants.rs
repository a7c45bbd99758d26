//! Protocol-wide constants and defaults.

/// Protocol version advertised in handshake messages.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Wildcard receiver id addressing every registered agent.
pub const BROADCAST_RECEIVER: &str = "*";

/// Metadata key naming the multicast target group.
pub const TARGET_GROUP_KEY: &str = "target_group";

/// Metadata key carrying predecessor task ids.
pub const DEPENDENCIES_KEY: &str = "dependencies";

/// Metadata key linking a subtask back to the task it was split from.
pub const PARENT_TASK_KEY: &str = "parent_task";

/// Default bound for a protocol message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default bound for the delegation task queue.
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 1_000;

/// Default task timeout when a task carries no explicit deadline.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 1_800;

/// Default retry budget for a submitted task.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-agent concurrent task limit.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;

/// An agent unseen for this long is considered offline.
pub const DEFAULT_OFFLINE_AFTER_SECS: u64 = 300;

/// Default timeout for resolving one conflict case.
pub const DEFAULT_RESOLUTION_TIMEOUT_SECS: u64 = 300;

/// Default lease granted on a contested resource to a conflict winner.
pub const DEFAULT_RESOURCE_LEASE_SECS: u64 = 3_600;
