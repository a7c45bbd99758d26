//! ACE Comms - secure agent-to-agent messaging
//!
//! Implements the communication stack of the coordination engine:
//! - [`MessageRouter`]: agent/group id to transport address resolution
//! - [`MessageQueue`]: bounded, priority-ordered mailbox
//! - [`Transport`]: pluggable delivery seam (with an in-process
//!   [`ChannelTransport`] for local wiring and tests)
//! - [`CommunicationProtocol`]: send/receive, request/response
//!   correlation, heartbeats, and handler dispatch

pub mod error;
pub mod protocol;
pub mod queue;
pub mod router;
pub mod transport;

pub use error::CommsError;
pub use protocol::{
    CommStatistics, CommunicationProtocol, EventCallback, MessageHandler, ProtocolConfig,
};
pub use queue::MessageQueue;
pub use router::MessageRouter;
pub use transport::{ChannelTransport, Transport};
