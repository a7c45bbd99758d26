//! Transport seam for outbound message delivery.
//!
//! The protocol is transport-agnostic: anything that can move signed
//! message bytes to an address implements [`Transport`]. Production
//! deployments plug in a network transport; [`ChannelTransport`] wires
//! protocols together in-process for local engines and tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::error::CommsError;

/// Delivers serialized, signed messages to a transport address.
pub trait Transport: Send + Sync {
    fn deliver<'a>(
        &'a self,
        address: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), CommsError>> + Send + 'a>>;
}

/// In-process transport backed by per-address mpsc channels.
///
/// Clones share one address table, so a single instance can serve every
/// protocol endpoint in the process.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    inboxes: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address and return the receiving end of its inbox.
    pub fn register(&self, address: impl Into<String>) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes
            .write()
            .expect("transport lock poisoned")
            .insert(address.into(), tx);
        rx
    }

    pub fn unregister(&self, address: &str) {
        self.inboxes
            .write()
            .expect("transport lock poisoned")
            .remove(address);
    }
}

impl Transport for ChannelTransport {
    fn deliver<'a>(
        &'a self,
        address: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), CommsError>> + Send + 'a>> {
        let sender = self
            .inboxes
            .read()
            .expect("transport lock poisoned")
            .get(address)
            .cloned();
        let payload = payload.to_vec();
        Box::pin(async move {
            let sender =
                sender.ok_or_else(|| CommsError::Transport(format!("unknown address {address}")))?;
            sender
                .send(payload)
                .map_err(|_| CommsError::Transport(format!("inbox closed for {address}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_to_registered_address() {
        let transport = ChannelTransport::new();
        let mut rx = transport.register("mem://a");

        transport.deliver("mem://a", b"hello").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_deliver_unknown_address_fails() {
        let transport = ChannelTransport::new();
        assert!(transport.deliver("mem://ghost", b"hello").await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_address_table() {
        let transport = ChannelTransport::new();
        let clone = transport.clone();
        let mut rx = transport.register("mem://a");

        clone.deliver("mem://a", b"via clone").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"via clone");
    }
}
