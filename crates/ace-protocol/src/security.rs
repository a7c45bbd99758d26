//! Message authentication with pre-shared secrets.
//!
//! Each trust relationship carries a shared secret; signatures are
//! HMAC-SHA256 over the canonical (field-sorted JSON, signature excluded)
//! form of the wire message. Verification fails closed: an unknown sender
//! or a missing/incorrect signature yields `false`, never an error the
//! sender could learn from.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ProtocolError;
use crate::identity::AgentId;
use crate::message::Message;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies messages for one agent's trust relationships.
pub struct SecurityManager {
    base_secret: Vec<u8>,
    /// Peer id → dedicated shared secret. Peers registered without a
    /// dedicated secret fall back to the base secret.
    peer_secrets: HashMap<AgentId, Vec<u8>>,
    trusted_peers: std::collections::HashSet<AgentId>,
}

impl SecurityManager {
    pub fn new(base_secret: impl AsRef<[u8]>) -> Self {
        Self {
            base_secret: base_secret.as_ref().to_vec(),
            peer_secrets: HashMap::new(),
            trusted_peers: std::collections::HashSet::new(),
        }
    }

    /// Register a trusted peer, optionally with a dedicated shared secret.
    pub fn add_trusted_peer(&mut self, peer: AgentId, secret: Option<&[u8]>) {
        if let Some(secret) = secret {
            self.peer_secrets.insert(peer.clone(), secret.to_vec());
        }
        self.trusted_peers.insert(peer);
    }

    pub fn remove_trusted_peer(&mut self, peer: &AgentId) {
        self.trusted_peers.remove(peer);
        self.peer_secrets.remove(peer);
    }

    pub fn is_trusted(&self, peer: &AgentId) -> bool {
        self.trusted_peers.contains(peer)
    }

    /// Sign a message for its receiver. The message itself is not
    /// mutated; the caller stores the returned signature.
    pub fn sign(&self, message: &Message) -> Result<String, ProtocolError> {
        let peer = AgentId::new(message.receiver_id.clone());
        let secret = self.secret_for(&peer);
        let payload = canonical_payload(message)?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| ProtocolError::Crypto(e.to_string()))?;
        mac.update(&payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify an inbound message's signature. Fails closed; the
    /// message's original signature field is left untouched.
    pub fn verify(&self, message: &Message) -> bool {
        let Some(signature) = message.signature.as_deref() else {
            return false;
        };
        if !self.trusted_peers.contains(&message.sender_id) {
            return false;
        }
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let secret = self.secret_for(&message.sender_id);
        let Ok(payload) = canonical_payload(message) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
            return false;
        };
        mac.update(&payload);
        mac.verify_slice(&sig_bytes).is_ok()
    }

    fn secret_for(&self, peer: &AgentId) -> &[u8] {
        self.peer_secrets
            .get(peer)
            .map(|s| s.as_slice())
            .unwrap_or(&self.base_secret)
    }
}

/// Canonical signing payload: the message as field-sorted JSON with the
/// signature member removed. serde_json object keys are ordered, so the
/// same message always canonicalizes to the same bytes.
fn canonical_payload(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut value = serde_json::to_value(message)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("signature");
    }
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn signed_message(manager: &SecurityManager) -> Message {
        let mut msg = Message::new(AgentId::new("alice"), "bob", MessageType::Request);
        msg.content
            .insert("action".into(), serde_json::json!("ping"));
        msg.signature = Some(manager.sign(&msg).unwrap());
        msg
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let mut alice = SecurityManager::new("shared-secret");
        alice.add_trusted_peer(AgentId::new("bob"), None);
        let mut bob = SecurityManager::new("shared-secret");
        bob.add_trusted_peer(AgentId::new("alice"), None);

        let msg = signed_message(&alice);
        assert!(bob.verify(&msg));
    }

    #[test]
    fn test_verify_rejects_tampered_content() {
        let mut bob = SecurityManager::new("shared-secret");
        bob.add_trusted_peer(AgentId::new("alice"), None);
        let alice = SecurityManager::new("shared-secret");

        let mut msg = signed_message(&alice);
        msg.content
            .insert("action".into(), serde_json::json!("pong"));
        assert!(!bob.verify(&msg));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let mut bob = SecurityManager::new("other-secret");
        bob.add_trusted_peer(AgentId::new("alice"), None);
        let alice = SecurityManager::new("shared-secret");

        let msg = signed_message(&alice);
        assert!(!bob.verify(&msg));
    }

    #[test]
    fn test_verify_rejects_unknown_sender() {
        let bob = SecurityManager::new("shared-secret");
        let alice = SecurityManager::new("shared-secret");

        let msg = signed_message(&alice);
        assert!(!bob.verify(&msg));
    }

    #[test]
    fn test_verify_rejects_missing_signature() {
        let mut bob = SecurityManager::new("shared-secret");
        bob.add_trusted_peer(AgentId::new("alice"), None);

        let msg = Message::new(AgentId::new("alice"), "bob", MessageType::Request);
        assert!(!bob.verify(&msg));
    }

    #[test]
    fn test_verify_leaves_signature_intact() {
        let mut bob = SecurityManager::new("shared-secret");
        bob.add_trusted_peer(AgentId::new("alice"), None);
        let alice = SecurityManager::new("shared-secret");

        let msg = signed_message(&alice);
        let original = msg.signature.clone();
        bob.verify(&msg);
        assert_eq!(msg.signature, original);
    }

    #[test]
    fn test_per_peer_secret_used_over_base() {
        let mut alice = SecurityManager::new("alice-base");
        alice.add_trusted_peer(AgentId::new("bob"), Some(b"pair-secret"));
        let mut bob = SecurityManager::new("bob-base");
        bob.add_trusted_peer(AgentId::new("alice"), Some(b"pair-secret"));

        let msg = signed_message(&alice);
        assert!(bob.verify(&msg));
    }
}
