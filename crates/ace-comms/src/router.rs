//! Agent id and group resolution to transport addresses.

use std::collections::{HashMap, HashSet};

use ace_protocol::{AgentId, DeliveryMode, Message, TARGET_GROUP_KEY};

/// A custom routing policy may contribute an extra target address for a
/// message (e.g. a tap, a relay, an audit sink).
pub type RoutingPolicy = Box<dyn Fn(&Message) -> Option<String> + Send + Sync>;

/// Maps agent ids and groups to transport addresses.
#[derive(Default)]
pub struct MessageRouter {
    routing_table: HashMap<AgentId, String>,
    groups: HashMap<String, HashSet<AgentId>>,
    policies: Vec<RoutingPolicy>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_agent(&mut self, agent_id: AgentId, address: impl Into<String>) {
        self.routing_table.insert(agent_id, address.into());
    }

    /// Remove an agent from the address table and from every group.
    pub fn unregister_agent(&mut self, agent_id: &AgentId) {
        self.routing_table.remove(agent_id);
        for members in self.groups.values_mut() {
            members.remove(agent_id);
        }
    }

    pub fn add_to_group(&mut self, agent_id: AgentId, group: impl Into<String>) {
        self.groups.entry(group.into()).or_default().insert(agent_id);
    }

    pub fn remove_from_group(&mut self, agent_id: &AgentId, group: &str) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(agent_id);
        }
    }

    pub fn add_policy(&mut self, policy: RoutingPolicy) {
        self.policies.push(policy);
    }

    pub fn address_of(&self, agent_id: &AgentId) -> Option<&str> {
        self.routing_table.get(agent_id).map(|a| a.as_str())
    }

    /// Resolve the target addresses for a message. Duplicates are
    /// removed, first occurrence wins.
    pub fn route(&self, message: &Message) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();

        match message.delivery_mode {
            DeliveryMode::Direct | DeliveryMode::Reliable => {
                let receiver = AgentId::new(message.receiver_id.clone());
                if let Some(address) = self.routing_table.get(&receiver) {
                    targets.push(address.clone());
                }
            }
            DeliveryMode::Broadcast => {
                targets.extend(self.routing_table.values().cloned());
            }
            DeliveryMode::Multicast => {
                let group = message
                    .metadata
                    .get(TARGET_GROUP_KEY)
                    .and_then(|v| v.as_str());
                if let Some(members) = group.and_then(|g| self.groups.get(g)) {
                    for agent_id in members {
                        if let Some(address) = self.routing_table.get(agent_id) {
                            targets.push(address.clone());
                        }
                    }
                }
            }
        }

        for policy in &self.policies {
            if let Some(extra) = policy(message) {
                targets.push(extra);
            }
        }

        let mut seen = HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));
        targets
    }
}
