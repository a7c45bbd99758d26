//! Capacity-bounded lockable resources.
//!
//! A resource is a counted pool: `reserve(amount)` takes units,
//! `release(amount)` returns them. An exclusive lock is a pool of
//! capacity 1. At most one holder exists at a time, and a holder's
//! lease auto-expires: the next availability check past the expiry
//! implicitly releases the reservation, so a crashed holder cannot
//! starve everyone else.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ace_protocol::AgentId;

/// A named, capacity-bounded lockable unit.
///
/// Invariant: `0 <= available <= capacity`; a non-null holder implies
/// `available` decreased by exactly the reserved amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: String,
    pub resource_type: String,
    pub capacity: u32,
    pub available: u32,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    pub locked_by: Option<AgentId>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Units held by the current holder; restored on release or expiry.
    #[serde(default)]
    reserved: u32,
}

impl Resource {
    pub fn new(
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
        capacity: u32,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
            capacity,
            available: capacity,
            properties: HashMap::new(),
            locked_by: None,
            lock_expires_at: None,
            reserved: 0,
        }
    }

    /// Whether `amount` units can be reserved now. An expired lease is
    /// released as a side effect of the check.
    pub fn is_available(&mut self, amount: u32) -> bool {
        if let Some(expiry) = self.lock_expires_at {
            if self.locked_by.is_some() && Utc::now() > expiry {
                tracing::debug!(
                    resource_id = %self.resource_id,
                    "Lease expired, releasing reservation"
                );
                self.restore_and_unlock();
            }
        }
        self.available >= amount && self.locked_by.is_none()
    }

    /// Reserve `amount` units for `agent_id` under a lease. Fails when
    /// the pool is short or another holder is active.
    pub fn reserve(&mut self, amount: u32, agent_id: AgentId, lease: Duration) -> bool {
        if !self.is_available(amount) {
            return false;
        }
        self.available -= amount;
        self.reserved = amount;
        self.locked_by = Some(agent_id);
        self.lock_expires_at =
            Utc::now().checked_add_signed(chrono::Duration::from_std(lease).unwrap_or_default());
        true
    }

    /// Return `amount` units. Only the current holder may release.
    pub fn release(&mut self, amount: u32, agent_id: &AgentId) -> bool {
        if self.locked_by.as_ref() != Some(agent_id) {
            return false;
        }
        self.available = (self.available + amount).min(self.capacity);
        self.locked_by = None;
        self.lock_expires_at = None;
        self.reserved = 0;
        true
    }

    /// Forcibly clear the lock, restoring the reserved units.
    pub fn unlock(&mut self) {
        self.restore_and_unlock();
    }

    fn restore_and_unlock(&mut self) {
        self.available = (self.available + self.reserved).min(self.capacity);
        self.reserved = 0;
        self.locked_by = None;
        self.lock_expires_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_release_bounds() {
        let mut pool = Resource::new("db", "database", 5);
        assert!(pool.reserve(2, AgentId::new("a"), Duration::from_secs(60)));
        assert_eq!(pool.available, 3);
        assert_eq!(pool.locked_by, Some(AgentId::new("a")));

        assert!(pool.release(2, &AgentId::new("a")));
        assert_eq!(pool.available, 5);
        assert!(pool.locked_by.is_none());
    }

    #[test]
    fn test_single_holder() {
        let mut pool = Resource::new("db", "database", 5);
        assert!(pool.reserve(1, AgentId::new("a"), Duration::from_secs(60)));
        // Units remain, but a second holder is refused.
        assert!(!pool.reserve(1, AgentId::new("b"), Duration::from_secs(60)));
    }

    #[test]
    fn test_release_requires_holder() {
        let mut pool = Resource::new("db", "database", 5);
        pool.reserve(1, AgentId::new("a"), Duration::from_secs(60));
        assert!(!pool.release(1, &AgentId::new("b")));
        assert_eq!(pool.available, 4);
    }

    #[test]
    fn test_insufficient_capacity() {
        let mut pool = Resource::new("db", "database", 2);
        assert!(!pool.reserve(3, AgentId::new("a"), Duration::from_secs(60)));
        assert_eq!(pool.available, 2);
    }

    #[test]
    fn test_expired_lease_implicitly_released() {
        let mut pool = Resource::new("db", "database", 1);
        assert!(pool.reserve(1, AgentId::new("a"), Duration::from_secs(0)));
        assert_eq!(pool.available, 0);

        std::thread::sleep(Duration::from_millis(10));
        // The availability check past expiry restores the pool.
        assert!(pool.is_available(1));
        assert_eq!(pool.available, 1);
        assert!(pool.locked_by.is_none());
    }

    #[test]
    fn test_release_never_exceeds_capacity() {
        let mut pool = Resource::new("db", "database", 2);
        pool.reserve(1, AgentId::new("a"), Duration::from_secs(60));
        assert!(pool.release(5, &AgentId::new("a")));
        assert_eq!(pool.available, 2);
    }

    #[test]
    fn test_exclusive_lock_as_capacity_one() {
        let mut lock = Resource::new("printer", "device", 1);
        assert!(lock.reserve(1, AgentId::new("a"), Duration::from_secs(60)));
        assert!(!lock.is_available(1));
        assert!(lock.release(1, &AgentId::new("a")));
        assert!(lock.is_available(1));
    }
}
