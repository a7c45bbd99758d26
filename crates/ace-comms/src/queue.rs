//! Bounded priority mailbox.

use std::collections::VecDeque;

use ace_protocol::{Message, MessagePriority};

/// A bounded mailbox holding one FIFO ring per priority level.
///
/// Overflow evicts the oldest message of the lowest priority present in
/// the queue. The incoming message is always admitted, and a
/// higher-priority message is only displaced when nothing below it is
/// queued.
pub struct MessageQueue {
    capacity: usize,
    queues: [VecDeque<Message>; 4],
    len: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: Default::default(),
            len: 0,
        }
    }

    /// Add a message, evicting the oldest lowest-priority entry when
    /// full. Returns the evicted message, if any.
    pub fn enqueue(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.len >= self.capacity {
            self.evict_oldest_low_priority()
        } else {
            None
        };

        let idx = Self::index(message.priority);
        self.queues[idx].push_back(message);
        self.len += 1;
        evicted
    }

    /// Remove and return the oldest message of the highest present
    /// priority, or None when empty.
    pub fn dequeue(&mut self) -> Option<Message> {
        for priority in MessagePriority::ALL {
            if let Some(message) = self.queues[Self::index(priority)].pop_front() {
                self.len -= 1;
                return Some(message);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn evict_oldest_low_priority(&mut self) -> Option<Message> {
        for priority in MessagePriority::ALL.iter().rev() {
            if let Some(message) = self.queues[Self::index(*priority)].pop_front() {
                self.len -= 1;
                return Some(message);
            }
        }
        None
    }

    fn index(priority: MessagePriority) -> usize {
        priority.value() as usize - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_protocol::{AgentId, MessageType};

    fn msg(tag: &str, priority: MessagePriority) -> Message {
        let mut m = Message::new(AgentId::new("s"), "r", MessageType::Notification);
        m.content
            .insert("tag".into(), serde_json::Value::String(tag.into()));
        m.priority = priority;
        m
    }

    fn tag(m: &Message) -> String {
        m.content["tag"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_dequeue_priority_order() {
        let mut q = MessageQueue::new(10);
        q.enqueue(msg("low", MessagePriority::Low));
        q.enqueue(msg("critical", MessagePriority::Critical));
        q.enqueue(msg("medium", MessagePriority::Medium));

        assert_eq!(tag(&q.dequeue().unwrap()), "critical");
        assert_eq!(tag(&q.dequeue().unwrap()), "medium");
        assert_eq!(tag(&q.dequeue().unwrap()), "low");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = MessageQueue::new(10);
        q.enqueue(msg("first", MessagePriority::High));
        q.enqueue(msg("second", MessagePriority::High));

        assert_eq!(tag(&q.dequeue().unwrap()), "first");
        assert_eq!(tag(&q.dequeue().unwrap()), "second");
    }

    #[test]
    fn test_overflow_evicts_oldest_lowest() {
        let mut q = MessageQueue::new(3);
        q.enqueue(msg("low-1", MessagePriority::Low));
        q.enqueue(msg("low-2", MessagePriority::Low));
        q.enqueue(msg("high-1", MessagePriority::High));

        let evicted = q.enqueue(msg("critical-1", MessagePriority::Critical));
        assert_eq!(tag(&evicted.unwrap()), "low-1");
        assert_eq!(q.len(), 3);

        assert_eq!(tag(&q.dequeue().unwrap()), "critical-1");
        assert_eq!(tag(&q.dequeue().unwrap()), "high-1");
        assert_eq!(tag(&q.dequeue().unwrap()), "low-2");
    }

    #[test]
    fn test_overflow_never_exceeds_capacity() {
        let mut q = MessageQueue::new(4);
        for i in 0..10 {
            q.enqueue(msg(&format!("m{i}"), MessagePriority::Medium));
            assert!(q.len() <= 4);
        }
        assert_eq!(q.len(), 4);
        // Oldest entries were displaced; the newest four remain.
        assert_eq!(tag(&q.dequeue().unwrap()), "m6");
    }
}
