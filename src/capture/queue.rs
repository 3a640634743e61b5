//! Capture Queue: bounded FIFO between the frame producer and the
//! fixed-rate integration consumer.
//!
//! The queue itself is not synchronized; it lives inside the controller's
//! shared state lock, which also provides the condition variable a
//! [`OverflowPolicy::Block`] producer waits on.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// What happens when a producer pushes into a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer waits for space (released early if the session closes).
    #[default]
    Block,
    /// Oldest queued item is discarded to make room.
    DropOldest,
}

/// Result of a push attempt.
#[derive(Debug)]
pub enum PushOutcome<T> {
    Queued,
    /// Queued after evicting the returned oldest item.
    Evicted(T),
    /// Queue full under [`OverflowPolicy::Block`]; item handed back.
    Full(T),
}

#[derive(Debug)]
pub struct CaptureQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> CaptureQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            policy,
        }
    }

    pub fn push(&mut self, item: T) -> PushOutcome<T> {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return PushOutcome::Queued;
        }
        match self.policy {
            OverflowPolicy::Block => PushOutcome::Full(item),
            OverflowPolicy::DropOldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(item);
                match evicted {
                    Some(old) => PushOutcome::Evicted(old),
                    None => PushOutcome::Queued,
                }
            }
        }
    }

    /// Pop the oldest item; `None` when empty (not an error).
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = CaptureQueue::new(4, OverflowPolicy::Block);
        for i in 0..3 {
            assert!(matches!(q.push(i), PushOutcome::Queued));
        }

        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_block_policy_hands_item_back() {
        let mut q = CaptureQueue::new(2, OverflowPolicy::Block);
        q.push(1);
        q.push(2);

        match q.push(3) {
            PushOutcome::Full(item) => assert_eq!(item, 3),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(q.len(), 2);
        assert!(q.is_full());
    }

    #[test]
    fn test_drop_oldest_policy_evicts_front() {
        let mut q = CaptureQueue::new(2, OverflowPolicy::DropOldest);
        q.push(1);
        q.push(2);

        match q.push(3) {
            PushOutcome::Evicted(old) => assert_eq!(old, 1),
            other => panic!("expected Evicted, got {other:?}"),
        }
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let q: CaptureQueue<u8> = CaptureQueue::new(0, OverflowPolicy::Block);
        assert_eq!(q.capacity(), 1);
    }
}
