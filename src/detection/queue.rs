use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use crate::domain::NodeId;

use super::registry::ElementHandle;

/// Ordering key for queued work. Higher drains first.
pub trait Prioritized {
    fn priority(&self) -> u8;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub handle: ElementHandle,
    pub node: NodeId,
    pub priority: u8,
    pub enqueued_at: Instant,
}

impl Prioritized for QueueItem {
    fn priority(&self) -> u8 {
        self.priority
    }
}

#[derive(Debug)]
pub struct ProcessingQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T: Prioritized> ProcessingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Inserts each item before the first entry with a lower priority, so
    /// equal priorities keep arrival order.
    pub fn enqueue(&self, values: impl IntoIterator<Item = T>) -> usize {
        let mut items = self.items.lock();
        let mut added = 0;
        for value in values {
            let position = items
                .iter()
                .position(|existing| existing.priority() < value.priority())
                .unwrap_or(items.len());
            items.insert(position, value);
            added += 1;
        }
        drop(items);
        if added > 0 {
            self.notify.notify_one();
        }
        added
    }

    pub fn take_batch(&self, size: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let count = size.min(items.len());
        items.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }

    /// Resolves after the next non-empty `enqueue`. A permit is stored if
    /// nobody is waiting, so a wakeup between `take_batch` and the wait is
    /// not lost.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl<T: Prioritized> Default for ProcessingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Job(&'static str, u8);

    impl Prioritized for Job {
        fn priority(&self) -> u8 {
            self.1
        }
    }

    #[test]
    fn higher_priority_jumps_ahead_and_ties_keep_order() {
        let queue = ProcessingQueue::new();
        queue.enqueue([Job("a", 0), Job("b", 0)]);
        queue.enqueue([Job("c", 1)]);
        queue.enqueue([Job("d", 1), Job("e", 0)]);

        let drained: Vec<_> = queue.take_batch(10).into_iter().map(|job| job.0).collect();
        assert_eq!(drained, vec!["c", "d", "a", "b", "e"]);
    }

    #[test]
    fn batches_come_from_the_head() {
        let queue = ProcessingQueue::new();
        queue.enqueue([Job("a", 0), Job("b", 0), Job("c", 0), Job("d", 0)]);
        assert_eq!(queue.take_batch(3).len(), 3);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take_batch(3), vec![Job("d", 0)]);
        assert!(queue.take_batch(3).is_empty());
    }

    #[test]
    fn clear_reports_dropped_items() {
        let queue = ProcessingQueue::new();
        queue.enqueue([Job("a", 0), Job("b", 1)]);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn enqueue_before_wait_is_not_lost() {
        let queue = ProcessingQueue::new();
        queue.enqueue([Job("a", 0)]);
        queue.notified().await;
        assert_eq!(queue.len(), 1);
    }
}
