use std::collections::VecDeque;

use crate::error::QueueError;
use crate::model::PathItem;

/// FIFO of pending items. The aggregate size is maintained on every
/// enqueue/dequeue and always equals the sum of the queued item sizes.
#[derive(Debug, Clone, Default)]
pub struct PathQueue {
    items: VecDeque<PathItem>,
    aggregate_size: u64,
}

impl PathQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: PathItem) {
        self.aggregate_size = self.aggregate_size.saturating_add(item.size_or_zero());
        self.items.push_back(item);
    }

    pub fn peek(&self) -> Result<&PathItem, QueueError> {
        self.items.front().ok_or(QueueError::EmptyQueue)
    }

    pub fn dequeue(&mut self) -> Result<PathItem, QueueError> {
        let item = self.items.pop_front().ok_or(QueueError::EmptyQueue)?;
        self.aggregate_size = self.aggregate_size.saturating_sub(item.size_or_zero());
        Ok(item)
    }

    pub fn aggregate_size(&self) -> u64 {
        self.aggregate_size
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.aggregate_size = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathItem> + '_ {
        self.items.iter()
    }

    pub fn view(&self) -> PathQueueView<'_> {
        PathQueueView { queue: self }
    }
}

/// Read-only projection of a [`PathQueue`]. It exposes no mutating methods,
/// so a holder cannot enqueue, dequeue or clear through it.
#[derive(Debug, Clone, Copy)]
pub struct PathQueueView<'a> {
    queue: &'a PathQueue,
}

impl<'a> PathQueueView<'a> {
    pub fn peek(&self) -> Result<&'a PathItem, QueueError> {
        self.queue.peek()
    }

    pub fn aggregate_size(&self) -> u64 {
        self.queue.aggregate_size()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a PathItem> + 'a {
        self.queue.items.iter()
    }

    pub fn to_vec(&self) -> Vec<PathItem> {
        self.iter().cloned().collect()
    }
}
