use std::{mem, time::Duration};

use tokio::time::Instant;

use crate::{
    batch::{DrainedBatch, FlushTrigger},
    item::Item,
};

/// Items accumulated since the last flush.
///
/// Owned by the worker, so appends, length checks and drains never interleave.
#[derive(Debug)]
pub(crate) struct BatchState {
    items: Vec<Item>,
    /// When the previous drain happened, or when the state was created.
    last_reset: Instant,
}

impl BatchState {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            last_reset: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self, max: usize) -> bool {
        self.len() >= max
    }

    /// Whether there are pending items and `timeout` has passed since the last reset.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        !self.is_empty() && self.last_reset.elapsed() >= timeout
    }

    /// Append an item, returning the new length.
    pub fn push(&mut self, item: Item) -> usize {
        self.items.push(item);
        self.len()
    }

    /// Take every pending item and reset the clock.
    ///
    /// Returns `None` if there is nothing to flush.
    pub fn drain(&mut self, trigger: FlushTrigger) -> Option<DrainedBatch> {
        if self.is_empty() {
            return None;
        }

        let items = mem::take(&mut self.items);
        self.last_reset = Instant::now();

        Some(DrainedBatch { items, trigger })
    }
}
