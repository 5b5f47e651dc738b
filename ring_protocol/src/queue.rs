// SPDX-License-Identifier: BSD-3-Clause

//! The bounded outbound message queue. Every operation is externally observable as atomic: a
//! writer never sees a reader's transient state, and vice versa.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::QueueFullError;

/// Maximum number of messages a node may have queued for transmission at once.
pub const CAPACITY: usize = 10;

/// A message awaiting a transmission opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub destination: String,
    pub payload: String,
    pub enqueued_at: Instant,
    pub retries: u32,
}

/// A bounded FIFO of capacity [`CAPACITY`]; only the head is ever a candidate for transmission.
pub struct OutboundQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    /// Appends a message, stamping the enqueue time and a zeroed retry counter.
    pub fn enqueue(&self, destination: String, payload: String) -> Result<(), QueueFullError> {
        let mut guard = self.inner.lock().expect("queue lock poisoned");
        if guard.len() >= CAPACITY {
            return Err(QueueFullError);
        }
        guard.push_back(QueuedMessage {
            destination,
            payload,
            enqueued_at: Instant::now(),
            retries: 0,
        });
        Ok(())
    }

    /// Returns a snapshot of the head, or `None` if the queue is empty.
    pub fn peek_head(&self) -> Option<QueuedMessage> {
        self.inner.lock().expect("queue lock poisoned").front().cloned()
    }

    /// Removes the head. A no-op on an empty queue.
    pub fn drop_head(&self) {
        self.inner.lock().expect("queue lock poisoned").pop_front();
    }

    /// Increments the head's retry counter. A no-op on an empty queue.
    pub fn bump_retry(&self) {
        if let Some(head) = self.inner.lock().expect("queue lock poisoned").front_mut() {
            head.retries += 1;
        }
    }

    /// Returns an ordered copy of the whole queue.
    pub fn snapshot(&self) -> Vec<QueuedMessage> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Current number of queued messages.
    pub fn size(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }
}

/// How long a message has been sitting at the head of the queue.
pub fn age(msg: &QueuedMessage) -> Duration {
    msg.enqueued_at.elapsed()
}
