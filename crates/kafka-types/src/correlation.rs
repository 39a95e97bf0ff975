//! Per-producer message id registry.
//!
//! The registry only mints ids. Matching a [`DeliveryReport`] to its send is
//! done by the caller comparing [`MessageId`]s; the registry keeps no record
//! of what it issued.
//!
//! [`DeliveryReport`]: crate::report::DeliveryReport

use std::sync::atomic::{AtomicU64, Ordering};

use crate::report::MessageId;

/// Monotonic, thread-safe id counter owned by one producer client.
#[derive(Debug)]
pub struct MessageIdRegistry {
    next: AtomicU64,
}

impl Default for MessageIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdRegistry {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Mint the next id.
    ///
    /// # Panics
    ///
    /// Panics when the id space is exhausted. Reusing an id would let two
    /// sends claim the same delivery report, so this is treated as a broken
    /// invariant rather than a recoverable error.
    pub fn next_id(&self) -> MessageId {
        match self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
        {
            Ok(raw) => MessageId::from_u64(raw),
            Err(_) => panic!("message id space exhausted; refusing to reuse ids"),
        }
    }

    /// Number of ids minted so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}
