//! Native client handle capability.
//!
//! A native handle is a synchronous, poll-driven client that is **not**
//! reentrant: callers must never invoke two of its methods at the same time.
//! The producer and consumer clients guarantee that by funnelling every call
//! through one lock per handle.
//!
//! Implementations live in `kafka-bridge-rdkafka` (librdkafka) and
//! `kafka-bridge-memory` (in-process broker for tests).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::{Message, OffsetCommit, TopicPartition};
use crate::report::MessageId;

/// Something the native handle reported during a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// Delivery callback for the message produced under `id`. On success the
    /// message carries the broker-assigned partition and offset.
    Delivery {
        id: MessageId,
        result: std::result::Result<Message, Error>,
    },
    /// Raw statistics payload.
    Statistics(String),
    /// A consumed message.
    Message(Message),
    /// The partition has no more data right now.
    PartitionEnd {
        topic: String,
        partition: i32,
        offset: i64,
    },
    /// A client-level error. Fatal errors make the handle unusable.
    Error { error: Error, fatal: bool },
}

/// Whether a consumer commit waits for the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Sync,
    Async,
}

/// Operations shared by producer and consumer handles.
pub trait NativeHandle: Send + 'static {
    /// Serve queued callbacks and return what they reported.
    ///
    /// Must not block for longer than `timeout`. The clients always call
    /// this with a zero timeout and do their own sleeping, so the handle
    /// lock is never held while idle.
    fn poll(&mut self, timeout: Duration) -> Vec<NativeEvent>;
}

/// Native producer handle.
pub trait NativeProducer: NativeHandle {
    /// Consumer-group metadata accepted by
    /// [`send_offsets_to_transaction`](Self::send_offsets_to_transaction).
    type GroupMetadata: Send + 'static;

    /// Enqueue a message on the outbound queue without waiting for delivery.
    /// Exactly one [`NativeEvent::Delivery`] carrying `id` must follow every
    /// successful call. Returns [`Error::QueueFull`] when saturated.
    fn produce(&mut self, id: MessageId, message: &Message) -> Result<()>;

    /// Wait until the outbound queue is empty or `timeout` expires.
    fn flush(&mut self, timeout: Duration) -> Result<()>;

    fn init_transactions(&mut self, timeout: Duration) -> Result<()>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn send_offsets_to_transaction(
        &mut self,
        offsets: &OffsetCommit,
        group: &Self::GroupMetadata,
        timeout: Duration,
    ) -> Result<()>;

    fn commit_transaction(&mut self, timeout: Duration) -> Result<()>;

    fn abort_transaction(&mut self, timeout: Duration) -> Result<()>;
}

/// Native consumer handle.
pub trait NativeConsumer: NativeHandle {
    /// Consumer-group metadata handed to a transactional producer.
    type GroupMetadata: Send + 'static;

    fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    fn assign(&mut self, partitions: &[TopicPartition]) -> Result<()>;

    /// Commit offsets for this consumer's group. With [`CommitMode::Sync`]
    /// returns only after the coordinator acknowledged.
    fn commit_offsets(&mut self, offsets: &OffsetCommit, mode: CommitMode) -> Result<()>;

    fn group_metadata(&self) -> Option<Self::GroupMetadata>;

    /// Leave the group and release broker-side resources.
    fn close(&mut self);
}

/// A consumer whose group metadata can be attached to a transaction.
#[async_trait]
pub trait GroupMetadataSource: Send + Sync {
    type GroupMetadata: Send + 'static;

    async fn group_metadata(&self) -> Result<Self::GroupMetadata>;
}
