//! Shared types for kafka-bridge.
//!
//! This crate holds everything the producer and consumer crates agree on:
//!
//! - [`message`] - produced and consumed message values, offset commit records
//! - [`report`] - message ids, delivery reports and producer events
//! - [`correlation`] - the per-producer message id registry
//! - [`bridge`] - the channel that carries poll-loop output to async readers
//! - [`native`] - the traits a native client handle implements
//! - [`state`] - consumer and transaction lifecycle states
//! - [`options`] - poll cadence, channel bounds and timeouts
//! - [`error`] - the error type shared by every crate in the workspace
//!
//! # Dependency Direction
//!
//! The producer, consumer, rdkafka and in-memory crates all depend on this
//! crate and never on each other, except the producer crate which reaches the
//! consumer only through [`native::GroupMetadataSource`].

pub mod bridge;
pub mod correlation;
pub mod error;
pub mod message;
pub mod native;
pub mod options;
pub mod report;
pub mod state;

pub use bridge::{channel, BridgeReceiver, BridgeSender, ChannelBound, OverflowPolicy};
pub use correlation::MessageIdRegistry;
pub use error::{Error, ErrorKind, Result};
pub use message::{ConsumedMessage, Message, OffsetCommit, TopicPartition};
pub use native::{
    CommitMode, GroupMetadataSource, NativeConsumer, NativeEvent, NativeHandle, NativeProducer,
};
pub use options::ClientOptions;
pub use report::{DeliveryReport, DeliveryStatus, MessageId, ProducerEvent, Statistics};
pub use state::{ConsumerState, TransactionState};
