//! Async consumer client over a synchronous, poll-driven native handle.
//!
//! [`ConsumerClient`] turns the handle's poll results into a lazy message
//! sequence (`messages()`), with the end of each partition reported as a
//! [`ConsumedMessage::PartitionEnd`] item rather than ending the sequence.
//! Offsets are committed explicitly with "next offset to read" semantics;
//! a commit shares the handle with the poll loop and never races it.
//!
//! The client also implements [`GroupMetadataSource`], so its offsets can be
//! committed as part of a producer transaction.
//!
//! [`ConsumedMessage::PartitionEnd`]: kafka_bridge_types::ConsumedMessage::PartitionEnd
//! [`GroupMetadataSource`]: kafka_bridge_types::GroupMetadataSource

mod client;

pub use client::{ConsumerClient, ConsumerMessages};
