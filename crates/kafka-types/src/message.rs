//! Message values exchanged with the broker.
//!
//! A [`Message`] built by a caller for `send` has no offset. Messages handed
//! out by a consumer always carry topic, partition and offset. Consumers yield
//! [`ConsumedMessage`], which separates real messages from end-of-partition
//! notifications so a marker never looks like a message with missing fields.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Longest topic name the broker accepts.
const MAX_TOPIC_LEN: usize = 249;

/// A message on a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic name
    pub topic: String,
    /// Target partition for sends (None lets the partitioner choose); always
    /// set on consumed and acknowledged messages
    pub partition: Option<i32>,
    /// Message key (if any)
    pub key: Option<Bytes>,
    /// Message payload
    pub value: Bytes,
    /// Offset within the partition; None until the broker assigns one
    pub offset: Option<i64>,
    /// Broker timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl Message {
    /// Create a producer-side message for `topic`.
    pub fn new(topic: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: value.into(),
            offset: None,
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Check topic and partition targeting before handing the message to a
    /// native producer. Any offset is ignored; the broker assigns a new one.
    pub fn validate_for_send(&self) -> Result<()> {
        validate_topic(&self.topic)?;
        if let Some(partition) = self.partition {
            if partition < 0 {
                return Err(Error::Configuration(format!(
                    "Invalid partition {partition} for topic '{}'",
                    self.topic
                )));
            }
        }
        Ok(())
    }

    /// Partition and offset of a consumed message, or a configuration error
    /// for a producer-side message.
    pub fn position(&self) -> Result<(i32, i64)> {
        match (self.partition, self.offset) {
            (Some(partition), Some(offset)) => Ok((partition, offset)),
            _ => Err(Error::Configuration(format!(
                "Message on topic '{}' has no partition/offset; only consumed messages can be committed",
                self.topic
            ))),
        }
    }
}

/// Validate a topic name against the broker's naming rules.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::Configuration("Topic name cannot be empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::Configuration(format!(
            "Topic name is {} characters long (max: {MAX_TOPIC_LEN})",
            topic.len()
        )));
    }
    if topic == "." || topic == ".." {
        return Err(Error::Configuration(format!("Invalid topic name '{topic}'")));
    }
    if let Some(bad) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::Configuration(format!(
            "Invalid character {bad:?} in topic name '{topic}'"
        )));
    }
    Ok(())
}

/// An item of a consumer's message sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumedMessage {
    /// A message read from the partition.
    Data(Message),
    /// The partition was fully drained at the moment of the poll. More data
    /// may follow; this is not the end of the sequence.
    PartitionEnd {
        topic: String,
        partition: i32,
        /// Next offset that will be read from the partition
        offset: i64,
    },
}

impl ConsumedMessage {
    pub fn as_data(&self) -> Option<&Message> {
        match self {
            Self::Data(message) => Some(message),
            Self::PartitionEnd { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<Message> {
        match self {
            Self::Data(message) => Some(message),
            Self::PartitionEnd { .. } => None,
        }
    }

    pub fn is_partition_end(&self) -> bool {
        matches!(self, Self::PartitionEnd { .. })
    }

    pub fn topic(&self) -> &str {
        match self {
            Self::Data(message) => &message.topic,
            Self::PartitionEnd { topic, .. } => topic,
        }
    }
}

/// A topic partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// Offsets to commit, keyed by topic partition.
///
/// Every stored offset is the *next offset to read*: committing after a
/// message at offset `n` stores `n + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCommit {
    offsets: BTreeMap<TopicPartition, i64>,
}

impl OffsetCommit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit record for the position right after `message`.
    pub fn after(message: &Message) -> Result<Self> {
        let mut commit = Self::new();
        commit.record(message)?;
        Ok(commit)
    }

    /// Commit record covering every message in `messages`, keeping the
    /// furthest position per partition.
    pub fn after_all<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Result<Self> {
        let mut commit = Self::new();
        for message in messages {
            commit.record(message)?;
        }
        Ok(commit)
    }

    /// Advance the partition of `message` to just past it. Never moves a
    /// partition backwards.
    pub fn record(&mut self, message: &Message) -> Result<()> {
        let (partition, offset) = message.position()?;
        let next = offset + 1;
        let entry = self
            .offsets
            .entry(TopicPartition::new(message.topic.clone(), partition))
            .or_insert(next);
        if *entry < next {
            *entry = next;
        }
        Ok(())
    }

    /// Set the next offset to read for a partition explicitly.
    pub fn insert(&mut self, topic: impl Into<String>, partition: i32, next_offset: i64) {
        self.offsets
            .insert(TopicPartition::new(topic, partition), next_offset);
    }

    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.offsets
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, i64)> {
        self.offsets.iter().map(|(tp, offset)| (tp, *offset))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumed(topic: &str, partition: i32, offset: i64) -> Message {
        Message {
            topic: topic.to_string(),
            partition: Some(partition),
            key: None,
            value: Bytes::from_static(b"v"),
            offset: Some(offset),
            timestamp: None,
        }
    }

    #[test]
    fn test_validate_for_send() {
        assert!(Message::new("orders", "x").validate_for_send().is_ok());
        assert!(Message::new("orders.v2_eu-west", "x")
            .with_key("k")
            .with_partition(3)
            .validate_for_send()
            .is_ok());

        let err = Message::new("", "x").validate_for_send().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = Message::new("bad topic", "x").validate_for_send().unwrap_err();
        assert!(err.to_string().contains("Invalid character"));

        let err = Message::new("orders", "x")
            .with_partition(-1)
            .validate_for_send()
            .unwrap_err();
        assert!(err.to_string().contains("Invalid partition -1"));

        let too_long = "t".repeat(MAX_TOPIC_LEN + 1);
        assert!(Message::new(too_long, "x").validate_for_send().is_err());
    }

    #[test]
    fn test_consumed_message_can_be_sent_again() {
        // the broker assigns a fresh offset; the old one is ignored
        assert!(consumed("orders", 0, 4).validate_for_send().is_ok());
        assert!(consumed("orders", -1, 4).validate_for_send().is_err());
    }

    #[test]
    fn test_offset_commit_is_next_offset_to_read() {
        let commit = OffsetCommit::after(&consumed("orders", 2, 41)).unwrap();
        assert_eq!(commit.get("orders", 2), Some(42));
        assert_eq!(commit.len(), 1);
    }

    #[test]
    fn test_offset_commit_keeps_furthest_position() {
        let messages = vec![
            consumed("orders", 0, 7),
            consumed("orders", 0, 3),
            consumed("orders", 1, 0),
            consumed("payments", 0, 10),
        ];
        let commit = OffsetCommit::after_all(&messages).unwrap();
        assert_eq!(commit.get("orders", 0), Some(8));
        assert_eq!(commit.get("orders", 1), Some(1));
        assert_eq!(commit.get("payments", 0), Some(11));
        assert_eq!(commit.get("payments", 1), None);
    }

    #[test]
    fn test_producer_message_has_no_position() {
        let err = OffsetCommit::after(&Message::new("orders", "x")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_consumed_message_accessors() {
        let data = ConsumedMessage::Data(consumed("orders", 0, 1));
        assert_eq!(data.topic(), "orders");
        assert!(!data.is_partition_end());
        assert_eq!(data.as_data().and_then(|m| m.offset), Some(1));

        let end = ConsumedMessage::PartitionEnd {
            topic: "orders".to_string(),
            partition: 0,
            offset: 2,
        };
        assert!(end.is_partition_end());
        assert!(end.into_data().is_none());
    }
}
