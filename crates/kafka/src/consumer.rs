use kafka_bridge_types::{
    CommitMode, Error, NativeConsumer, NativeEvent, NativeHandle, OffsetCommit, Result,
    TopicPartition,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode as RdCommitMode, Consumer, ConsumerGroupMetadata,
};
use rdkafka::error::KafkaError;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;

use crate::context::{to_message, BridgeContext};
use crate::error::{is_fatal, map_kafka_error};
use crate::offsets::to_partition_list;

/// Upper bound on messages taken from librdkafka in one `poll`.
const MAX_POLL_BATCH: usize = 500;

/// [`NativeConsumer`] over an rdkafka [`BaseConsumer`].
///
/// librdkafka reports a drained partition with its partition number only.
/// The topic is recovered from the current assignment, preferring the topic
/// last read on that partition number when several topics share it.
pub struct RdConsumer {
    consumer: Option<BaseConsumer<BridgeContext>>,
    last_topic: HashMap<i32, String>,
}

impl RdConsumer {
    /// Create a consumer from a complete librdkafka configuration. Partition
    /// end events require `enable.partition.eof=true`.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let consumer = config
            .create_with_context(BridgeContext::default())
            .map_err(|e| map_kafka_error(&e))?;
        Ok(Self {
            consumer: Some(consumer),
            last_topic: HashMap::new(),
        })
    }

    fn consumer(&self) -> Result<&BaseConsumer<BridgeContext>> {
        self.consumer
            .as_ref()
            .ok_or_else(|| Error::Native("Consumer has been closed".to_string()))
    }

    fn partition_end(&self, partition: i32) -> Option<NativeEvent> {
        let consumer = self.consumer.as_ref()?;
        let position = consumer.position().ok()?;
        let candidates: Vec<_> = position
            .elements()
            .into_iter()
            .filter(|elem| elem.partition() == partition)
            .collect();
        let elem = match self.last_topic.get(&partition) {
            Some(topic) => candidates.iter().find(|elem| elem.topic() == topic.as_str()),
            None => candidates.first(),
        }
        .or_else(|| candidates.first())?;
        let offset = match elem.offset() {
            Offset::Offset(offset) => offset,
            _ => -1,
        };
        Some(NativeEvent::PartitionEnd {
            topic: elem.topic().to_string(),
            partition,
            offset,
        })
    }
}

impl NativeHandle for RdConsumer {
    fn poll(&mut self, timeout: Duration) -> Vec<NativeEvent> {
        let mut events = Vec::new();
        let Some(consumer) = self.consumer.as_ref() else {
            return events;
        };

        let mut eof = Vec::new();
        let mut wait = timeout;
        while events.len() < MAX_POLL_BATCH {
            match consumer.poll(wait) {
                None => break,
                Some(Ok(message)) => {
                    let message = to_message(&message);
                    if let Some(partition) = message.partition {
                        self.last_topic.insert(partition, message.topic.clone());
                    }
                    events.push(NativeEvent::Message(message));
                }
                Some(Err(KafkaError::PartitionEOF(partition))) => eof.push(partition),
                Some(Err(err)) => events.push(NativeEvent::Error {
                    fatal: is_fatal(&err),
                    error: map_kafka_error(&err),
                }),
            }
            wait = Duration::ZERO;
        }

        events.extend(eof.into_iter().filter_map(|p| self.partition_end(p)));
        if let Some(consumer) = self.consumer.as_ref() {
            events.extend(consumer.context().drain());
        }
        events
    }
}

impl NativeConsumer for RdConsumer {
    type GroupMetadata = ConsumerGroupMetadata;

    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer()?
            .subscribe(&topics)
            .map_err(|e| map_kafka_error(&e))
    }

    fn assign(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        let mut list = TopicPartitionList::with_capacity(partitions.len());
        for tp in partitions {
            list.add_partition(&tp.topic, tp.partition);
        }
        self.consumer()?
            .assign(&list)
            .map_err(|e| map_kafka_error(&e))
    }

    fn commit_offsets(&mut self, offsets: &OffsetCommit, mode: CommitMode) -> Result<()> {
        let list = to_partition_list(offsets)?;
        let mode = match mode {
            CommitMode::Sync => RdCommitMode::Sync,
            CommitMode::Async => RdCommitMode::Async,
        };
        self.consumer()?
            .commit(&list, mode)
            .map_err(|e| map_kafka_error(&e))
    }

    fn group_metadata(&self) -> Option<ConsumerGroupMetadata> {
        self.consumer.as_ref()?.group_metadata()
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            // dropping the handle leaves the group and destroys it
            drop(consumer);
        }
    }
}
