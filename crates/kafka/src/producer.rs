use kafka_bridge_types::{
    Message, MessageId, NativeEvent, NativeHandle, NativeProducer, OffsetCommit, Result,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::ConsumerGroupMetadata;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use std::time::Duration;

use crate::context::BridgeContext;
use crate::error::map_kafka_error;
use crate::offsets::to_partition_list;

/// [`NativeProducer`] over an rdkafka [`BaseProducer`].
///
/// Delivery callbacks and statistics are buffered by the client context
/// whenever librdkafka serves callbacks (`poll`, `flush`, transaction
/// commits) and handed out by the next `poll`.
pub struct RdProducer {
    producer: BaseProducer<BridgeContext>,
}

impl RdProducer {
    /// Create a producer from a complete librdkafka configuration.
    /// Transactions require `transactional.id` to be set.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let producer = config
            .create_with_context(BridgeContext::default())
            .map_err(|e| map_kafka_error(&e))?;
        Ok(Self { producer })
    }

    pub fn inner(&self) -> &BaseProducer<BridgeContext> {
        &self.producer
    }
}

impl NativeHandle for RdProducer {
    fn poll(&mut self, timeout: Duration) -> Vec<NativeEvent> {
        self.producer.poll(timeout);
        self.producer.context().drain()
    }
}

impl NativeProducer for RdProducer {
    type GroupMetadata = ConsumerGroupMetadata;

    fn produce(&mut self, id: MessageId, message: &Message) -> Result<()> {
        let mut record = BaseRecord::<[u8], [u8], Box<MessageId>>::with_opaque_to(
            &message.topic,
            Box::new(id),
        )
        .payload(&message.value[..]);
        if let Some(key) = &message.key {
            record = record.key(&key[..]);
        }
        if let Some(partition) = message.partition {
            record = record.partition(partition);
        }
        if let Some(timestamp) = message.timestamp {
            record = record.timestamp(timestamp);
        }
        self.producer
            .send(record)
            .map_err(|(err, _record)| map_kafka_error(&err))
    }

    fn flush(&mut self, timeout: Duration) -> Result<()> {
        self.producer.flush(timeout).map_err(|e| map_kafka_error(&e))
    }

    fn init_transactions(&mut self, timeout: Duration) -> Result<()> {
        self.producer
            .init_transactions(timeout)
            .map_err(|e| map_kafka_error(&e))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.producer
            .begin_transaction()
            .map_err(|e| map_kafka_error(&e))
    }

    fn send_offsets_to_transaction(
        &mut self,
        offsets: &OffsetCommit,
        group: &ConsumerGroupMetadata,
        timeout: Duration,
    ) -> Result<()> {
        let list = to_partition_list(offsets)?;
        self.producer
            .send_offsets_to_transaction(&list, group, timeout)
            .map_err(|e| map_kafka_error(&e))
    }

    fn commit_transaction(&mut self, timeout: Duration) -> Result<()> {
        self.producer
            .commit_transaction(timeout)
            .map_err(|e| map_kafka_error(&e))
    }

    fn abort_transaction(&mut self, timeout: Duration) -> Result<()> {
        self.producer
            .abort_transaction(timeout)
            .map_err(|e| map_kafka_error(&e))
    }
}
