//! Client context collecting librdkafka callbacks for the next `poll`.

use bytes::Bytes;
use kafka_bridge_types::{Message, MessageId, NativeEvent};
use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, DeliveryResult, Message as _};
use rdkafka::producer::ProducerContext;
use rdkafka::TopicPartitionList;
use std::sync::{Mutex, PoisonError};

use crate::error::{is_fatal, map_kafka_error};

/// Callbacks run on the thread calling `poll`/`flush`; they only buffer.
#[derive(Default)]
pub struct BridgeContext {
    events: Mutex<Vec<NativeEvent>>,
}

impl BridgeContext {
    fn push(&self, event: NativeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub(crate) fn drain(&self) -> Vec<NativeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ClientContext for BridgeContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error => {
                tracing::error!(target: "librdkafka", "{fac}: {log_message}")
            }
            RDKafkaLogLevel::Warning => tracing::warn!(target: "librdkafka", "{fac}: {log_message}"),
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => {
                tracing::info!(target: "librdkafka", "{fac}: {log_message}")
            }
            RDKafkaLogLevel::Debug => tracing::debug!(target: "librdkafka", "{fac}: {log_message}"),
        }
    }

    fn stats_raw(&self, statistics: &[u8]) {
        self.push(NativeEvent::Statistics(
            String::from_utf8_lossy(statistics).into_owned(),
        ));
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let fatal = is_fatal(&error);
        tracing::debug!("librdkafka error ({reason}): {error}");
        self.push(NativeEvent::Error {
            error: map_kafka_error(&error),
            fatal,
        });
    }
}

impl ProducerContext for BridgeContext {
    type DeliveryOpaque = Box<MessageId>;

    fn delivery(
        &self,
        delivery_result: &DeliveryResult<'_>,
        delivery_opaque: Self::DeliveryOpaque,
    ) {
        let result = match delivery_result {
            Ok(message) => Ok(to_message(message)),
            Err((err, _)) => Err(map_kafka_error(err)),
        };
        self.push(NativeEvent::Delivery {
            id: *delivery_opaque,
            result,
        });
    }
}

impl ConsumerContext for BridgeContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => tracing::trace!(partitions = offsets.count(), "Offsets committed"),
            Err(e) => tracing::warn!("Offset commit failed: {e}"),
        }
    }
}

/// Copy a borrowed librdkafka message into an owned one.
pub(crate) fn to_message(message: &BorrowedMessage<'_>) -> Message {
    Message {
        topic: message.topic().to_string(),
        partition: Some(message.partition()),
        key: message.key().map(Bytes::copy_from_slice),
        value: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
        offset: Some(message.offset()),
        timestamp: message.timestamp().to_millis(),
    }
}
