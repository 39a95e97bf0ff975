//! In-process broker for exercising kafka-bridge without a Kafka cluster.
//!
//! [`MemoryBroker`] keeps partition logs, consumer-group offsets and
//! transaction markers in memory. Its [`MemoryProducer`] and
//! [`MemoryConsumer`] implement the native handle traits from
//! `kafka-bridge-types` with the same observable contract as librdkafka:
//!
//! - every produced message gets exactly one delivery callback on `poll`
//! - the outbound queue has a capacity and reports `QueueFull`
//! - transactional records stay invisible to `read_committed` consumers until
//!   the transaction commits, and forever if it aborts
//! - offsets sent to a transaction are committed with it
//! - subscribing bumps the group generation, so commits carrying an older
//!   generation are rejected like a stale member's would be
//!
//! Failures are injected per call site with [`MemoryBroker::inject_fault`].
//!
//! ```ignore
//! let broker = MemoryBroker::new();
//! broker.create_topic("orders", 3);
//! let producer = broker.producer(MemoryProducerConfig::default());
//! let consumer = broker.consumer(MemoryConsumerConfig::new("billing"));
//! ```

mod broker;
mod consumer;
mod producer;

pub use broker::{BrokerConfig, FaultPoint, GroupMetadata, MemoryBroker};
pub use consumer::{IsolationLevel, MemoryConsumer, MemoryConsumerConfig, OffsetReset};
pub use producer::{MemoryProducer, MemoryProducerConfig};
