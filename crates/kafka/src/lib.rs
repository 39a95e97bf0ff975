//! librdkafka-backed native handles for kafka-bridge.
//!
//! [`RdProducer`] wraps a `BaseProducer` and [`RdConsumer`] a `BaseConsumer`,
//! both built from a caller-supplied [`rdkafka::ClientConfig`]. They are
//! plain synchronous handles: hand them to `ProducerClient`,
//! `TransactionalProducer` or `ConsumerClient` for the async API.
//!
//! librdkafka log lines are forwarded to `tracing` under the `librdkafka`
//! target; statistics (enable with `statistics.interval.ms`) surface as raw
//! JSON through the producer event stream.

mod consumer;
mod context;
mod error;
mod offsets;
mod producer;

pub use consumer::RdConsumer;
pub use context::BridgeContext;
pub use producer::RdProducer;
pub use rdkafka::consumer::ConsumerGroupMetadata;
pub use rdkafka::ClientConfig;
