//! kafka-bridge
//!
//! Async clients over a poll-driven Kafka client handle.
//!
//! # Features
//!
//! - Producer client: `send` returns a message id at once; the delivery
//!   report for that id arrives later on the producer's event sequence
//! - Consumer client: consumed messages and partition end markers as an async
//!   sequence, with synchronous offset commits
//! - Transactional producer: sends and consumer offsets committed atomically
//!   by `with_transaction`, aborted when the body fails
//! - Configuration from flags, environment variables and TOML files
//! - A supervisor that runs every poll loop under one cancellation token
//!
//! # Crates
//!
//! - `kafka_bridge_types` - messages, reports, errors and the native handle traits
//! - `kafka_bridge_producer` - producer client and transactional producer
//! - `kafka_bridge_consumer` - consumer client
//! - `kafka_bridge_rdkafka` - native handles over librdkafka
//! - `kafka_bridge_memory` - in-process broker for tests
//!
//! # Usage
//!
//! ```ignore
//! let settings = BridgeArgs::parse().settings()?;
//! let producer = settings.producer_client()?;
//! let mut reports = flatten_reports(producer.events().unwrap());
//!
//! let mut supervisor = Supervisor::new();
//! supervisor.spawn("producer", producer.clone());
//!
//! let id = producer.send(Message::new("orders", "hello")).await?;
//! let report = reports.next().await;
//!
//! supervisor.shutdown().await?;
//! ```

pub mod config;
pub mod lifecycle;

pub use config::{
    AutoOffsetReset, BridgeArgs, ConsumerArgs, Isolation, KafkaArgs, Overflow, ProducerArgs,
    Settings, TransactionalArgs,
};
pub use lifecycle::{Service, Supervisor};

pub use kafka_bridge_consumer::{ConsumerClient, ConsumerMessages};
pub use kafka_bridge_memory as memory;
pub use kafka_bridge_producer::{
    flatten_reports, ProducerClient, ProducerEvents, Transaction, TransactionError,
    TransactionalProducer,
};
pub use kafka_bridge_rdkafka as rdkafka;
pub use kafka_bridge_types::{
    ChannelBound, ClientOptions, ConsumedMessage, ConsumerState, DeliveryReport, DeliveryStatus,
    Error, ErrorKind, Message, MessageId, OffsetCommit, OverflowPolicy, ProducerEvent, Result,
    TopicPartition, TransactionState,
};

/// Install a `tracing` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directives`. Does nothing if a subscriber is already installed.
pub fn init_logging(default_directives: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().ok();
}
