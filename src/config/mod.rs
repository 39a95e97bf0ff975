//! Client configuration from flags, environment variables and TOML files.
//!
//! Every setting can come from a command-line flag, its environment variable,
//! or a table of a TOML file loaded with [`Settings::from_file`]:
//!
//! ```toml
//! [kafka]
//! brokers = "kafka-1:9092,kafka-2:9092"
//! poll_interval = "20ms"
//! properties = ["security.protocol=SSL"]
//!
//! [producer]
//! message_timeout = "10s"
//!
//! [consumer]
//! group_id = "billing"
//! isolation_level = "read-committed"
//!
//! [transactional]
//! transactional_id = "billing-tx-1"
//! ```
//!
//! Settings turn into an rdkafka `ClientConfig` for the native handle and a
//! [`ClientOptions`] for the client wrapping it. `properties` entries are
//! applied last and override any property derived from the other settings.

pub mod duration;

use anyhow::Context;
use clap::{Args, Parser, ValueEnum};
use kafka_bridge_consumer::ConsumerClient;
use kafka_bridge_memory::{IsolationLevel, MemoryConsumerConfig, MemoryProducerConfig, OffsetReset};
use kafka_bridge_producer::{ProducerClient, TransactionalProducer};
use kafka_bridge_rdkafka::{ClientConfig, RdConsumer, RdProducer};
use kafka_bridge_types::{ChannelBound, ClientOptions, OverflowPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use duration::parse_duration;

const DEFAULT_BROKERS: &str = "localhost:9092";

/// Settings shared by every client.
#[derive(Args, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaArgs {
    /// Kafka bootstrap servers (comma-separated)
    #[arg(long = "kafka-brokers", default_value = DEFAULT_BROKERS, env = "KAFKA_BROKERS")]
    pub brokers: String,

    /// Client id reported to the brokers
    #[arg(long = "kafka-client-id", env = "KAFKA_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Extra librdkafka property as KEY=VALUE (repeatable)
    #[arg(long = "kafka-property", value_name = "KEY=VALUE")]
    pub properties: Vec<String>,

    /// Sleep between polls that returned nothing
    #[arg(long, default_value = "50ms", value_parser = parse_duration, env = "KAFKA_POLL_INTERVAL")]
    #[serde(deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,

    /// Timeout for commits and transaction control
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "KAFKA_OPERATION_TIMEOUT")]
    #[serde(deserialize_with = "duration::deserialize")]
    pub operation_timeout: Duration,

    /// How long shutdown waits for in-flight sends
    #[arg(long, default_value = "5s", value_parser = parse_duration, env = "KAFKA_SHUTDOWN_TIMEOUT")]
    #[serde(deserialize_with = "duration::deserialize")]
    pub shutdown_timeout: Duration,
}

impl Default for KafkaArgs {
    fn default() -> Self {
        Self {
            brokers: DEFAULT_BROKERS.to_string(),
            client_id: None,
            properties: Vec::new(),
            poll_interval: Duration::from_millis(50),
            operation_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaArgs {
    /// Build a native configuration: shared settings, then the role's
    /// settings, then the raw `properties`.
    fn build<F>(&self, role: F) -> anyhow::Result<ClientConfig>
    where
        F: FnOnce(&mut ClientConfig) -> anyhow::Result<()>,
    {
        if self.brokers.trim().is_empty() {
            anyhow::bail!("Kafka brokers must not be empty");
        }
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.brokers.trim());
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        role(&mut config)?;
        for property in &self.properties {
            let (key, value) = property
                .split_once('=')
                .with_context(|| format!("Invalid Kafka property {property:?}, expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                anyhow::bail!("Invalid Kafka property {property:?}: empty key");
            }
            config.set(key, value.trim());
        }
        Ok(config)
    }

    fn client_options(&self, bound: ChannelBound) -> anyhow::Result<ClientOptions> {
        let options = ClientOptions::default()
            .poll_interval(self.poll_interval)
            .channel_bound(bound)
            .operation_timeout(self.operation_timeout)
            .shutdown_timeout(self.shutdown_timeout);
        options.validate().context("Invalid client options")?;
        Ok(options)
    }
}

/// What a full bounded channel does.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Overflow {
    /// Pause the poll loop until the reader catches up
    #[default]
    Block,
    /// Discard the oldest buffered item
    DropOldest,
}

impl Overflow {
    fn bound(self, capacity: Option<usize>) -> ChannelBound {
        match capacity {
            None => ChannelBound::Unbounded,
            Some(capacity) => ChannelBound::Bounded {
                capacity,
                overflow: match self {
                    Self::Block => OverflowPolicy::Block,
                    Self::DropOldest => OverflowPolicy::DropOldest,
                },
            },
        }
    }
}

/// Producer settings.
#[derive(Args, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerArgs {
    /// How long librdkafka retries a message before failing its delivery
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "KAFKA_MESSAGE_TIMEOUT")]
    #[serde(deserialize_with = "duration::deserialize")]
    pub message_timeout: Duration,

    /// Outbound queue capacity; sends beyond it fail with QueueFull
    #[arg(long, default_value_t = 100_000, env = "KAFKA_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Enable the idempotent producer
    #[arg(long, env = "KAFKA_ENABLE_IDEMPOTENCE")]
    pub enable_idempotence: bool,

    /// Emit a statistics event this often
    #[arg(long, value_parser = parse_duration, env = "KAFKA_STATISTICS_INTERVAL")]
    #[serde(deserialize_with = "duration::deserialize_option")]
    pub statistics_interval: Option<Duration>,

    /// Bound of the event sequence (unbounded when not set)
    #[arg(long)]
    pub event_capacity: Option<usize>,

    /// What a full event sequence does
    #[arg(long, value_enum, default_value_t = Overflow::Block)]
    pub event_overflow: Overflow,
}

impl Default for ProducerArgs {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(30),
            queue_capacity: 100_000,
            enable_idempotence: false,
            statistics_interval: None,
            event_capacity: None,
            event_overflow: Overflow::Block,
        }
    }
}

impl ProducerArgs {
    fn apply(&self, config: &mut ClientConfig) {
        config
            .set("message.timeout.ms", duration::millis(self.message_timeout))
            .set("queue.buffering.max.messages", self.queue_capacity.to_string());
        if self.enable_idempotence {
            config.set("enable.idempotence", "true");
        }
        if let Some(interval) = self.statistics_interval {
            config.set("statistics.interval.ms", duration::millis(interval));
        }
    }

    pub fn client_config(&self, kafka: &KafkaArgs) -> anyhow::Result<ClientConfig> {
        kafka.build(|config| {
            self.apply(config);
            Ok(())
        })
    }

    pub fn client_options(&self, kafka: &KafkaArgs) -> anyhow::Result<ClientOptions> {
        kafka.client_options(self.event_overflow.bound(self.event_capacity))
    }

    /// The same settings for an in-memory producer.
    pub fn memory_config(&self) -> MemoryProducerConfig {
        let mut config = MemoryProducerConfig::default().queue_capacity(self.queue_capacity);
        if let Some(interval) = self.statistics_interval {
            config = config.statistics_interval(interval);
        }
        config
    }
}

/// Transaction settings, layered over [`ProducerArgs`].
#[derive(Args, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionalArgs {
    /// Transactional id; required for the transactional producer
    #[arg(long, env = "KAFKA_TRANSACTIONAL_ID")]
    pub transactional_id: Option<String>,

    /// Broker-side timeout of an open transaction
    #[arg(long, default_value = "60s", value_parser = parse_duration, env = "KAFKA_TRANSACTION_TIMEOUT")]
    #[serde(deserialize_with = "duration::deserialize")]
    pub transaction_timeout: Duration,
}

impl Default for TransactionalArgs {
    fn default() -> Self {
        Self {
            transactional_id: None,
            transaction_timeout: Duration::from_secs(60),
        }
    }
}

impl TransactionalArgs {
    pub fn transactional_id(&self) -> anyhow::Result<&str> {
        match self.transactional_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => anyhow::bail!("A transactional id is required for the transactional producer"),
        }
    }

    pub fn client_config(
        &self,
        kafka: &KafkaArgs,
        producer: &ProducerArgs,
    ) -> anyhow::Result<ClientConfig> {
        let transactional_id = self.transactional_id()?;
        kafka.build(|config| {
            producer.apply(config);
            config
                .set("transactional.id", transactional_id)
                .set(
                    "transaction.timeout.ms",
                    duration::millis(self.transaction_timeout),
                );
            Ok(())
        })
    }

    pub fn memory_config(&self, producer: &ProducerArgs) -> anyhow::Result<MemoryProducerConfig> {
        Ok(MemoryProducerConfig {
            transactional_id: Some(self.transactional_id()?.to_string()),
            ..producer.memory_config()
        })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Skip records of open and aborted transactions
    #[default]
    ReadCommitted,
    ReadUncommitted,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoOffsetReset {
    #[default]
    Earliest,
    Latest,
}

/// Consumer settings.
#[derive(Args, Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerArgs {
    /// Consumer group id; required for the consumer
    #[arg(long, env = "KAFKA_GROUP_ID")]
    pub group_id: Option<String>,

    #[arg(long, value_enum, default_value_t = Isolation::ReadCommitted, env = "KAFKA_ISOLATION_LEVEL")]
    pub isolation_level: Isolation,

    /// Where to start when the group has no committed offset
    #[arg(long, value_enum, default_value_t = AutoOffsetReset::Earliest, env = "KAFKA_AUTO_OFFSET_RESET")]
    pub auto_offset_reset: AutoOffsetReset,

    /// Let the native client commit consumed offsets periodically
    #[arg(long, env = "KAFKA_ENABLE_AUTO_COMMIT")]
    pub enable_auto_commit: bool,

    /// Report drained partitions as partition end markers
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub partition_eof: bool,

    /// Group session timeout
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "KAFKA_SESSION_TIMEOUT")]
    #[serde(deserialize_with = "duration::deserialize")]
    pub session_timeout: Duration,

    /// Bound of the message sequence
    #[arg(long, default_value_t = 1024)]
    pub message_capacity: usize,

    /// What a full message sequence does
    #[arg(long, value_enum, default_value_t = Overflow::Block)]
    pub message_overflow: Overflow,
}

impl Default for ConsumerArgs {
    fn default() -> Self {
        Self {
            group_id: None,
            isolation_level: Isolation::ReadCommitted,
            auto_offset_reset: AutoOffsetReset::Earliest,
            enable_auto_commit: false,
            partition_eof: true,
            session_timeout: Duration::from_secs(30),
            message_capacity: 1024,
            message_overflow: Overflow::Block,
        }
    }
}

impl ConsumerArgs {
    pub fn group_id(&self) -> anyhow::Result<&str> {
        match self.group_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => anyhow::bail!("A consumer group id is required for the consumer"),
        }
    }

    pub fn client_config(&self, kafka: &KafkaArgs) -> anyhow::Result<ClientConfig> {
        let group_id = self.group_id()?;
        kafka.build(|config| {
            config
                .set("group.id", group_id)
                .set(
                    "isolation.level",
                    match self.isolation_level {
                        Isolation::ReadCommitted => "read_committed",
                        Isolation::ReadUncommitted => "read_uncommitted",
                    },
                )
                .set(
                    "auto.offset.reset",
                    match self.auto_offset_reset {
                        AutoOffsetReset::Earliest => "earliest",
                        AutoOffsetReset::Latest => "latest",
                    },
                )
                .set("enable.auto.commit", self.enable_auto_commit.to_string())
                .set("enable.partition.eof", self.partition_eof.to_string())
                .set("session.timeout.ms", duration::millis(self.session_timeout));
            Ok(())
        })
    }

    pub fn client_options(&self, kafka: &KafkaArgs) -> anyhow::Result<ClientOptions> {
        kafka.client_options(self.message_overflow.bound(Some(self.message_capacity)))
    }

    /// The same settings for an in-memory consumer.
    pub fn memory_config(&self) -> anyhow::Result<MemoryConsumerConfig> {
        Ok(MemoryConsumerConfig::new(self.group_id()?)
            .isolation(match self.isolation_level {
                Isolation::ReadCommitted => IsolationLevel::ReadCommitted,
                Isolation::ReadUncommitted => IsolationLevel::ReadUncommitted,
            })
            .auto_offset_reset(match self.auto_offset_reset {
                AutoOffsetReset::Earliest => OffsetReset::Earliest,
                AutoOffsetReset::Latest => OffsetReset::Latest,
            })
            .auto_commit(self.enable_auto_commit)
            .partition_eof(self.partition_eof))
    }
}

/// Settings for every client, as loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub kafka: KafkaArgs,
    pub producer: ProducerArgs,
    pub consumer: ConsumerArgs,
    pub transactional: TransactionalArgs,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        Self::parse_str(&contents).with_context(|| format!("Invalid config file: {path:?}"))
    }

    /// Parse settings from a TOML string.
    pub fn parse_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("Failed to parse config TOML")
    }

    /// An rdkafka-backed producer client. Connects lazily.
    pub fn producer_client(&self) -> anyhow::Result<ProducerClient<RdProducer>> {
        let config = self.producer.client_config(&self.kafka)?;
        let native = RdProducer::new(&config).context("Failed to create Kafka producer")?;
        ProducerClient::new(native, self.producer.client_options(&self.kafka)?)
            .context("Failed to create producer client")
    }

    /// An rdkafka-backed transactional producer. Registers the transactional
    /// id with the coordinator before returning.
    pub async fn transactional_producer(
        &self,
    ) -> anyhow::Result<TransactionalProducer<RdProducer>> {
        let config = self
            .transactional
            .client_config(&self.kafka, &self.producer)?;
        let native =
            RdProducer::new(&config).context("Failed to create transactional Kafka producer")?;
        TransactionalProducer::new(native, self.producer.client_options(&self.kafka)?)
            .await
            .context("Failed to initialize transactions")
    }

    /// An rdkafka-backed consumer client, not yet subscribed.
    pub fn consumer_client(&self) -> anyhow::Result<ConsumerClient<RdConsumer>> {
        let config = self.consumer.client_config(&self.kafka)?;
        let native = RdConsumer::new(&config).context("Failed to create Kafka consumer")?;
        ConsumerClient::new(native, self.consumer.client_options(&self.kafka)?)
            .context("Failed to create consumer client")
    }
}

/// Command-line entry point for settings.
#[derive(Parser, Debug, Clone)]
#[command(name = "kafka-bridge", about = "Kafka client bridge settings")]
pub struct BridgeArgs {
    /// TOML config file; when given it replaces every other flag
    #[arg(long, env = "KAFKA_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub kafka: KafkaArgs,

    #[command(flatten)]
    pub producer: ProducerArgs,

    #[command(flatten)]
    pub consumer: ConsumerArgs,

    #[command(flatten)]
    pub transactional: TransactionalArgs,
}

impl BridgeArgs {
    pub fn settings(self) -> anyhow::Result<Settings> {
        match &self.config {
            Some(path) => {
                tracing::info!("Loading settings from {path:?}");
                Settings::from_file(path)
            }
            None => Ok(Settings {
                kafka: self.kafka,
                producer: self.producer,
                consumer: self.consumer,
                transactional: self.transactional,
            }),
        }
    }
}
