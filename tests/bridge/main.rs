//! End-to-end tests of the clients against the in-memory broker.
//!
//! Every test runs the real poll loops under a [`Supervisor`] and talks to the
//! broker only through the public client APIs.

mod commits;
mod delivery;
mod supervision;
mod transactions;

use futures::StreamExt;
use kafka_bridge::memory::{MemoryBroker, MemoryConsumer, MemoryProducer, MemoryProducerConfig};
use kafka_bridge::{
    ClientOptions, ConsumedMessage, ConsumerArgs, ConsumerClient, ConsumerMessages, Isolation,
    Message, ProducerArgs, ProducerClient, TransactionalArgs, TransactionalProducer,
};
use kafka_bridge_types::{MessageId, NativeProducer};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("kafka_bridge=debug,kafka_bridge_producer=debug,kafka_bridge_consumer=debug")
        .try_init()
        .ok();
}

pub fn fast(options: ClientOptions) -> ClientOptions {
    options
        .poll_interval(Duration::from_millis(5))
        .shutdown_timeout(Duration::from_millis(100))
}

pub fn producer(broker: &MemoryBroker) -> ProducerClient<MemoryProducer> {
    producer_with(broker, MemoryProducerConfig::default())
}

pub fn producer_with(
    broker: &MemoryBroker,
    config: MemoryProducerConfig,
) -> ProducerClient<MemoryProducer> {
    ProducerClient::new(broker.producer(config), fast(ClientOptions::default())).unwrap()
}

pub async fn transactional_producer(
    broker: &MemoryBroker,
    transactional_id: &str,
) -> TransactionalProducer<MemoryProducer> {
    let args = TransactionalArgs {
        transactional_id: Some(transactional_id.to_string()),
        ..TransactionalArgs::default()
    };
    let config = args.memory_config(&ProducerArgs::default()).unwrap();
    TransactionalProducer::new(broker.producer(config), fast(ClientOptions::default()))
        .await
        .unwrap()
}

/// A consumer configured the way the `[consumer]` settings describe it:
/// read_committed, earliest, manual commits, partition end markers on.
pub fn consumer(broker: &MemoryBroker, group: &str) -> ConsumerClient<MemoryConsumer> {
    consumer_with(broker, group, Isolation::ReadCommitted)
}

pub fn consumer_with(
    broker: &MemoryBroker,
    group: &str,
    isolation_level: Isolation,
) -> ConsumerClient<MemoryConsumer> {
    let args = ConsumerArgs {
        group_id: Some(group.to_string()),
        isolation_level,
        ..ConsumerArgs::default()
    };
    let native = broker.consumer(args.memory_config().unwrap());
    ConsumerClient::new(native, fast(ClientOptions::consumer())).unwrap()
}

/// Write `count` messages `"{prefix}-{i:02}"` straight to the broker.
pub fn seed(broker: &MemoryBroker, topic: &str, prefix: &str, count: usize) {
    let mut native = broker.producer(MemoryProducerConfig::default());
    for i in 0..count {
        let message = Message::new(topic, format!("{prefix}-{i:02}"));
        native
            .produce(MessageId::from_u64(i as u64), &message)
            .unwrap();
    }
    native.flush(WAIT).unwrap();
}

/// Read until every one of `partitions` partitions reported its end and
/// return the data messages seen on the way.
pub async fn read_until_end(messages: &mut ConsumerMessages, partitions: usize) -> Vec<Message> {
    let mut data = Vec::new();
    let mut ended = HashSet::new();
    let read = async {
        while ended.len() < partitions {
            match messages.next().await {
                Some(ConsumedMessage::Data(message)) => data.push(message),
                Some(ConsumedMessage::PartitionEnd { partition, .. }) => {
                    ended.insert(partition);
                }
                None => break,
            }
        }
    };
    timeout(WAIT, read).await.expect("timed out reading messages");
    data
}

pub fn values(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| String::from_utf8_lossy(&m.value).into_owned())
        .collect()
}
