//! Poll loops under one supervisor: cancellation, back pressure, shutdown.

use crate::{consumer, init_tracing, producer, read_until_end, seed, transactional_producer, values, WAIT};
use futures::StreamExt;
use kafka_bridge::memory::MemoryBroker;
use kafka_bridge::{
    ConsumerArgs, ConsumerClient, ConsumerState, KafkaArgs, Message, Overflow, Supervisor,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_stops_every_loop_promptly() {
    init_tracing();

    let broker = MemoryBroker::new();
    let plain = producer(&broker);
    let transactional = transactional_producer(&broker, "supervised-tx").await;
    let reader = consumer(&broker, "supervised");
    reader.subscribe(&["orders"]).await.unwrap();
    let events = plain.events().unwrap();
    let messages = reader.messages().unwrap();

    let mut supervisor = Supervisor::new();
    supervisor.spawn("producer", plain.clone());
    supervisor.spawn("transactional", transactional.clone());
    supervisor.spawn("consumer", reader.clone());
    assert_eq!(supervisor.len(), 3);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    timeout(Duration::from_secs(1), supervisor.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(reader.state(), ConsumerState::Closed);
    assert!(plain.send(Message::new("orders", "late")).await.is_err());
    // both sequences have ended
    assert!(timeout(WAIT, events.collect::<Vec<_>>()).await.is_ok());
    assert!(timeout(WAIT, messages.collect::<Vec<_>>()).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_until_signal() {
    let broker = MemoryBroker::new();
    let reader = consumer(&broker, "signalled");
    reader.subscribe(&["orders"]).await.unwrap();

    let mut supervisor = Supervisor::new();
    supervisor.spawn("consumer", reader.clone());
    let signal = tokio::time::sleep(Duration::from_millis(30));
    timeout(WAIT, supervisor.run_until(signal))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reader.state(), ConsumerState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_event_sequence_does_not_stop_the_producer() {
    let broker = MemoryBroker::new();
    let producer = producer(&broker);
    drop(producer.events().unwrap());

    let mut supervisor = Supervisor::new();
    supervisor.spawn("producer", producer.clone());
    for i in 0..5 {
        producer
            .send(Message::new("orders", format!("{i}")))
            .await
            .unwrap();
    }
    producer.flush(WAIT).await.unwrap();
    supervisor.shutdown().await.unwrap();
    assert_eq!(broker.all_messages("orders").len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_reader_pauses_the_consumer_without_loss() {
    let broker = MemoryBroker::new();
    seed(&broker, "clicks", "click", 10);

    let kafka = KafkaArgs {
        poll_interval: Duration::from_millis(5),
        ..KafkaArgs::default()
    };
    let args = ConsumerArgs {
        group_id: Some("analytics".to_string()),
        message_capacity: 2,
        message_overflow: Overflow::Block,
        ..ConsumerArgs::default()
    };
    let reader = ConsumerClient::new(
        broker.consumer(args.memory_config().unwrap()),
        args.client_options(&kafka).unwrap(),
    )
    .unwrap();
    let mut messages = reader.messages().unwrap();
    reader.subscribe(&["clicks"]).await.unwrap();

    let mut supervisor = Supervisor::new();
    supervisor.spawn("analytics", reader.clone());
    // let the poll loop fill the channel and stall
    tokio::time::sleep(Duration::from_millis(50)).await;

    let all = read_until_end(&mut messages, 1).await;
    assert_eq!(all.len(), 10);
    assert_eq!(values(&all)[0], "click-00");
    assert_eq!(values(&all)[9], "click-09");

    timeout(WAIT, supervisor.shutdown()).await.unwrap().unwrap();
}
