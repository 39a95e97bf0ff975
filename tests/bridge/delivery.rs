//! Delivery reports: one per send, matched by id.

use crate::{consumer, fast, init_tracing, producer, producer_with, read_until_end, values, WAIT};
use futures::StreamExt;
use kafka_bridge::memory::{FaultPoint, MemoryBroker, MemoryProducerConfig};
use kafka_bridge::{
    flatten_reports, ClientOptions, DeliveryStatus, Error, Message, MessageId, ProducerClient,
    Supervisor,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ten_sends_ten_acknowledgements_then_read_in_order() {
    init_tracing();

    let broker = MemoryBroker::new();
    broker.create_topic("orders", 3);
    let producer = producer(&broker);
    let mut reports = Box::pin(flatten_reports(producer.events().unwrap()));

    let mut supervisor = Supervisor::new();
    supervisor.spawn("orders-producer", producer.clone());

    let mut sent = Vec::new();
    for i in 0..10 {
        let message = Message::new("orders", format!("order-{i:02}"))
            .with_key(format!("customer-{}", i % 4));
        sent.push(producer.send(message).await.unwrap());
    }

    let acked: Vec<_> = timeout(WAIT, (&mut reports).take(10).collect())
        .await
        .unwrap();
    let mut acked_ids: Vec<MessageId> = acked.iter().map(|r| r.id).collect();
    acked_ids.sort();
    assert_eq!(acked_ids, sent);

    let mut positions = HashMap::new();
    for report in &acked {
        match &report.status {
            DeliveryStatus::Acknowledged(message) => {
                assert!(message.partition.is_some());
                assert!(message.offset.is_some());
                positions.insert(
                    String::from_utf8_lossy(&message.value).into_owned(),
                    (message.partition.unwrap(), message.offset.unwrap()),
                );
            }
            DeliveryStatus::Failed(e) => panic!("delivery {} failed: {e}", report.id),
        }
    }
    assert_eq!(producer.in_flight().await, 0);

    supervisor.shutdown().await.unwrap();
    // no report beyond the ten
    let rest: Vec<_> = timeout(WAIT, reports.collect()).await.unwrap();
    assert!(rest.is_empty(), "unexpected reports: {rest:?}");

    let audit = consumer(&broker, "audit");
    let mut messages = audit.messages().unwrap();
    audit.subscribe(&["orders"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("audit-consumer", audit.clone());

    let consumed = read_until_end(&mut messages, 3).await;
    assert_eq!(consumed.len(), 10);

    let mut by_partition: HashMap<i32, Vec<_>> = HashMap::new();
    for message in &consumed {
        let value = String::from_utf8_lossy(&message.value).into_owned();
        assert_eq!(
            positions.get(&value),
            Some(&(message.partition.unwrap(), message.offset.unwrap())),
            "{value} consumed at a different position than acknowledged"
        );
        by_partition
            .entry(message.partition.unwrap())
            .or_default()
            .push(message.clone());
    }
    for (partition, messages) in by_partition {
        let offsets: Vec<_> = messages.iter().map(|m| m.offset.unwrap()).collect();
        let expected: Vec<_> = (0..offsets.len() as i64).collect();
        assert_eq!(offsets, expected, "partition {partition} out of order");

        let values = values(&messages);
        let mut sorted = values.clone();
        sorted.sort();
        assert_eq!(values, sorted, "partition {partition} not in send order");
    }

    supervisor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_delivery_is_reported_once() {
    init_tracing();

    let broker = MemoryBroker::new();
    broker.inject_fault(
        FaultPoint::Delivery,
        Error::broker("MessageSizeTooLarge", "Message too large"),
    );
    let producer = producer(&broker);
    let mut reports = Box::pin(flatten_reports(producer.events().unwrap()));
    let mut supervisor = Supervisor::new();
    supervisor.spawn("producer", producer.clone());

    let first = producer.send(Message::new("orders", "big")).await.unwrap();
    let second = producer.send(Message::new("orders", "small")).await.unwrap();

    let received: Vec<_> = timeout(WAIT, (&mut reports).take(2).collect())
        .await
        .unwrap();
    let failed: Vec<_> = received.iter().filter(|r| !r.is_acknowledged()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, first);
    assert!(matches!(
        &failed[0].status,
        DeliveryStatus::Failed(Error::Broker { code, .. }) if code == "MessageSizeTooLarge"
    ));
    assert!(received.iter().any(|r| r.id == second && r.is_acknowledged()));

    supervisor.shutdown().await.unwrap();
    assert!(timeout(WAIT, reports.next()).await.unwrap().is_none());
    assert_eq!(broker.all_messages("orders").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_full_then_backoff_recovers() {
    init_tracing();

    let broker = MemoryBroker::new();
    broker.pause_deliveries();
    let producer = producer_with(&broker, MemoryProducerConfig::default().queue_capacity(2));
    let mut reports = Box::pin(flatten_reports(producer.events().unwrap()));

    producer.send(Message::new("orders", "a")).await.unwrap();
    producer.send(Message::new("orders", "b")).await.unwrap();
    let err = producer.send(Message::new("orders", "c")).await.unwrap_err();
    assert_eq!(err, Error::QueueFull);

    let mut supervisor = Supervisor::new();
    supervisor.spawn("producer", producer.clone());
    tokio::spawn({
        let broker = broker.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            broker.resume_deliveries();
        }
    });

    let id = producer
        .send_with_backoff(Message::new("orders", "c"), WAIT)
        .await
        .unwrap();
    let received: Vec<_> = timeout(WAIT, (&mut reports).take(3).collect())
        .await
        .unwrap();
    assert!(received.iter().all(|r| r.is_acknowledged()));
    assert!(received.iter().any(|r| r.id == id));

    supervisor.shutdown().await.unwrap();
    assert_eq!(broker.all_messages("orders").len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_fails_unacknowledged_sends() {
    init_tracing();

    let broker = MemoryBroker::new();
    broker.pause_deliveries();
    let producer = ProducerClient::new(
        broker.producer(MemoryProducerConfig::default()),
        fast(ClientOptions::default()),
    )
    .unwrap();
    let reports = Box::pin(flatten_reports(producer.events().unwrap()));

    let mut supervisor = Supervisor::new();
    supervisor.spawn("producer", producer.clone());
    let mut sent = Vec::new();
    for i in 0..3 {
        sent.push(producer.send(Message::new("orders", format!("{i}"))).await.unwrap());
    }
    supervisor.shutdown().await.unwrap();

    let received: Vec<_> = timeout(WAIT, reports.collect()).await.unwrap();
    assert_eq!(received.len(), 3);
    for (report, id) in received.iter().zip(&sent) {
        assert_eq!(report.id, *id);
        assert_eq!(report.status, DeliveryStatus::Failed(Error::Undelivered));
    }
    assert!(producer.send(Message::new("orders", "late")).await.is_err());
}
