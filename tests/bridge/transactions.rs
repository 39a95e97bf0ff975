//! Atomic produce plus offset commit through `with_transaction`.

use crate::{consumer, consumer_with, init_tracing, read_until_end, seed, transactional_producer, values};
use kafka_bridge::memory::{FaultPoint, MemoryBroker};
use kafka_bridge::{
    Error, ErrorKind, Isolation, Message, OffsetCommit, Supervisor, TransactionError,
    TransactionState,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consume_transform_produce_commits_atomically() {
    init_tracing();

    let broker = MemoryBroker::new();
    seed(&broker, "orders", "order", 4);

    let source = consumer(&broker, "enricher");
    let mut messages = source.messages().unwrap();
    source.subscribe(&["orders"]).await.unwrap();
    let producer = transactional_producer(&broker, "enricher-tx").await;

    let mut supervisor = Supervisor::new();
    supervisor.spawn("enricher-consumer", source.clone());
    supervisor.spawn("enricher-producer", producer.clone());

    let read = read_until_end(&mut messages, 1).await;
    assert_eq!(read.len(), 4);

    let sends = producer
        .with_transaction(|txn| {
            let source = source.clone();
            let broker = broker.clone();
            let read = read.clone();
            async move {
                for message in &read {
                    let value = format!("enriched-{}", String::from_utf8_lossy(&message.value));
                    txn.send(Message::new("enriched", value)).await?;
                }
                txn.send_offsets(&OffsetCommit::after_all(&read)?, &source)
                    .await?;
                // nothing is visible before the commit
                assert!(broker.committed_messages("enriched").is_empty());
                assert_eq!(broker.committed_offset("enricher", "orders", 0), None);
                Ok::<_, Error>(txn.sends())
            }
        })
        .await
        .unwrap();
    assert_eq!(sends.len(), 4);
    assert_eq!(producer.state(), TransactionState::Idle);
    assert_eq!(broker.committed_offset("enricher", "orders", 0), Some(4));

    let reader = consumer(&broker, "downstream");
    let mut enriched = reader.messages().unwrap();
    reader.subscribe(&["enriched"]).await.unwrap();
    supervisor.spawn("downstream", reader.clone());
    let visible = read_until_end(&mut enriched, 1).await;
    assert_eq!(
        values(&visible),
        vec![
            "enriched-order-00",
            "enriched-order-01",
            "enriched-order-02",
            "enriched-order-03"
        ]
    );

    supervisor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_body_aborts_everything() {
    init_tracing();

    let broker = MemoryBroker::new();
    seed(&broker, "orders", "order", 2);
    let source = consumer(&broker, "enricher");
    source.subscribe(&["orders"]).await.unwrap();
    let producer = transactional_producer(&broker, "enricher-tx").await;
    let mut supervisor = Supervisor::new();
    supervisor.spawn("enricher-producer", producer.clone());

    let result = producer
        .with_transaction(|txn| {
            let source = source.clone();
            async move {
                txn.send(Message::new("enriched", "a")).await?;
                txn.send(Message::new("enriched", "b")).await?;
                let mut offsets = OffsetCommit::new();
                offsets.insert("orders", 0, 2);
                txn.send_offsets(&offsets, &source).await?;
                Err::<(), _>(Error::Configuration("schema mismatch".to_string()))
            }
        })
        .await;
    match result {
        Err(TransactionError::Body(Error::Configuration(reason))) => {
            assert_eq!(reason, "schema mismatch")
        }
        other => panic!("expected the body error, got {other:?}"),
    }
    assert_eq!(producer.state(), TransactionState::Idle);
    assert!(broker.committed_messages("enriched").is_empty());
    assert_eq!(broker.committed_offset("enricher", "orders", 0), None);

    let reader = consumer_with(&broker, "downstream", Isolation::ReadCommitted);
    let mut enriched = reader.messages().unwrap();
    reader.subscribe(&["enriched"]).await.unwrap();
    supervisor.spawn("downstream", reader.clone());
    assert!(read_until_end(&mut enriched, 1).await.is_empty());

    supervisor.shutdown().await.unwrap();
    source.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_transaction_while_active_is_rejected() {
    let broker = MemoryBroker::new();
    let producer = transactional_producer(&broker, "single-tx").await;

    let nested = producer
        .with_transaction(|txn| {
            let producer = producer.clone();
            async move {
                txn.send(Message::new("out", "outer")).await?;
                let inner = producer
                    .with_transaction(|_inner| async { Ok::<_, Error>(()) })
                    .await;
                Ok::<_, Error>(inner)
            }
        })
        .await
        .unwrap();
    match nested {
        Err(TransactionError::Client(Error::TransactionState { expected, actual })) => {
            assert_eq!(expected, TransactionState::Idle);
            assert_eq!(actual, TransactionState::Active);
        }
        other => panic!("expected a TransactionState error, got {other:?}"),
    }
    // the outer transaction still committed
    assert_eq!(values(&broker.committed_messages("out")), vec!["outer"]);
    producer.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_failure_keeps_both_errors() {
    let broker = MemoryBroker::new();
    let producer = transactional_producer(&broker, "flaky-tx").await;
    broker.inject_fault(
        FaultPoint::AbortTransaction,
        Error::broker("CoordinatorLoadInProgress", "Coordinator is loading"),
    );

    let result = producer
        .with_transaction(|txn| async move {
            txn.send(Message::new("out", "x")).await?;
            Err::<(), _>(Error::Configuration("body failed".to_string()))
        })
        .await;
    match result {
        Err(TransactionError::Inconsistent { body, abort }) => {
            assert_eq!(body, Error::Configuration("body failed".to_string()));
            assert_eq!(abort.kind(), ErrorKind::Broker);
        }
        other => panic!("expected Inconsistent, got {other:?}"),
    }
    assert_eq!(producer.state(), TransactionState::Idle);
    producer.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_commit_is_aborted_and_returned() {
    let broker = MemoryBroker::new();
    let producer = transactional_producer(&broker, "commit-tx").await;
    broker.inject_fault(
        FaultPoint::CommitTransaction,
        Error::broker("InvalidProducerEpoch", "Producer fenced"),
    );

    let result = producer
        .with_transaction(|txn| async move {
            txn.send(Message::new("out", "x")).await?;
            Ok::<_, Error>(())
        })
        .await;
    match result {
        Err(TransactionError::Client(Error::Broker { code, .. })) => {
            assert_eq!(code, "InvalidProducerEpoch")
        }
        other => panic!("expected the commit error, got {other:?}"),
    }
    assert_eq!(producer.state(), TransactionState::Idle);
    assert!(broker.committed_messages("out").is_empty());

    // the producer is usable again
    producer
        .with_transaction(|txn| async move {
            txn.send(Message::new("out", "y")).await?;
            Ok::<_, Error>(())
        })
        .await
        .unwrap();
    assert_eq!(values(&broker.committed_messages("out")), vec!["y"]);
    producer.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transaction_handle_is_dead_after_the_call() {
    let broker = MemoryBroker::new();
    let producer = transactional_producer(&broker, "leak-tx").await;

    let leaked = producer
        .with_transaction(|txn| async move { Ok::<_, Error>(txn) })
        .await
        .unwrap();
    let err = leaked.send(Message::new("out", "late")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionState);
    assert!(broker.committed_messages("out").is_empty());
    producer.shutdown().await.unwrap();
}
