//! Offset commits and resuming a consumer group.

use crate::{consumer, init_tracing, read_until_end, seed, values, WAIT};
use futures::StreamExt;
use kafka_bridge::memory::{FaultPoint, MemoryBroker};
use kafka_bridge::{ConsumedMessage, ConsumerState, Error, ErrorKind, OffsetCommit, Supervisor};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commit_after_every_message_then_resume() {
    init_tracing();

    let broker = MemoryBroker::new();
    seed(&broker, "payments", "payment", 6);

    let first = consumer(&broker, "ledger");
    let mut messages = first.messages().unwrap();
    first.subscribe(&["payments"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("ledger-1", first.clone());

    let mut handled = Vec::new();
    while handled.len() < 3 {
        let next = timeout(WAIT, messages.next()).await.unwrap().unwrap();
        if let ConsumedMessage::Data(message) = next {
            first.commit_sync(&message).await.unwrap();
            assert_eq!(
                broker.committed_offset("ledger", "payments", 0),
                Some(message.offset.unwrap() + 1)
            );
            handled.push(message);
        }
    }
    supervisor.shutdown().await.unwrap();
    assert_eq!(first.state(), ConsumerState::Closed);
    assert_eq!(values(&handled), vec!["payment-00", "payment-01", "payment-02"]);

    let second = consumer(&broker, "ledger");
    let mut messages = second.messages().unwrap();
    second.subscribe(&["payments"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("ledger-2", second.clone());

    let rest = read_until_end(&mut messages, 1).await;
    assert_eq!(values(&rest), vec!["payment-03", "payment-04", "payment-05"]);
    supervisor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_committing_same_offset_twice_is_idempotent() {
    let broker = MemoryBroker::new();
    seed(&broker, "payments", "payment", 2);

    let client = consumer(&broker, "ledger");
    let mut messages = client.messages().unwrap();
    client.subscribe(&["payments"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("ledger", client.clone());

    let read = read_until_end(&mut messages, 1).await;
    let last = read.last().unwrap();

    client.commit_sync(last).await.unwrap();
    client.commit_sync(last).await.unwrap();
    assert_eq!(broker.committed_offset("ledger", "payments", 0), Some(2));

    let record = OffsetCommit::after_all(&read).unwrap();
    assert_eq!(record.get("payments", 0), Some(2));
    client.commit_offsets_sync(&record).await.unwrap();
    assert_eq!(broker.committed_offset("ledger", "payments", 0), Some(2));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_member_reads_exactly_the_uncommitted_half() {
    init_tracing();

    let broker = MemoryBroker::new();
    seed(&broker, "events", "event", 10);

    let a = consumer(&broker, "projection");
    let mut messages = a.messages().unwrap();
    a.subscribe(&["events"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("projection-a", a.clone());

    let all = read_until_end(&mut messages, 1).await;
    assert_eq!(all.len(), 10);
    for message in &all[..5] {
        a.commit_sync(message).await.unwrap();
    }
    supervisor.shutdown().await.unwrap();

    let b = consumer(&broker, "projection");
    let mut messages = b.messages().unwrap();
    b.subscribe(&["events"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("projection-b", b.clone());

    let remaining = read_until_end(&mut messages, 1).await;
    assert_eq!(
        values(&remaining),
        vec!["event-05", "event-06", "event-07", "event-08", "event-09"]
    );
    supervisor.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_partition_end_repeats_after_new_data() {
    let broker = MemoryBroker::new();
    seed(&broker, "audit", "first", 2);

    let client = consumer(&broker, "auditors");
    let mut messages = client.messages().unwrap();
    client.subscribe(&["audit"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("auditors", client.clone());

    let first = read_until_end(&mut messages, 1).await;
    assert_eq!(values(&first), vec!["first-00", "first-01"]);

    seed(&broker, "audit", "second", 1);
    let next: Vec<_> = timeout(WAIT, (&mut messages).take(2).collect())
        .await
        .unwrap();
    assert_eq!(next[0].as_data().unwrap().offset, Some(2));
    assert_eq!(
        next[1],
        ConsumedMessage::PartitionEnd {
            topic: "audit".to_string(),
            partition: 0,
            offset: 3
        }
    );

    supervisor.shutdown().await.unwrap();
    // the sequence ends once the consumer is closed
    assert!(timeout(WAIT, messages.next()).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_commits_are_surfaced_not_retried() {
    let broker = MemoryBroker::new();
    seed(&broker, "payments", "payment", 3);

    let first = consumer(&broker, "ledger");
    let mut messages = first.messages().unwrap();
    first.subscribe(&["payments"]).await.unwrap();
    let mut supervisor = Supervisor::new();
    supervisor.spawn("ledger-1", first.clone());
    let read = read_until_end(&mut messages, 1).await;

    broker.inject_fault(
        FaultPoint::CommitOffsets,
        Error::broker("CoordinatorNotAvailable", "Coordinator not available"),
    );
    let err = first.commit_sync(&read[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Broker);
    assert_eq!(broker.committed_offset("ledger", "payments", 0), None);

    // a newer member joining fences the first one
    let second = consumer(&broker, "ledger");
    second.subscribe(&["payments"]).await.unwrap();
    let err = first.commit_sync(&read[1]).await.unwrap_err();
    assert!(matches!(err, Error::Broker { .. }), "{err}");
    assert_eq!(broker.committed_offset("ledger", "payments", 0), None);

    supervisor.shutdown().await.unwrap();
    second.close().await.unwrap();
}
