use kafka_bridge_types::{
    Error, Message, MessageId, NativeEvent, NativeHandle, NativeProducer, OffsetCommit, Result,
    TransactionState,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use crate::broker::{BrokerState, FaultPoint, GroupMetadata, MemoryBroker, RecordState};

/// Settings for one in-memory producer.
#[derive(Debug, Clone)]
pub struct MemoryProducerConfig {
    /// Enables the transactional API, like `transactional.id`
    pub transactional_id: Option<String>,
    /// Outbound queue capacity, like `queue.buffering.max.messages`
    pub queue_capacity: usize,
    /// Emit a statistics event this often, like `statistics.interval.ms`
    pub statistics_interval: Option<Duration>,
}

impl Default for MemoryProducerConfig {
    fn default() -> Self {
        Self {
            transactional_id: None,
            queue_capacity: 100_000,
            statistics_interval: None,
        }
    }
}

impl MemoryProducerConfig {
    pub fn transactional(transactional_id: impl Into<String>) -> Self {
        Self {
            transactional_id: Some(transactional_id.into()),
            ..Self::default()
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn statistics_interval(mut self, interval: Duration) -> Self {
        self.statistics_interval = Some(interval);
        self
    }
}

struct Queued {
    id: MessageId,
    message: Message,
    txn: Option<u64>,
}

#[derive(Default)]
struct Txn {
    initialized: bool,
    open: Option<u64>,
    staged_offsets: Vec<(String, OffsetCommit)>,
}

/// Producer handle of a [`MemoryBroker`].
///
/// `produce` only enqueues; messages reach the partition logs on the next
/// `poll`, `flush` or transaction commit, and each yields one delivery event.
pub struct MemoryProducer {
    broker: MemoryBroker,
    config: MemoryProducerConfig,
    name: String,
    outbound: VecDeque<Queued>,
    ready: Vec<NativeEvent>,
    round_robin: usize,
    txn: Txn,
    delivered: u64,
    last_statistics: Instant,
}

impl MemoryProducer {
    pub(crate) fn new(broker: MemoryBroker, config: MemoryProducerConfig) -> Self {
        let name = format!("memory-producer-{}", broker.lock().next_client_id());
        Self {
            broker,
            config,
            name,
            outbound: VecDeque::new(),
            ready: Vec::new(),
            round_robin: 0,
            txn: Txn::default(),
            delivered: 0,
            last_statistics: Instant::now(),
        }
    }

    /// Messages accepted by `produce` and not yet stored.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    fn choose_partition(&mut self, message: &Message, count: usize) -> Result<i32> {
        if let Some(partition) = message.partition {
            if partition as usize >= count {
                return Err(Error::Configuration(format!(
                    "Unknown partition {partition} for topic '{}' ({count} partitions)",
                    message.topic
                )));
            }
            return Ok(partition);
        }
        let index = match &message.key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                hasher.finish() as usize % count
            }
            None => {
                self.round_robin = self.round_robin.wrapping_add(1);
                self.round_robin % count
            }
        };
        Ok(index as i32)
    }

    /// Move queued messages into the partition logs, recording one delivery
    /// event each. Stops early while deliveries are paused.
    fn deliver_queued(&mut self, state: &mut BrokerState) {
        while !state.deliveries_paused {
            let Some(queued) = self.outbound.pop_front() else {
                break;
            };
            let result = match state.take_fault(FaultPoint::Delivery) {
                Some(error) => Err(error),
                None => {
                    let record_state = match queued.txn {
                        Some(txn) => RecordState::Pending(txn),
                        None => RecordState::Committed,
                    };
                    state.append(queued.message, record_state)
                }
            };
            if result.is_ok() {
                self.delivered += 1;
            }
            self.ready.push(NativeEvent::Delivery {
                id: queued.id,
                result,
            });
        }
    }

    fn open_txn(&self) -> Result<u64> {
        self.txn.open.ok_or(Error::TransactionState {
            expected: TransactionState::Active,
            actual: TransactionState::Idle,
        })
    }

    fn statistics(&self) -> String {
        format!(
            r#"{{"name":"{}","type":"producer","msg_cnt":{},"txmsgs":{}}}"#,
            self.name,
            self.outbound.len(),
            self.delivered
        )
    }
}

impl NativeHandle for MemoryProducer {
    fn poll(&mut self, _timeout: Duration) -> Vec<NativeEvent> {
        let broker = self.broker.clone();
        self.deliver_queued(&mut broker.lock());

        let mut events = std::mem::take(&mut self.ready);
        if let Some(interval) = self.config.statistics_interval {
            if self.last_statistics.elapsed() >= interval {
                events.push(NativeEvent::Statistics(self.statistics()));
                self.last_statistics = Instant::now();
            }
        }
        events
    }
}

impl NativeProducer for MemoryProducer {
    type GroupMetadata = GroupMetadata;

    fn produce(&mut self, id: MessageId, message: &Message) -> Result<()> {
        let broker = self.broker.clone();
        let mut state = broker.lock();
        state.fail_if_injected(FaultPoint::Produce)?;

        let txn = match (&self.config.transactional_id, self.txn.open) {
            (Some(_), Some(txn)) => Some(txn),
            (Some(_), None) => {
                return Err(Error::TransactionState {
                    expected: TransactionState::Active,
                    actual: TransactionState::Idle,
                })
            }
            (None, _) => None,
        };
        if self.outbound.len() >= self.config.queue_capacity {
            return Err(Error::QueueFull);
        }

        let count = state.ensure_topic(&message.topic)?;
        let partition = self.choose_partition(message, count)?;
        let mut message = message.clone();
        message.partition = Some(partition);
        self.outbound.push_back(Queued { id, message, txn });
        Ok(())
    }

    /// Stores everything queued. Returns immediately with an error when
    /// deliveries are paused rather than sleeping out the timeout.
    fn flush(&mut self, _timeout: Duration) -> Result<()> {
        let broker = self.broker.clone();
        self.deliver_queued(&mut broker.lock());
        if self.outbound.is_empty() {
            Ok(())
        } else {
            Err(Error::Native(format!(
                "Flush timed out with {} messages still queued",
                self.outbound.len()
            )))
        }
    }

    fn init_transactions(&mut self, _timeout: Duration) -> Result<()> {
        if self.config.transactional_id.is_none() {
            return Err(Error::Configuration(
                "init_transactions requires a transactional id".to_string(),
            ));
        }
        self.broker
            .lock()
            .fail_if_injected(FaultPoint::InitTransactions)?;
        self.txn.initialized = true;
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if !self.txn.initialized {
            return Err(Error::Native(
                "Transactions have not been initialized".to_string(),
            ));
        }
        if self.txn.open.is_some() {
            return Err(Error::TransactionState {
                expected: TransactionState::Idle,
                actual: TransactionState::Active,
            });
        }
        let mut state = self.broker.lock();
        state.fail_if_injected(FaultPoint::BeginTransaction)?;
        self.txn.open = Some(state.next_txn_id());
        Ok(())
    }

    fn send_offsets_to_transaction(
        &mut self,
        offsets: &OffsetCommit,
        group: &GroupMetadata,
        _timeout: Duration,
    ) -> Result<()> {
        self.open_txn()?;
        let mut state = self.broker.lock();
        state.fail_if_injected(FaultPoint::SendOffsets)?;
        state.check_generation(&group.group_id, group.generation_id)?;
        self.txn
            .staged_offsets
            .push((group.group_id.clone(), offsets.clone()));
        Ok(())
    }

    fn commit_transaction(&mut self, _timeout: Duration) -> Result<()> {
        let txn = self.open_txn()?;
        let broker = self.broker.clone();
        let mut state = broker.lock();
        state.fail_if_injected(FaultPoint::CommitTransaction)?;

        self.deliver_queued(&mut state);
        if !self.outbound.is_empty() {
            return Err(Error::Native(
                "Commit timed out flushing queued messages".to_string(),
            ));
        }
        state.resolve_txn(txn, true);
        for (group_id, offsets) in self.txn.staged_offsets.drain(..) {
            state.commit_group_offsets(&group_id, &offsets);
        }
        self.txn.open = None;
        Ok(())
    }

    fn abort_transaction(&mut self, _timeout: Duration) -> Result<()> {
        let txn = self.open_txn()?;
        let broker = self.broker.clone();
        let mut state = broker.lock();
        state.fail_if_injected(FaultPoint::AbortTransaction)?;

        // queued messages of the transaction are purged, not stored
        let (purged, kept): (Vec<_>, Vec<_>) = self
            .outbound
            .drain(..)
            .partition(|queued| queued.txn == Some(txn));
        self.outbound = kept.into();
        for queued in purged {
            self.ready.push(NativeEvent::Delivery {
                id: queued.id,
                result: Err(Error::broker("PurgeQueue", "Purged by transaction abort")),
            });
        }
        state.resolve_txn(txn, false);
        self.txn.staged_offsets.clear();
        self.txn.open = None;
        Ok(())
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        // the coordinator times out transactions left open by a dead producer
        if let Some(txn) = self.txn.open.take() {
            self.broker.lock().resolve_txn(txn, false);
        }
    }
}
