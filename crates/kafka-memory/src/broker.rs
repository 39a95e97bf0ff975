use kafka_bridge_types::{Error, Message, OffsetCommit, Result, TopicPartition};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consumer::{MemoryConsumer, MemoryConsumerConfig};
use crate::producer::{MemoryProducer, MemoryProducerConfig};

/// Broker-wide settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Partitions given to topics created implicitly
    pub default_partitions: i32,
    /// Create unknown topics on first produce or subscribe
    pub auto_create_topics: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_partitions: 1,
            auto_create_topics: true,
        }
    }
}

/// Call sites where a one-shot failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `produce` returns the error instead of enqueuing.
    Produce,
    /// The next delivered message is reported as failed and not stored.
    Delivery,
    /// A consumer offset commit is rejected.
    CommitOffsets,
    /// The next consumer poll ends its batch with a fatal error.
    ConsumerPoll,
    Subscribe,
    InitTransactions,
    BeginTransaction,
    SendOffsets,
    CommitTransaction,
    AbortTransaction,
}

/// Consumer-group membership snapshot handed to a transactional producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    pub group_id: String,
    /// -1 for consumers that assigned partitions manually
    pub generation_id: i32,
    pub member_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Committed,
    /// Written by the open transaction with this id
    Pending(u64),
    Aborted,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredRecord {
    pub message: Message,
    pub state: RecordState,
}

pub(crate) type PartitionLog = Vec<StoredRecord>;

pub(crate) struct BrokerState {
    pub config: BrokerConfig,
    pub topics: HashMap<String, Vec<PartitionLog>>,
    /// While set, producers keep messages queued instead of storing them
    pub deliveries_paused: bool,
    committed: HashMap<(String, TopicPartition), i64>,
    generations: HashMap<String, i32>,
    faults: HashMap<FaultPoint, VecDeque<Error>>,
    next_txn_id: u64,
    next_client_id: u64,
}

impl BrokerState {
    fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            topics: HashMap::new(),
            deliveries_paused: false,
            committed: HashMap::new(),
            generations: HashMap::new(),
            faults: HashMap::new(),
            next_txn_id: 1,
            next_client_id: 1,
        }
    }

    pub fn take_fault(&mut self, point: FaultPoint) -> Option<Error> {
        let error = self.faults.get_mut(&point)?.pop_front();
        if let Some(error) = &error {
            tracing::debug!("Injected fault at {point:?}: {error}");
        }
        error
    }

    pub fn fail_if_injected(&mut self, point: FaultPoint) -> Result<()> {
        match self.take_fault(point) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Partition count of `topic`, creating it when auto-creation is on.
    pub fn ensure_topic(&mut self, topic: &str) -> Result<usize> {
        if let Some(partitions) = self.topics.get(topic) {
            return Ok(partitions.len());
        }
        if !self.config.auto_create_topics {
            return Err(Error::broker(
                "UnknownTopicOrPartition",
                format!("Topic '{topic}' does not exist"),
            ));
        }
        let count = self.config.default_partitions.max(1) as usize;
        self.topics
            .insert(topic.to_string(), vec![Vec::new(); count]);
        Ok(count)
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(Vec::len)
    }

    pub fn log(&self, tp: &TopicPartition) -> Option<&PartitionLog> {
        self.topics.get(&tp.topic)?.get(tp.partition as usize)
    }

    /// Append to a partition, returning the stored message with its offset.
    pub fn append(&mut self, mut message: Message, state: RecordState) -> Result<Message> {
        let partition = message.partition.unwrap_or(0);
        let log = self
            .topics
            .get_mut(&message.topic)
            .and_then(|partitions| partitions.get_mut(partition as usize))
            .ok_or_else(|| {
                Error::broker(
                    "UnknownTopicOrPartition",
                    format!("Unknown partition {}/{partition}", message.topic),
                )
            })?;
        message.partition = Some(partition);
        message.offset = Some(log.len() as i64);
        message.timestamp = Some(now_millis());
        log.push(StoredRecord {
            message: message.clone(),
            state,
        });
        Ok(message)
    }

    pub fn next_txn_id(&mut self) -> u64 {
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        id
    }

    pub fn next_client_id(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    /// Write the commit or abort marker for a transaction.
    pub fn resolve_txn(&mut self, txn_id: u64, commit: bool) {
        let resolved = if commit {
            RecordState::Committed
        } else {
            RecordState::Aborted
        };
        for record in self.topics.values_mut().flatten().flatten() {
            if record.state == RecordState::Pending(txn_id) {
                record.state = resolved;
            }
        }
    }

    pub fn join_group(&mut self, group_id: &str) -> i32 {
        let generation = self.generations.entry(group_id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub fn generation(&self, group_id: &str) -> i32 {
        self.generations.get(group_id).copied().unwrap_or(0)
    }

    /// Reject commits from members of an older generation. Manually
    /// assigned consumers (generation -1) are not group members and skip it.
    pub fn check_generation(&self, group_id: &str, generation_id: i32) -> Result<()> {
        if generation_id < 0 {
            return Ok(());
        }
        let current = self.generation(group_id);
        if generation_id != current {
            return Err(Error::broker(
                "IllegalGeneration",
                format!(
                    "Group '{group_id}' is at generation {current}, commit carried generation {generation_id}"
                ),
            ));
        }
        Ok(())
    }

    pub fn commit_group_offsets(&mut self, group_id: &str, offsets: &OffsetCommit) {
        for (tp, offset) in offsets.iter() {
            self.committed
                .insert((group_id.to_string(), tp.clone()), offset);
        }
    }

    pub fn committed_offset(&self, group_id: &str, tp: &TopicPartition) -> Option<i64> {
        self.committed
            .get(&(group_id.to_string(), tp.clone()))
            .copied()
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Shared handle to an in-process broker. Cloning shares the same state.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBroker")
            .field("topics", &state.topics.len())
            .field("config", &state.config)
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(config))),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a topic; a no-op when it already exists.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let mut state = self.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.lock().partition_count(topic)
    }

    /// Make the next call at `point` fail with `error`. Faults queue up per
    /// call site and are consumed in order.
    pub fn inject_fault(&self, point: FaultPoint, error: Error) {
        self.lock()
            .faults
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Stop storing produced messages; they stay on the producers' outbound
    /// queues as if the partition leaders were unreachable.
    pub fn pause_deliveries(&self) {
        self.lock().deliveries_paused = true;
    }

    pub fn resume_deliveries(&self) {
        self.lock().deliveries_paused = false;
    }

    pub fn producer(&self, config: MemoryProducerConfig) -> MemoryProducer {
        MemoryProducer::new(self.clone(), config)
    }

    pub fn consumer(&self, config: MemoryConsumerConfig) -> MemoryConsumer {
        MemoryConsumer::new(self.clone(), config)
    }

    /// Next offset to read committed for a group, if any.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.lock()
            .committed_offset(group_id, &TopicPartition::new(topic, partition))
    }

    pub fn group_generation(&self, group_id: &str) -> i32 {
        self.lock().generation(group_id)
    }

    /// Every stored message of `topic` that a `read_committed` consumer could
    /// read right now, partition by partition.
    pub fn committed_messages(&self, topic: &str) -> Vec<Message> {
        let state = self.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .flat_map(|log| {
                // nothing past the first open transaction is stable yet
                log.iter()
                    .take_while(|record| !matches!(record.state, RecordState::Pending(_)))
                    .filter(|record| record.state == RecordState::Committed)
            })
            .map(|record| record.message.clone())
            .collect()
    }

    /// Every stored message of `topic`, including pending and aborted ones.
    pub fn all_messages(&self, topic: &str) -> Vec<Message> {
        let state = self.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .flatten()
            .map(|record| record.message.clone())
            .collect()
    }
}
