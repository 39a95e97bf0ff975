use kafka_bridge_types::{
    CommitMode, Error, NativeConsumer, NativeEvent, NativeHandle, OffsetCommit, Result,
    TopicPartition,
};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::broker::{BrokerState, FaultPoint, GroupMetadata, MemoryBroker, RecordState};

/// Which records a consumer may read, like `isolation.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Only committed transactional records; reading stops at an open
    /// transaction.
    #[default]
    ReadCommitted,
    ReadUncommitted,
}

/// Where to start when the group has no committed offset, like
/// `auto.offset.reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

/// Settings for one in-memory consumer.
#[derive(Debug, Clone)]
pub struct MemoryConsumerConfig {
    pub group_id: String,
    pub isolation: IsolationLevel,
    pub auto_offset_reset: OffsetReset,
    /// Report [`NativeEvent::PartitionEnd`] when a partition is drained
    pub enable_partition_eof: bool,
    /// Commit the read position on every poll
    pub enable_auto_commit: bool,
    /// Upper bound on messages returned by one poll
    pub max_poll_records: usize,
}

impl MemoryConsumerConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            isolation: IsolationLevel::default(),
            auto_offset_reset: OffsetReset::default(),
            enable_partition_eof: false,
            enable_auto_commit: false,
            max_poll_records: 500,
        }
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn auto_offset_reset(mut self, reset: OffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    pub fn partition_eof(mut self, enabled: bool) -> Self {
        self.enable_partition_eof = enabled;
        self
    }

    pub fn auto_commit(mut self, enabled: bool) -> Self {
        self.enable_auto_commit = enabled;
        self
    }

    pub fn max_poll_records(mut self, max: usize) -> Self {
        self.max_poll_records = max.max(1);
        self
    }
}

/// Consumer handle of a [`MemoryBroker`].
pub struct MemoryConsumer {
    broker: MemoryBroker,
    config: MemoryConsumerConfig,
    member_id: String,
    generation_id: Option<i32>,
    /// Next offset to read per assigned partition; `None` until resolved
    /// from the committed offset or the reset policy.
    positions: BTreeMap<TopicPartition, Option<i64>>,
    /// Partitions whose end was already reported at the current position
    eof_reported: HashSet<TopicPartition>,
    closed: bool,
}

impl MemoryConsumer {
    pub(crate) fn new(broker: MemoryBroker, config: MemoryConsumerConfig) -> Self {
        let member_id = format!("memory-consumer-{}", broker.lock().next_client_id());
        Self {
            broker,
            config,
            member_id,
            generation_id: None,
            positions: BTreeMap::new(),
            eof_reported: HashSet::new(),
            closed: false,
        }
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.positions.keys().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Native("Consumer has been closed".to_string()));
        }
        Ok(())
    }

    fn resolve_position(&self, state: &BrokerState, tp: &TopicPartition) -> i64 {
        if let Some(committed) = state.committed_offset(&self.config.group_id, tp) {
            return committed;
        }
        match self.config.auto_offset_reset {
            OffsetReset::Earliest => 0,
            OffsetReset::Latest => state.log(tp).map_or(0, |log| log.len() as i64),
        }
    }

    /// Read from one partition starting at `position`, returning the new
    /// position and whether the readable end was reached.
    fn read_partition(
        &self,
        state: &BrokerState,
        tp: &TopicPartition,
        mut position: i64,
        budget: &mut usize,
        events: &mut Vec<NativeEvent>,
    ) -> (i64, bool) {
        let Some(log) = state.log(tp) else {
            return (position, true);
        };
        while *budget > 0 {
            let Some(record) = log.get(position as usize) else {
                return (position, true);
            };
            match (record.state, self.config.isolation) {
                (RecordState::Pending(_), IsolationLevel::ReadCommitted) => {
                    // last stable offset
                    return (position, true);
                }
                (RecordState::Aborted, IsolationLevel::ReadCommitted) => {}
                _ => {
                    events.push(NativeEvent::Message(record.message.clone()));
                    *budget -= 1;
                }
            }
            position += 1;
        }
        (position, false)
    }
}

impl NativeHandle for MemoryConsumer {
    fn poll(&mut self, _timeout: Duration) -> Vec<NativeEvent> {
        if self.closed {
            return Vec::new();
        }
        let broker = self.broker.clone();
        let mut state = broker.lock();
        let mut events = Vec::new();
        let mut budget = self.config.max_poll_records;
        let mut auto_commit = OffsetCommit::new();

        let partitions: Vec<_> = self.positions.keys().cloned().collect();
        for tp in partitions {
            let start = match self.positions.get(&tp).copied().flatten() {
                Some(position) => position,
                None => self.resolve_position(&state, &tp),
            };
            let (position, at_end) =
                self.read_partition(&state, &tp, start, &mut budget, &mut events);

            if position != start {
                self.eof_reported.remove(&tp);
                auto_commit.insert(tp.topic.clone(), tp.partition, position);
            }
            if at_end && self.config.enable_partition_eof && self.eof_reported.insert(tp.clone()) {
                events.push(NativeEvent::PartitionEnd {
                    topic: tp.topic.clone(),
                    partition: tp.partition,
                    offset: position,
                });
            }
            self.positions.insert(tp, Some(position));
        }

        if self.config.enable_auto_commit && !auto_commit.is_empty() {
            state.commit_group_offsets(&self.config.group_id, &auto_commit);
        }
        if let Some(error) = state.take_fault(FaultPoint::ConsumerPoll) {
            events.push(NativeEvent::Error { error, fatal: true });
        }
        events
    }
}

impl NativeConsumer for MemoryConsumer {
    type GroupMetadata = GroupMetadata;

    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        self.ensure_open()?;
        let broker = self.broker.clone();
        let mut state = broker.lock();
        state.fail_if_injected(FaultPoint::Subscribe)?;

        let mut assignment = BTreeMap::new();
        for topic in topics {
            let count = state.ensure_topic(topic)?;
            for partition in 0..count as i32 {
                assignment.insert(TopicPartition::new(topic.as_str(), partition), None);
            }
        }
        self.generation_id = Some(state.join_group(&self.config.group_id));
        self.positions = assignment;
        self.eof_reported.clear();
        tracing::debug!(
            member = %self.member_id,
            generation = ?self.generation_id,
            partitions = self.positions.len(),
            "Joined group {}",
            self.config.group_id
        );
        Ok(())
    }

    fn assign(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        self.ensure_open()?;
        let state = self.broker.lock();
        for tp in partitions {
            let count = state.partition_count(&tp.topic).unwrap_or(0);
            if tp.partition < 0 || tp.partition as usize >= count {
                return Err(Error::broker(
                    "UnknownTopicOrPartition",
                    format!("Unknown partition {}/{}", tp.topic, tp.partition),
                ));
            }
        }
        self.generation_id = Some(-1);
        self.positions = partitions.iter().map(|tp| (tp.clone(), None)).collect();
        self.eof_reported.clear();
        Ok(())
    }

    fn commit_offsets(&mut self, offsets: &OffsetCommit, _mode: CommitMode) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        state.fail_if_injected(FaultPoint::CommitOffsets)?;
        if let Some(generation_id) = self.generation_id {
            state.check_generation(&self.config.group_id, generation_id)?;
        }
        state.commit_group_offsets(&self.config.group_id, offsets);
        Ok(())
    }

    fn group_metadata(&self) -> Option<GroupMetadata> {
        let generation_id = self.generation_id?;
        Some(GroupMetadata {
            group_id: self.config.group_id.clone(),
            generation_id,
            member_id: self.member_id.clone(),
        })
    }

    fn close(&mut self) {
        self.closed = true;
        self.positions.clear();
    }
}
