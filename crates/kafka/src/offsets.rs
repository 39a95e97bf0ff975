use kafka_bridge_types::{Error, OffsetCommit, Result};
use rdkafka::{Offset, TopicPartitionList};

use crate::error::map_kafka_error;

/// Build the partition list librdkafka expects for a commit.
pub(crate) fn to_partition_list(offsets: &OffsetCommit) -> Result<TopicPartitionList> {
    let mut list = TopicPartitionList::with_capacity(offsets.len());
    for (tp, offset) in offsets.iter() {
        if offset < 0 {
            return Err(Error::Configuration(format!(
                "Cannot commit negative offset {offset} for {}/{}",
                tp.topic, tp.partition
            )));
        }
        list.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset))
            .map_err(|e| map_kafka_error(&e))?;
    }
    Ok(list)
}
