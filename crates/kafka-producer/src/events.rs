//! Translation of native poll results into [`ProducerEvent`]s.

use futures::stream::{BoxStream, Stream, StreamExt};
use kafka_bridge_types::{
    DeliveryReport, MessageId, NativeEvent, ProducerEvent, Statistics,
};
use std::collections::HashSet;

/// The producer event sequence returned by `events()`.
pub type ProducerEvents = BoxStream<'static, ProducerEvent>;

/// Convert one poll's worth of native events into producer events.
///
/// Consecutive delivery callbacks are batched into one
/// [`ProducerEvent::DeliveryReports`]. Callbacks for ids that are not in
/// flight (already reported, or never sent by this client) are discarded.
pub(crate) fn translate(
    native: Vec<NativeEvent>,
    in_flight: &mut HashSet<MessageId>,
) -> Vec<ProducerEvent> {
    let mut events = Vec::new();
    let mut batch = Vec::new();

    for event in native {
        match event {
            NativeEvent::Delivery { id, result } => {
                if !in_flight.remove(&id) {
                    tracing::warn!("Discarding duplicate delivery callback for {id}");
                    continue;
                }
                batch.push(match result {
                    Ok(message) => DeliveryReport::acknowledged(id, message),
                    Err(error) => {
                        tracing::debug!("Delivery of {id} failed: {error}");
                        DeliveryReport::failed(id, error)
                    }
                });
                continue;
            }
            NativeEvent::Statistics(json) => {
                flush_batch(&mut batch, &mut events);
                events.push(ProducerEvent::Statistics(Statistics(json)));
            }
            NativeEvent::Error { error, fatal } => {
                flush_batch(&mut batch, &mut events);
                if fatal {
                    tracing::error!("Fatal producer error: {error}");
                } else {
                    tracing::warn!("Producer error: {error}");
                }
                events.push(ProducerEvent::Other(error.to_string()));
            }
            NativeEvent::Message(_) | NativeEvent::PartitionEnd { .. } => {
                tracing::trace!("Ignoring consumer event on a producer handle");
            }
        }
    }
    flush_batch(&mut batch, &mut events);
    events
}

fn flush_batch(batch: &mut Vec<DeliveryReport>, events: &mut Vec<ProducerEvent>) {
    if !batch.is_empty() {
        events.push(ProducerEvent::DeliveryReports(std::mem::take(batch)));
    }
}

/// Flatten an event stream into its individual delivery reports, skipping
/// statistics and other notifications.
pub fn flatten_reports<S>(events: S) -> impl Stream<Item = DeliveryReport>
where
    S: Stream<Item = ProducerEvent>,
{
    events.flat_map(|event| futures::stream::iter(event.into_reports()))
}
