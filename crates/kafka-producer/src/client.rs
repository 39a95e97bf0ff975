//! Producer client: owns a native producer handle and bridges its delivery
//! callbacks into an async event sequence.

use kafka_bridge_types::{
    channel, BridgeReceiver, BridgeSender, ClientOptions, DeliveryReport, Error, Message,
    MessageId, MessageIdRegistry, NativeProducer, ProducerEvent, Result,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{translate, ProducerEvents};

/// Native handle plus the bookkeeping that must change atomically with it.
pub(crate) struct Handle<P> {
    pub(crate) native: P,
    pub(crate) in_flight: HashSet<MessageId>,
    pub(crate) closed: bool,
}

pub(crate) struct Inner<P> {
    pub(crate) handle: Mutex<Handle<P>>,
    registry: MessageIdRegistry,
    pub(crate) options: ClientOptions,
    /// Cancelled by `shutdown` so a poll loop blocked on a full bridge lets go
    closing: CancellationToken,
    /// Held from poll to publish; reports taken off `in_flight` are in the
    /// bridge by the time it is released
    publishing: Mutex<()>,
    events_tx: BridgeSender<ProducerEvent>,
    events_rx: StdMutex<Option<BridgeReceiver<ProducerEvent>>>,
}

/// Async producer over a [`NativeProducer`].
///
/// `send` is safe to call from many tasks at once. Delivery reports surface
/// only while [`run`](Self::run) is polling the handle, and are read through
/// [`events`](Self::events). Cloning shares the same handle.
pub struct ProducerClient<P: NativeProducer> {
    pub(crate) inner: Arc<Inner<P>>,
}

impl<P: NativeProducer> Clone for ProducerClient<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: NativeProducer> ProducerClient<P> {
    pub fn new(native: P, options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let (events_tx, events_rx) = channel(options.channel_bound);
        Ok(Self {
            inner: Arc::new(Inner {
                handle: Mutex::new(Handle {
                    native,
                    in_flight: HashSet::new(),
                    closed: false,
                }),
                registry: MessageIdRegistry::new(),
                options,
                closing: CancellationToken::new(),
                publishing: Mutex::new(()),
                events_tx,
                events_rx: StdMutex::new(Some(events_rx)),
            }),
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Validate and enqueue a message, returning the id its delivery report
    /// will carry. Does not wait for the broker.
    pub async fn send(&self, message: Message) -> Result<MessageId> {
        message.validate_for_send()?;
        let mut handle = self.inner.handle.lock().await;
        if handle.closed {
            return Err(Error::Native("Producer client has been shut down".to_string()));
        }
        let id = self.inner.registry.next_id();
        handle.native.produce(id, &message)?;
        handle.in_flight.insert(id);
        tracing::trace!("Enqueued {id} for topic '{}'", message.topic);
        Ok(id)
    }

    /// [`send`](Self::send), retrying [`Error::QueueFull`] once per poll
    /// interval until `max_wait` has elapsed.
    pub async fn send_with_backoff(
        &self,
        message: Message,
        max_wait: Duration,
    ) -> Result<MessageId> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.send(message.clone()).await {
                Err(Error::QueueFull) if Instant::now() < deadline => {
                    tracing::debug!("Producer queue full; retrying send");
                    tokio::time::sleep(self.inner.options.poll_interval).await;
                }
                other => return other,
            }
        }
    }

    /// Wait for the native outbound queue to drain. Delivery reports for the
    /// flushed messages surface on the next poll.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        self.blocking(move |native| native.flush(timeout)).await
    }

    /// Number of sends whose delivery report has not been emitted yet.
    pub async fn in_flight(&self) -> usize {
        self.inner.handle.lock().await.in_flight.len()
    }

    /// Take the event sequence. Only the first call returns `Some`.
    pub fn events(&self) -> Option<ProducerEvents> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(BridgeReceiver::into_stream)
    }

    /// Poll the native handle until `token` is cancelled, then shut down.
    ///
    /// Sleeps one poll interval after every poll that produced nothing, so
    /// cancellation is observed within one interval.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        tracing::info!("Producer poll loop started");
        while !token.is_cancelled() && !self.inner.closing.is_cancelled() {
            let idle = {
                let _publishing = self.inner.publishing.lock().await;
                let events = self.poll_once().await;
                let idle = events.is_empty();
                if !self.publish(events, &token).await {
                    break;
                }
                idle
            };
            if idle {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.inner.closing.cancelled() => break,
                    _ = tokio::time::sleep(self.inner.options.poll_interval) => {}
                }
            }
        }
        tracing::info!("Producer poll loop cancelled");
        self.shutdown().await
    }

    /// Flush, surface the final delivery callbacks, report whatever is still
    /// unacknowledged as [`Error::Undelivered`] and end the event sequence.
    /// Later calls are no-ops; later sends fail.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.closing.cancel();
        // a running loop finishes publishing what it already took
        let _publishing = self.inner.publishing.lock().await;
        let timeout = self.inner.options.shutdown_timeout;
        let events = self
            .blocking_handle(move |handle| {
                if handle.closed {
                    return Ok(None);
                }
                handle.closed = true;
                if let Err(e) = handle.native.flush(timeout) {
                    tracing::warn!("Flush on shutdown failed: {e}");
                }
                let native = handle.native.poll(Duration::ZERO);
                let mut events = translate(native, &mut handle.in_flight);

                let mut leftovers: Vec<_> = handle.in_flight.drain().collect();
                leftovers.sort();
                if !leftovers.is_empty() {
                    tracing::warn!(
                        "{} messages were not acknowledged before shutdown",
                        leftovers.len()
                    );
                    events.push(ProducerEvent::DeliveryReports(
                        leftovers
                            .into_iter()
                            .map(|id| DeliveryReport::failed(id, Error::Undelivered))
                            .collect(),
                    ));
                }
                Ok(Some(events))
            })
            .await?;

        if let Some(events) = events {
            for event in events {
                self.inner.events_tx.force_send(event);
            }
            self.inner.events_tx.close();
            tracing::info!(
                issued = self.inner.registry.issued(),
                "Producer client shut down"
            );
        }
        Ok(())
    }

    /// One zero-timeout poll under the handle lock.
    pub(crate) async fn poll_once(&self) -> Vec<ProducerEvent> {
        let mut handle = self.inner.handle.lock().await;
        if handle.closed {
            return Vec::new();
        }
        let native = handle.native.poll(Duration::ZERO);
        if native.is_empty() {
            return Vec::new();
        }
        let events = translate(native, &mut handle.in_flight);
        tracing::debug!(events = events.len(), "Polled producer");
        events
    }

    /// Hand events to the bridge. Returns false if cancelled or shut down
    /// while a blocking bound was full; the remaining events are then forced
    /// in so no report is lost.
    async fn publish(&self, events: Vec<ProducerEvent>, token: &CancellationToken) -> bool {
        let closing = &self.inner.closing;
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            let stop = async {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = closing.cancelled() => {}
                }
            };
            if let Err(event) = self.inner.events_tx.send_or_stop(event, stop).await {
                self.inner.events_tx.force_send(event);
                events.for_each(|event| self.inner.events_tx.force_send(event));
                return false;
            }
        }
        true
    }

    /// Run a broker round trip on the blocking pool while holding the handle.
    pub(crate) async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut P) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.blocking_handle(move |handle| f(&mut handle.native)).await
    }

    async fn blocking_handle<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Handle<P>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut handle = inner.handle.blocking_lock();
            f(&mut handle)
        })
        .await?
    }
}
