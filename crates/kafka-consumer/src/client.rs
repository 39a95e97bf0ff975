use async_trait::async_trait;
use futures::stream::BoxStream;
use kafka_bridge_types::{
    channel, BridgeReceiver, BridgeSender, ClientOptions, CommitMode, ConsumedMessage,
    ConsumerState, Error, GroupMetadataSource, Message, NativeConsumer, NativeEvent,
    OffsetCommit, Result, TopicPartition,
};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The message sequence returned by `messages()`.
pub type ConsumerMessages = BoxStream<'static, ConsumedMessage>;

struct Inner<C> {
    native: Mutex<C>,
    state: StdMutex<ConsumerState>,
    options: ClientOptions,
    /// Cancelled by `close` so a running poll loop exits
    closing: CancellationToken,
    /// Held from poll to publish so `close` ends the sequence only after
    /// everything already polled is in the bridge
    publishing: Mutex<()>,
    messages_tx: BridgeSender<ConsumedMessage>,
    messages_rx: StdMutex<Option<BridgeReceiver<ConsumedMessage>>>,
}

impl<C> Inner<C> {
    fn state(&self) -> MutexGuard<'_, ConsumerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConsumerState) {
        let mut state = self.state();
        tracing::debug!("Consumer state {} -> {next}", *state);
        *state = next;
    }

    /// Fail with `ClientState` unless the consumer is `Consuming`.
    fn ensure_consuming(&self, operation: &'static str) -> Result<()> {
        let state = *self.state();
        if state != ConsumerState::Consuming {
            return Err(Error::ClientState { operation, state });
        }
        Ok(())
    }
}

/// Async consumer over a [`NativeConsumer`].
///
/// Lifecycle: `NotSubscribed → Subscribing → Consuming → ShuttingDown →
/// Closed`. Messages flow into the sequence returned by
/// [`messages`](Self::messages) while [`run`](Self::run) polls. Commits share
/// the handle with the poll loop and are serialized with it. Cloning shares
/// the same handle.
pub struct ConsumerClient<C: NativeConsumer> {
    inner: Arc<Inner<C>>,
}

impl<C: NativeConsumer> Clone for ConsumerClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: NativeConsumer> ConsumerClient<C> {
    pub fn new(native: C, options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let (messages_tx, messages_rx) = channel(options.channel_bound);
        Ok(Self {
            inner: Arc::new(Inner {
                native: Mutex::new(native),
                state: StdMutex::new(ConsumerState::NotSubscribed),
                options,
                closing: CancellationToken::new(),
                publishing: Mutex::new(()),
                messages_tx,
                messages_rx: StdMutex::new(Some(messages_rx)),
            }),
        })
    }

    pub fn state(&self) -> ConsumerState {
        *self.inner.state()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Join the consumer group for `topics`.
    pub async fn subscribe(&self, topics: &[&str]) -> Result<()> {
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        self.start("subscribe", move |native| native.subscribe(&topics)).await
    }

    /// Consume an explicit set of partitions without group management.
    pub async fn assign(&self, partitions: &[TopicPartition]) -> Result<()> {
        let partitions = partitions.to_vec();
        self.start("assign", move |native| native.assign(&partitions)).await
    }

    async fn start<F>(&self, operation: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&mut C) -> Result<()>,
    {
        {
            let mut state = self.inner.state();
            if *state != ConsumerState::NotSubscribed {
                return Err(Error::ClientState {
                    operation,
                    state: *state,
                });
            }
            *state = ConsumerState::Subscribing;
        }
        let result = {
            let mut native = self.inner.native.lock().await;
            f(&mut *native)
        };
        match result {
            Ok(()) => {
                self.inner.set_state(ConsumerState::Consuming);
                tracing::info!("Consumer started ({operation})");
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConsumerState::NotSubscribed);
                tracing::warn!("Consumer {operation} failed: {e}");
                Err(e)
            }
        }
    }

    /// Take the message sequence. Only the first call returns `Some`.
    pub fn messages(&self) -> Option<ConsumerMessages> {
        self.inner
            .messages_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(BridgeReceiver::into_stream)
    }

    /// Poll until `token` is cancelled or the consumer is closed, then close.
    ///
    /// Polls only while `Consuming`; before that the loop just waits. A fatal
    /// native error closes the consumer and is returned, after the messages
    /// polled ahead of it have been published.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        tracing::info!("Consumer poll loop started");
        let mut outcome = Ok(());
        loop {
            if token.is_cancelled() || self.inner.closing.is_cancelled() {
                break;
            }
            let (idle, stopped) = {
                let _publishing = self.inner.publishing.lock().await;
                let (items, fatal) = if self.state() == ConsumerState::Consuming {
                    self.poll_once().await
                } else {
                    (Vec::new(), None)
                };
                let idle = items.is_empty();
                let published = self.publish(items, &token).await;
                if let Some(e) = fatal {
                    outcome = Err(e);
                    break;
                }
                (idle, !published)
            };
            if stopped {
                break;
            }
            if idle {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.inner.closing.cancelled() => break,
                    _ = tokio::time::sleep(self.inner.options.poll_interval) => {}
                }
            }
        }
        tracing::info!("Consumer poll loop stopped");
        self.close().await?;
        outcome
    }

    /// Hand items to the bridge. Returns false if cancelled or closed while a
    /// blocking bound was full; the remaining items are then forced in.
    async fn publish(&self, items: Vec<ConsumedMessage>, token: &CancellationToken) -> bool {
        let closing = &self.inner.closing;
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            let stop = async {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = closing.cancelled() => {}
                }
            };
            if let Err(item) = self.inner.messages_tx.send_or_stop(item, stop).await {
                self.inner.messages_tx.force_send(item);
                items.for_each(|item| self.inner.messages_tx.force_send(item));
                return false;
            }
        }
        true
    }

    /// One zero-timeout poll. Items polled before a fatal error are kept and
    /// returned alongside it; the rest of the batch is dropped.
    async fn poll_once(&self) -> (Vec<ConsumedMessage>, Option<Error>) {
        let events = self.inner.native.lock().await.poll(Duration::ZERO);
        let mut items = Vec::with_capacity(events.len());
        let mut fatal = None;
        for event in events {
            match event {
                NativeEvent::Message(message) => items.push(ConsumedMessage::Data(message)),
                NativeEvent::PartitionEnd {
                    topic,
                    partition,
                    offset,
                } => {
                    tracing::debug!("Reached end of {topic}/{partition} at offset {offset}");
                    items.push(ConsumedMessage::PartitionEnd {
                        topic,
                        partition,
                        offset,
                    });
                }
                NativeEvent::Error { error, fatal: true } => {
                    tracing::error!("Fatal consumer error: {error}");
                    fatal = Some(error);
                    break;
                }
                NativeEvent::Error { error, .. } => {
                    tracing::warn!("Consumer error: {error}");
                }
                NativeEvent::Statistics(json) => {
                    tracing::trace!(len = json.len(), "Consumer statistics");
                }
                NativeEvent::Delivery { id, .. } => {
                    tracing::trace!("Ignoring delivery callback for {id} on a consumer handle");
                }
            }
        }
        if !items.is_empty() {
            tracing::debug!(items = items.len(), "Polled consumer");
        }
        (items, fatal)
    }

    /// Commit `message.offset + 1` for the message's partition and wait for
    /// the coordinator. A rejected commit is returned, never retried.
    pub async fn commit_sync(&self, message: &Message) -> Result<()> {
        self.inner.ensure_consuming("commit")?;
        let offsets = OffsetCommit::after(message)?;
        self.commit_offsets_sync(&offsets).await
    }

    /// Commit an explicit offset record and wait for the coordinator.
    pub async fn commit_offsets_sync(&self, offsets: &OffsetCommit) -> Result<()> {
        self.inner.ensure_consuming("commit")?;
        if offsets.is_empty() {
            return Ok(());
        }
        let offsets = offsets.clone();
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut native = inner.native.blocking_lock();
            native.commit_offsets(&offsets, CommitMode::Sync)?;
            tracing::debug!(partitions = offsets.len(), "Committed offsets");
            Ok(())
        })
        .await?
    }

    /// Enqueue a commit of `message.offset + 1` without waiting for the
    /// coordinator.
    pub async fn commit_async(&self, message: &Message) -> Result<()> {
        self.inner.ensure_consuming("commit")?;
        let offsets = OffsetCommit::after(message)?;
        self.inner
            .native
            .lock()
            .await
            .commit_offsets(&offsets, CommitMode::Async)
    }

    /// Leave the group, close the native handle and end the message
    /// sequence. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if matches!(*state, ConsumerState::ShuttingDown | ConsumerState::Closed) {
                return Ok(());
            }
            *state = ConsumerState::ShuttingDown;
        }
        self.inner.closing.cancel();
        let _publishing = self.inner.publishing.lock().await;

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            inner.native.blocking_lock().close();
        })
        .await?;

        self.inner.set_state(ConsumerState::Closed);
        self.inner.messages_tx.close();
        tracing::info!("Consumer closed");
        Ok(())
    }
}

#[async_trait]
impl<C: NativeConsumer> GroupMetadataSource for ConsumerClient<C> {
    type GroupMetadata = C::GroupMetadata;

    async fn group_metadata(&self) -> Result<C::GroupMetadata> {
        let state = self.state();
        self.inner
            .native
            .lock()
            .await
            .group_metadata()
            .ok_or(Error::ClientState {
                operation: "read group metadata",
                state,
            })
    }
}
