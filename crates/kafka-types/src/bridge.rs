//! Single-producer, single-consumer channel between a poll loop and the
//! async task reading its output.
//!
//! The poll loop owns the [`BridgeSender`]; the caller owns the
//! [`BridgeReceiver`]. What happens when the reader falls behind is chosen up
//! front through [`ChannelBound`]:
//!
//! - [`ChannelBound::Unbounded`] never loses an item. Memory grows without
//!   limit if the receiver is held but never drained.
//! - [`OverflowPolicy::Block`] suspends the poll loop until the reader makes
//!   room, which in turn stops polling the native handle.
//! - [`OverflowPolicy::DropOldest`] discards the oldest buffered item. Drops
//!   are counted and logged.
//!
//! Dropping the receiver discards everything still buffered; later sends are
//! counted as unread and discarded. The sender's `close` (or drop) ends the
//! sequence once the buffer is drained.

use futures::stream::{BoxStream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// What a bounded channel does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the sender until the receiver makes room.
    Block,
    /// Discard the oldest buffered item to make room.
    DropOldest,
}

/// Capacity of a bridge channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelBound {
    Unbounded,
    Bounded {
        capacity: usize,
        overflow: OverflowPolicy,
    },
}

impl Default for ChannelBound {
    fn default() -> Self {
        Self::Unbounded
    }
}

impl ChannelBound {
    pub const fn blocking(capacity: usize) -> Self {
        Self::Bounded {
            capacity,
            overflow: OverflowPolicy::Block,
        }
    }

    pub const fn drop_oldest(capacity: usize) -> Self {
        Self::Bounded {
            capacity,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

struct State<T> {
    queue: VecDeque<T>,
    sender_closed: bool,
    receiver_closed: bool,
    dropped: u64,
    unread: u64,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    item_ready: Notify,
    space_ready: Notify,
    bound: ChannelBound,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push respecting the bound. Hands the item back when a blocking
    /// channel is full.
    fn try_push(&self, state: &mut State<T>, item: T, force: bool) -> Result<(), T> {
        if state.receiver_closed {
            state.unread += 1;
            tracing::trace!(unread = state.unread, "Bridge receiver gone; discarding item");
            return Ok(());
        }
        match self.bound {
            ChannelBound::Unbounded => {}
            ChannelBound::Bounded {
                capacity,
                overflow: OverflowPolicy::Block,
            } => {
                if !force && state.queue.len() >= capacity.max(1) {
                    return Err(item);
                }
            }
            ChannelBound::Bounded {
                capacity,
                overflow: OverflowPolicy::DropOldest,
            } => {
                while state.queue.len() >= capacity.max(1) {
                    state.queue.pop_front();
                    state.dropped += 1;
                    tracing::warn!(
                        dropped = state.dropped,
                        capacity,
                        "Bridge channel full; dropped oldest item"
                    );
                }
            }
        }
        state.queue.push_back(item);
        self.item_ready.notify_one();
        Ok(())
    }
}

/// Create a bridge channel with the given bound.
pub fn channel<T>(bound: ChannelBound) -> (BridgeSender<T>, BridgeReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::new(),
            sender_closed: false,
            receiver_closed: false,
            dropped: 0,
            unread: 0,
        }),
        item_ready: Notify::new(),
        space_ready: Notify::new(),
        bound,
    });
    (
        BridgeSender {
            shared: Arc::clone(&shared),
        },
        BridgeReceiver { shared },
    )
}

/// Sending half, owned by a poll loop.
pub struct BridgeSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BridgeSender<T> {
    /// Queue an item, waiting for room only under [`OverflowPolicy::Block`].
    pub async fn send(&self, item: T) {
        let mut item = item;
        loop {
            let space = self.shared.space_ready.notified();
            {
                let mut state = self.shared.lock();
                match self.shared.try_push(&mut state, item, false) {
                    Ok(()) => return,
                    Err(back) => item = back,
                }
            }
            space.await;
        }
    }

    /// Like [`send`](Self::send), but hands the item back if `stop` completes
    /// while waiting for room.
    pub async fn send_or_stop<F>(&self, item: T, stop: F) -> Result<(), T>
    where
        F: Future<Output = ()>,
    {
        let mut item = item;
        tokio::pin!(stop);
        loop {
            let space = self.shared.space_ready.notified();
            {
                let mut state = self.shared.lock();
                match self.shared.try_push(&mut state, item, false) {
                    Ok(()) => return Ok(()),
                    Err(back) => item = back,
                }
            }
            tokio::select! {
                _ = space => {}
                _ = &mut stop => return Err(item),
            }
        }
    }

    /// Queue an item ignoring a blocking bound. Used on shutdown paths where
    /// suspending would strand the item.
    pub fn force_send(&self, item: T) {
        let mut state = self.shared.lock();
        // force never hands the item back
        let _ = self.shared.try_push(&mut state, item, true);
    }

    /// End the sequence. The receiver still drains what is buffered.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        if !state.sender_closed {
            state.sender_closed = true;
            self.shared.item_ready.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().sender_closed
    }

    pub fn is_receiver_closed(&self) -> bool {
        self.shared.lock().receiver_closed
    }

    /// Items discarded because the receiver was dropped.
    pub fn unread(&self) -> u64 {
        self.shared.lock().unread
    }
}

impl<T> Drop for BridgeSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receiving half, handed to the caller.
pub struct BridgeReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BridgeReceiver<T> {
    /// Next item, or `None` once the sender closed and the buffer is empty.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let ready = self.shared.item_ready.notified();
            {
                let mut state = self.shared.lock();
                if let Some(item) = state.queue.pop_front() {
                    self.shared.space_ready.notify_one();
                    return Some(item);
                }
                if state.sender_closed {
                    return None;
                }
            }
            ready.await;
        }
    }

    /// Next buffered item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        let item = self.shared.lock().queue.pop_front();
        if item.is_some() {
            self.shared.space_ready.notify_one();
        }
        item
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items discarded under [`OverflowPolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }

    pub fn bound(&self) -> ChannelBound {
        self.shared.bound
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> BoxStream<'static, T>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed()
    }
}

impl<T> Drop for BridgeReceiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receiver_closed = true;
        let buffered = state.queue.len();
        state.queue.clear();
        if buffered > 0 {
            tracing::debug!(buffered, "Bridge receiver dropped with unread items");
        }
        self.shared.space_ready.notify_one();
    }
}
