//! Transactional producer: a [`ProducerClient`] plus the Idle → Active →
//! Committing/Aborting → Idle state machine.

use kafka_bridge_types::{
    ClientOptions, Error, GroupMetadataSource, Message, MessageId, NativeProducer, OffsetCommit,
    Result, TransactionState,
};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::ProducerClient;
use crate::events::ProducerEvents;

/// Failure of [`TransactionalProducer::with_transaction`].
#[derive(Error, Debug)]
pub enum TransactionError<E> {
    /// The body failed and the transaction was aborted.
    #[error("Transaction body failed: {0}")]
    Body(E),

    /// The body failed and so did the abort. The producer should be treated
    /// as unusable.
    #[error("Transaction body failed: {body}; abort also failed: {abort}")]
    Inconsistent { body: E, abort: Error },

    /// Begin or commit failed. A failed commit has already been aborted; if
    /// that abort failed too this is [`Error::InconsistentState`].
    #[error(transparent)]
    Client(#[from] Error),
}

type SharedState = Arc<StdMutex<TransactionState>>;

fn lock(state: &StdMutex<TransactionState>) -> MutexGuard<'_, TransactionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set(state: &StdMutex<TransactionState>, next: TransactionState) {
    let mut current = lock(state);
    tracing::trace!("Transaction state {} -> {next}", *current);
    *current = next;
}

/// Producer whose sends happen inside atomic transactions.
pub struct TransactionalProducer<P: NativeProducer> {
    client: ProducerClient<P>,
    state: SharedState,
}

impl<P: NativeProducer> Clone for TransactionalProducer<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<P: NativeProducer> TransactionalProducer<P> {
    /// Wrap a native handle configured with a transactional id and register
    /// it with the transaction coordinator.
    pub async fn new(native: P, options: ClientOptions) -> Result<Self> {
        let client = ProducerClient::new(native, options)?;
        let timeout = client.options().operation_timeout;
        client
            .blocking(move |native| native.init_transactions(timeout))
            .await?;
        tracing::info!("Transactional producer initialized");
        Ok(Self {
            client,
            state: Arc::new(StdMutex::new(TransactionState::Idle)),
        })
    }

    pub fn state(&self) -> TransactionState {
        *lock(&self.state)
    }

    pub fn client(&self) -> &ProducerClient<P> {
        &self.client
    }

    pub fn events(&self) -> Option<ProducerEvents> {
        self.client.events()
    }

    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        self.client.run(token).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.client.shutdown().await
    }

    /// Run `body` inside a transaction.
    ///
    /// Commits when the body succeeds and aborts when it fails. A commit
    /// failure is followed by an abort and the commit error is returned.
    /// Dropping the returned future while the body runs aborts the
    /// transaction on the blocking pool.
    pub async fn with_transaction<F, Fut, T, E>(
        &self,
        body: F,
    ) -> std::result::Result<T, TransactionError<E>>
    where
        F: FnOnce(Transaction<P>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        {
            let mut state = lock(&self.state);
            if *state != TransactionState::Idle {
                return Err(Error::TransactionState {
                    expected: TransactionState::Idle,
                    actual: *state,
                }
                .into());
            }
            *state = TransactionState::Active;
        }
        let scope = Arc::new(StdMutex::new(Scope::default()));
        let mut guard = AbortOnDrop {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
            scope: Arc::clone(&scope),
            armed: true,
        };

        if let Err(e) = self
            .client
            .blocking(|native| native.begin_transaction())
            .await
        {
            guard.armed = false;
            set(&self.state, TransactionState::Idle);
            return Err(e.into());
        }
        tracing::debug!("Transaction started");

        let txn = Transaction {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
            scope: Arc::clone(&scope),
        };
        let outcome = body(txn).await;

        let summary = {
            let mut scope = scope.lock().unwrap_or_else(PoisonError::into_inner);
            scope.closed = true;
            (scope.sends.len(), scope.offsets.len())
        };
        // completion runs on the blocking pool and resets the state itself
        guard.armed = false;

        match outcome {
            Ok(value) => {
                self.complete(true).await?;
                tracing::debug!(
                    sends = summary.0,
                    offsets = summary.1,
                    "Transaction committed"
                );
                Ok(value)
            }
            Err(body) => match self.complete(false).await {
                Ok(()) => {
                    tracing::debug!("Transaction aborted after body failure: {body}");
                    Err(TransactionError::Body(body))
                }
                Err(abort) => {
                    tracing::error!(
                        "Abort failed after transaction body failure ({body}): {abort}"
                    );
                    Err(TransactionError::Inconsistent { body, abort })
                }
            },
        }
    }

    async fn complete(&self, commit: bool) -> Result<()> {
        let state = Arc::clone(&self.state);
        let timeout = self.client.options().operation_timeout;
        let result = self
            .client
            .blocking(move |native| complete_blocking(native, &state, commit, timeout))
            .await;
        if let Err(Error::TaskJoin(_) | Error::Cancelled) = &result {
            set(&self.state, TransactionState::Idle);
        }
        result
    }
}

fn complete_blocking<P: NativeProducer>(
    native: &mut P,
    state: &StdMutex<TransactionState>,
    commit: bool,
    timeout: Duration,
) -> Result<()> {
    if commit {
        set(state, TransactionState::Committing);
        let cause = match native.commit_transaction(timeout) {
            Ok(()) => {
                set(state, TransactionState::Idle);
                return Ok(());
            }
            Err(cause) => cause,
        };
        tracing::warn!("Transaction commit failed, aborting: {cause}");
        set(state, TransactionState::Aborting);
        let result = match native.abort_transaction(timeout) {
            Ok(()) => Err(cause),
            Err(abort) => {
                tracing::error!("Abort after failed commit failed: {abort}");
                Err(Error::inconsistent(cause, abort))
            }
        };
        set(state, TransactionState::Idle);
        return result;
    }

    set(state, TransactionState::Aborting);
    let result = native.abort_transaction(timeout);
    set(state, TransactionState::Idle);
    result
}

/// Aborts the open transaction if `with_transaction` is dropped mid-body.
struct AbortOnDrop<P: NativeProducer> {
    client: ProducerClient<P>,
    state: SharedState,
    scope: Arc<StdMutex<Scope>>,
    armed: bool,
}

impl<P: NativeProducer> Drop for AbortOnDrop<P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // escaped handles must not reach the aborted transaction
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        {
            let mut state = lock(&self.state);
            if *state != TransactionState::Active {
                return;
            }
            *state = TransactionState::Aborting;
        }
        tracing::warn!("Transaction dropped while active; aborting");

        let inner = Arc::clone(&self.client.inner);
        let state = Arc::clone(&self.state);
        let timeout = inner.options.operation_timeout;
        let abort = move || {
            let mut handle = inner.handle.blocking_lock();
            if let Err(e) = handle.native.abort_transaction(timeout) {
                tracing::error!("Abort of dropped transaction failed: {e}");
            }
            set(&state, TransactionState::Idle);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(abort);
            }
            Err(_) => abort(),
        }
    }
}

#[derive(Default)]
struct Scope {
    closed: bool,
    sends: Vec<MessageId>,
    offsets: OffsetCommit,
}

/// Handle to the transaction opened by one
/// [`with_transaction`](TransactionalProducer::with_transaction) call.
///
/// Clones share the same transaction. Every operation fails with
/// [`Error::TransactionState`] once the call has returned.
pub struct Transaction<P: NativeProducer> {
    client: ProducerClient<P>,
    state: SharedState,
    scope: Arc<StdMutex<Scope>>,
}

impl<P: NativeProducer> Clone for Transaction<P> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            state: Arc::clone(&self.state),
            scope: Arc::clone(&self.scope),
        }
    }
}

impl<P: NativeProducer> Transaction<P> {
    fn scope(&self) -> MutexGuard<'_, Scope> {
        self.scope.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.scope().closed {
            return Err(Error::TransactionState {
                expected: TransactionState::Active,
                actual: *lock(&self.state),
            });
        }
        Ok(())
    }

    /// Send a message as part of this transaction.
    pub async fn send(&self, message: Message) -> Result<MessageId> {
        self.ensure_open()?;
        let id = self.client.send(message).await?;
        self.scope().sends.push(id);
        Ok(id)
    }

    /// Commit `offsets` for `consumer`'s group together with this
    /// transaction.
    pub async fn send_offsets<C>(&self, offsets: &OffsetCommit, consumer: &C) -> Result<()>
    where
        C: GroupMetadataSource<GroupMetadata = P::GroupMetadata>,
    {
        self.ensure_open()?;
        let group = consumer.group_metadata().await?;
        let timeout = self.client.options().operation_timeout;
        let staged = offsets.clone();
        self.client
            .blocking(move |native| native.send_offsets_to_transaction(&staged, &group, timeout))
            .await?;

        let mut scope = self.scope();
        for (tp, offset) in offsets.iter() {
            scope.offsets.insert(tp.topic.clone(), tp.partition, offset);
        }
        Ok(())
    }

    /// Ids of the messages sent in this transaction so far.
    pub fn sends(&self) -> Vec<MessageId> {
        self.scope().sends.clone()
    }

    /// Offsets attached to this transaction so far.
    pub fn offsets(&self) -> OffsetCommit {
        self.scope().offsets.clone()
    }
}
