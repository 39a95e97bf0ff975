//! Run/cancel contract for the client poll loops.
//!
//! Every client exposes a poll loop that runs until a cancellation token
//! fires. [`Service`] is that contract as a trait, and [`Supervisor`] runs a
//! set of services on tokio tasks under one shared token.

use anyhow::Context;
use async_trait::async_trait;
use kafka_bridge_consumer::ConsumerClient;
use kafka_bridge_producer::{ProducerClient, TransactionalProducer};
use kafka_bridge_types::{NativeConsumer, NativeProducer};
use std::future::Future;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A long-running poll loop.
///
/// `run` must return within one poll interval of `token` being cancelled and
/// leave the service shut down when it returns.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn run(&self, token: CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
impl<P: NativeProducer> Service for ProducerClient<P> {
    async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        ProducerClient::run(self, token)
            .await
            .context("Producer poll loop failed")
    }
}

#[async_trait]
impl<P: NativeProducer> Service for TransactionalProducer<P> {
    async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        TransactionalProducer::run(self, token)
            .await
            .context("Transactional producer poll loop failed")
    }
}

#[async_trait]
impl<C: NativeConsumer> Service for ConsumerClient<C> {
    async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        ConsumerClient::run(self, token)
            .await
            .context("Consumer poll loop failed")
    }
}

/// Runs services on tokio tasks sharing one cancellation token.
///
/// ```ignore
/// let mut supervisor = Supervisor::new();
/// supervisor.spawn("orders-producer", producer.clone());
/// supervisor.spawn("billing-consumer", consumer.clone());
/// supervisor.run_until(tokio::signal::ctrl_c()).await?;
/// ```
pub struct Supervisor {
    token: CancellationToken,
    tasks: JoinSet<(String, anyhow::Result<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Supervise under a child of `parent`: cancelling `parent` stops these
    /// services, shutting them down leaves `parent` untouched.
    pub fn with_token(parent: CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            tasks: JoinSet::new(),
        }
    }

    /// The token handed to every service.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start `service` on its own task. Must be called within a tokio runtime.
    pub fn spawn<S: Service>(&mut self, name: impl Into<String>, service: S) {
        let name = name.into();
        let token = self.token.clone();
        info!("Starting service {name}");
        self.tasks.spawn(async move {
            let result = service.run(token).await;
            (name, result)
        });
    }

    /// Run until `signal` completes, the token is cancelled, or a service
    /// fails; then shut everything down. A service failure is returned ahead
    /// of any failure seen during shutdown.
    pub async fn run_until<F>(mut self, signal: F) -> anyhow::Result<()>
    where
        F: Future,
    {
        tokio::pin!(signal);
        let token = self.token.clone();
        let mut first_error = None;
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested");
                    break;
                }
                _ = token.cancelled() => break,
                joined = self.tasks.join_next() => match joined {
                    None => {
                        debug!("All services exited");
                        break;
                    }
                    Some(joined) => {
                        if let Err(e) = outcome(joined) {
                            error!("{e:#}");
                            first_error = Some(e);
                            break;
                        }
                    }
                },
            }
        }
        let shutdown = self.shutdown().await;
        match first_error {
            Some(e) => Err(e),
            None => shutdown,
        }
    }

    /// Cancel every service and wait for all of them to return. Returns the
    /// first failure; the others are logged.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.token.cancel();
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = outcome(joined) {
                if first_error.is_some() {
                    error!("{e:#}");
                } else {
                    first_error = Some(e);
                }
            }
        }
        info!("All services stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn outcome(joined: Result<(String, anyhow::Result<()>), JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok((name, Ok(()))) => {
            info!("Service {name} stopped");
            Ok(())
        }
        Ok((name, Err(e))) => Err(e.context(format!("Service {name} failed"))),
        Err(e) => Err(anyhow::Error::new(e).context("Service task panicked or was aborted")),
    }
}
