//! Async producer clients over a synchronous, poll-driven native handle.
//!
//! - [`ProducerClient`] submits messages, minting a [`MessageId`] per send,
//!   and republishes the handle's delivery callbacks as an event stream
//!   (`events()`) while its poll loop (`run`) is active. Every accepted send
//!   yields exactly one [`DeliveryReport`] carrying its id, including sends
//!   still unacknowledged at shutdown.
//! - [`TransactionalProducer`] adds `with_transaction`, which commits the
//!   body's sends and consumer offsets atomically or aborts them all.
//!
//! ```ignore
//! let producer = ProducerClient::new(native, ClientOptions::default())?;
//! let events = producer.events().expect("first call");
//! tokio::spawn({
//!     let producer = producer.clone();
//!     async move { producer.run(token).await }
//! });
//! let id = producer.send(Message::new("orders", payload)).await?;
//! ```
//!
//! [`MessageId`]: kafka_bridge_types::MessageId
//! [`DeliveryReport`]: kafka_bridge_types::DeliveryReport

mod client;
mod events;
mod transaction;

pub use client::ProducerClient;
pub use events::{flatten_reports, ProducerEvents};
pub use transaction::{Transaction, TransactionError, TransactionalProducer};
