//! Lifecycle states for the consumer client and the transactional producer.

use std::fmt;

/// Transaction state of a transactional producer.
///
/// ```text
/// Idle -> Active -> Committing -> Idle
///                \-> Aborting  -> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionState {
    /// No transaction is open.
    #[default]
    Idle,
    /// A transaction was begun and its body is running.
    Active,
    /// The body succeeded and the commit round trip is in progress.
    Committing,
    /// The body (or the commit) failed and the abort round trip is in progress.
    Aborting,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a consumer client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConsumerState {
    #[default]
    NotSubscribed,
    Subscribing,
    Consuming,
    ShuttingDown,
    Closed,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotSubscribed => "not-subscribed",
            Self::Subscribing => "subscribing",
            Self::Consuming => "consuming",
            Self::ShuttingDown => "shutting-down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
