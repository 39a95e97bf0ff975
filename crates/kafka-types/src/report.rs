//! Delivery correlation values and producer events.

use std::fmt;

use crate::error::Error;
use crate::message::Message;

/// Identifier minted for every message accepted by a producer client.
///
/// Ids are unique for the lifetime of one producer client and increase in
/// the order `send` accepted the messages. They are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Outcome of one produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Stored by the broker; the message carries its partition and offset.
    Acknowledged(Message),
    /// Definitively not stored.
    Failed(Error),
}

/// Acknowledgement of a produced message, matched to its send by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub id: MessageId,
    pub status: DeliveryStatus,
}

impl DeliveryReport {
    pub fn acknowledged(id: MessageId, message: Message) -> Self {
        Self {
            id,
            status: DeliveryStatus::Acknowledged(message),
        }
    }

    pub fn failed(id: MessageId, error: Error) -> Self {
        Self {
            id,
            status: DeliveryStatus::Failed(error),
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self.status, DeliveryStatus::Acknowledged(_))
    }
}

/// Opaque statistics snapshot emitted by the native client (raw JSON).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statistics(pub String);

/// An item of the producer event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    /// One or more delivery reports. Batch boundaries carry no meaning.
    DeliveryReports(Vec<DeliveryReport>),
    Statistics(Statistics),
    /// Any other native client notification, described as text.
    Other(String),
}

impl ProducerEvent {
    /// The delivery reports carried by this event, empty for other variants.
    pub fn into_reports(self) -> Vec<DeliveryReport> {
        match self {
            Self::DeliveryReports(reports) => reports,
            Self::Statistics(_) | Self::Other(_) => Vec::new(),
        }
    }
}
