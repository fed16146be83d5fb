//! Party-to-party messaging.
//!
//! Protocol code only sees the [`Transport`] trait: addressed, correlated
//! [`Message`]s going out and coming in. [`network::Network`] implements it
//! over length-delimited frames, either in memory or on TCP.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{algebra::Word, net::connection::ConnectionError};

pub mod connection;
pub mod mailbox;
pub mod network;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Id(pub usize);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Correlates every message belonging to one protocol operation.
///
/// Parties derive ids from the order operations are started in, so the
/// same program yields the same ids at every party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new(kind: &str, counter: u64) -> Self {
        OperationId(format!("{kind}-{counter}"))
    }

    /// Id of a sub-operation, e.g. one multiplication inside a comparison.
    pub fn child(&self, name: impl fmt::Display) -> Self {
        OperationId(format!("{}/{name}", self.0))
    }

    /// The top-level operation this id belongs to.
    pub fn root(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Receiver {
    Broadcast,
    Party(Id),
}

impl Receiver {
    /// Numeric form, `-1` for broadcast.
    pub fn as_raw(&self) -> i64 {
        match self {
            Receiver::Broadcast => -1,
            Receiver::Party(id) => id.0 as i64,
        }
    }
}

/// Message contents, one variant per protocol round.
///
/// Ring elements travel as canonical [`Word`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Input owner's public correction `x - r`.
    Share { correction: Word },
    /// Beaver masks `d = x - a` and `e = y - b`.
    MultiplyMask { d: Word, e: Word },
    /// Masked comparison operand.
    ComparisonBit { masked: Word },
    /// Share of a value being reconstructed.
    ReconstructReveal { value: Word },
    /// Commitment to MAC check values.
    MacCommit { digest: [u8; 32] },
    /// Opening of a [`Payload::MacCommit`].
    MacOpen { values: Vec<Word>, salt: [u8; 32] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    Share,
    MultiplyMask,
    ComparisonBit,
    ReconstructReveal,
    MacCommit,
    MacOpen,
}

impl Payload {
    pub fn step(&self) -> Step {
        match self {
            Payload::Share { .. } => Step::Share,
            Payload::MultiplyMask { .. } => Step::MultiplyMask,
            Payload::ComparisonBit { .. } => Step::ComparisonBit,
            Payload::ReconstructReveal { .. } => Step::ReconstructReveal,
            Payload::MacCommit { .. } => Step::MacCommit,
            Payload::MacOpen { .. } => Step::MacOpen,
        }
    }

    /// The ring elements carried by an opening round, `None` for the MAC
    /// check rounds.
    pub fn words(&self) -> Option<Vec<Word>> {
        match self {
            Payload::Share { correction } => Some(vec![*correction]),
            Payload::MultiplyMask { d, e } => Some(vec![*d, *e]),
            Payload::ComparisonBit { masked } => Some(vec![*masked]),
            Payload::ReconstructReveal { value } => Some(vec![*value]),
            Payload::MacCommit { .. } | Payload::MacOpen { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Id,
    pub receiver: Receiver,
    pub operation: OperationId,
    pub payload: Payload,
}

impl Message {
    pub fn broadcast(sender: Id, operation: OperationId, payload: Payload) -> Self {
        Self {
            sender,
            receiver: Receiver::Broadcast,
            operation,
            payload,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with {id}: {source}")]
    Connection { id: Id, source: ConnectionError },
    #[error("no party with id {0} in the network")]
    UnknownParty(Id),
    #[error("a party cannot send messages to itself")]
    SelfAddressed,
    #[error("transport closed")]
    Closed,
}

/// Delivery of protocol messages between parties.
///
/// A broadcast reaches every other party exactly once. Messages from one
/// sender may be delivered in any order relative to other senders.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Our own id.
    fn id(&self) -> Id;

    /// Size of the network, ourselves included.
    fn parties(&self) -> usize;

    /// Parties currently reachable, ourselves included.
    fn connected(&self) -> usize;

    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Next incoming message. `TransportError::Closed` once every peer is gone.
    async fn recv(&self) -> Result<Message, TransportError>;
}
