//! Errors surfaced by protocol operations.
//!
//! Every failure is a distinct variant so callers can tell a retryable
//! condition (timeout, exhausted preprocessing) from evidence of cheating.

use std::time::Duration;

use thiserror::Error;

use crate::{
    algebra::RangeError,
    config::ConfigError,
    net::{Id, OperationId, Step, TransportError},
    schemes::spdz::preprocessing::{PreprocessingError, Resource},
};

#[derive(Error, Debug)]
pub enum MpcError {
    #[error("no preprocessing source is attached")]
    PreprocessingNotInitialized,
    #[error("preprocessing exhausted, no {0} left")]
    ExhaustedPreprocessing(Resource),
    #[error("preprocessing failed: {0}")]
    Preprocessing(PreprocessingError),
    #[error("MAC verification failed in operation {operation}")]
    MacVerification { operation: OperationId },
    #[error("operation {operation} timed out after {after:?}, missing messages from {missing:?}")]
    Timeout {
        operation: OperationId,
        after: Duration,
        missing: Vec<Id>,
    },
    #[error("{connected} parties connected, {required} required")]
    QuorumNotReady { connected: usize, required: usize },
    #[error("value out of range: {0}")]
    Range(#[from] RangeError),
    #[error("no party with id {0}")]
    UnknownParty(Id),
    #[error("party {0} is the owner of the input but provided no value")]
    MissingInput(Id),
    #[error("shares belong to a different protocol than this computation")]
    ProtocolMismatch,
    #[error("malformed {step:?} message from {sender} in operation {operation}")]
    MalformedMessage {
        operation: OperationId,
        sender: Id,
        step: Step,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<PreprocessingError> for MpcError {
    fn from(err: PreprocessingError) -> Self {
        match err {
            PreprocessingError::Exhausted(resource) => MpcError::ExhaustedPreprocessing(resource),
            err => MpcError::Preprocessing(err),
        }
    }
}
