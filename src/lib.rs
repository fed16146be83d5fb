#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

pub mod algebra;
pub mod config;
pub mod error;
pub mod he;
pub mod jiff;
pub mod net;
pub mod protocols;
pub mod schemes;

#[cfg(test)]
mod testing;

pub use config::{MpcConfig, ProtocolType};
pub use error::MpcError;
