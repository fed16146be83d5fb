//! Computation configuration.
//!
//! A configuration is fixed for the lifetime of a computation. Starting a
//! new session means building a new configuration and new preprocessing.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    #[serde(rename = "SPDZ2k", alias = "spdz2k")]
    Spdz2k,
    #[serde(rename = "MASCOT", alias = "mascot")]
    Mascot,
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolType::Spdz2k => write!(f, "SPDZ2k"),
            ProtocolType::Mascot => write!(f, "MASCOT"),
        }
    }
}

/// Size of the MASCOT field in bits, `p = 2^127 - 1`.
pub const MASCOT_FIELD_BITS: u32 = 127;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MpcConfig {
    pub num_parties: usize,
    /// Reported in open metadata. Additive sharing needs every party,
    /// so it cannot exceed `num_parties`.
    pub threshold: usize,
    /// `k` for SPDZ2k, and the width of comparison operands for both protocols.
    pub bit_length: u32,
    /// Bit size of the MASCOT prime.
    pub field_size: u32,
    pub preprocessing_batch_size: usize,
    #[serde(with = "millis")]
    pub message_timeout: Duration,
    pub protocol: ProtocolType,
    /// Shared name of the computation, attached to opened values.
    pub computation_id: Option<String>,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            num_parties: 3,
            threshold: 3,
            bit_length: 64,
            field_size: MASCOT_FIELD_BITS,
            preprocessing_batch_size: 100,
            message_timeout: Duration::from_secs(5),
            protocol: ProtocolType::Spdz2k,
            computation_id: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("at least two parties are required, got {0}")]
    TooFewParties(usize),
    #[error("threshold {threshold} must be between 1 and {parties}")]
    Threshold { threshold: usize, parties: usize },
    #[error("bit length {0} must be between 2 and 64")]
    BitLength(u32),
    #[error("MASCOT only supports a 127-bit field, got {0}")]
    FieldSize(u32),
    #[error("preprocessing batch size must be positive")]
    BatchSize,
    #[error("message timeout must be positive")]
    Timeout,
    #[error("transport has {actual} parties, configuration expects {expected}")]
    PartyCount { expected: usize, actual: usize },
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl MpcConfig {
    pub fn spdz2k(num_parties: usize) -> Self {
        Self {
            num_parties,
            threshold: num_parties,
            protocol: ProtocolType::Spdz2k,
            ..Self::default()
        }
    }

    pub fn mascot(num_parties: usize) -> Self {
        Self {
            num_parties,
            threshold: num_parties,
            protocol: ProtocolType::Mascot,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bit_length(mut self, bit_length: u32) -> Self {
        self.bit_length = bit_length;
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch: usize) -> Self {
        self.preprocessing_batch_size = batch;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_computation_id(mut self, id: impl Into<String>) -> Self {
        self.computation_id = Some(id.into());
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_parties < 2 {
            return Err(ConfigError::TooFewParties(self.num_parties));
        }
        if self.threshold == 0 || self.threshold > self.num_parties {
            return Err(ConfigError::Threshold {
                threshold: self.threshold,
                parties: self.num_parties,
            });
        }
        if !(2..=64).contains(&self.bit_length) {
            return Err(ConfigError::BitLength(self.bit_length));
        }
        if self.protocol == ProtocolType::Mascot && self.field_size != MASCOT_FIELD_BITS {
            return Err(ConfigError::FieldSize(self.field_size));
        }
        if self.preprocessing_batch_size == 0 {
            return Err(ConfigError::BatchSize);
        }
        if self.message_timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }
        Ok(())
    }

    /// Number of connected parties needed before anything can run.
    pub fn quorum(&self) -> usize {
        self.num_parties
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
