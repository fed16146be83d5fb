//! Rings the shares live in.
//!
//! SPDZ2k computes over `Z_{2^128}` where the low `k` bits carry the value
//! and the remaining bits are statistical slack for the MACs.
//! MASCOT computes over the prime field `Z_p` with `p = 2^127 - 1`.
//! Both are exposed through [`Ring`], so the protocol code is written once.

use std::{
    fmt::Debug,
    iter::Sum,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::config::ProtocolType;

pub mod element;
pub mod z2k;

pub use element::Fp127;
pub use z2k::Z2k;

/// Wire representation of a ring element.
pub type Word = u128;

/// How a comparison masks the value it opens. With
/// [`MaskShape::HighElement`] plain openings also cover the bits above
/// the bit length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskShape {
    /// `r = Σ 2^i r_i + 2^l·a` for a uniformly random shared `a`.
    HighElement,
    /// `r = Σ 2^i r_i` over `l + slack` shared bits.
    Statistical(u32),
}

/// A plain value handed to the input protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Signed(i128),
    Unsigned(u128),
}

macro_rules! input_from {
    ($variant:ident: $($t:ty),*) => {
        $(impl From<$t> for Input {
            fn from(value: $t) -> Self {
                Input::$variant(value.into())
            }
        })*
    };
}

input_from!(Signed: i8, i16, i32, i64, i128);
input_from!(Unsigned: u8, u16, u32, u64, u128);

impl From<usize> for Input {
    fn from(value: usize) -> Self {
        Input::Unsigned(value as u128)
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::Unsigned(value.into())
    }
}

/// A reconstructed value, read both as its canonical representative
/// and as a signed integer.
///
/// Both serialize as decimal strings, 128-bit integers do not fit every
/// serde format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Opened {
    #[serde(with = "decimal")]
    pub unsigned: u128,
    #[serde(with = "decimal")]
    pub signed: i128,
}

mod decimal {
    use std::{fmt::Display, str::FromStr};

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?.parse().map_err(D::Error::custom)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("{value} does not fit in the field of size 2^127 - 1")]
    OutsideField { value: i128 },
    #[error("{value} does not fit in the field of size 2^127 - 1")]
    OutsideFieldUnsigned { value: u128 },
}

pub trait Ring:
    Copy
    + Debug
    + PartialEq
    + Eq
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + Sum
    + Serialize
    + DeserializeOwned
{
    fn zero() -> Self;
    fn one() -> Self;
    const PROTOCOL: ProtocolType;
    const COMPARISON_MASK: MaskShape;

    fn sample(rng: &mut impl RngCore) -> Self;

    /// Sample a share of the global MAC key.
    fn sample_mac_key(rng: &mut impl RngCore, bit_length: u32) -> Self;

    /// Map a plain value into the ring.
    ///
    /// SPDZ2k truncates to the low `bit_length` bits, MASCOT rejects
    /// values outside the field.
    fn encode(input: Input, bit_length: u32) -> Result<Self, RangeError>;

    /// Read an opened element back as a plain value.
    fn decode(self, bit_length: u32) -> Opened;

    fn to_word(self) -> Word;

    /// `None` if `word` is not a canonical element.
    fn from_word(word: Word) -> Option<Self>;

    /// `2^i`, for `i` below the ring's bit width.
    fn pow2(i: u32) -> Self;

    fn from_bool(bit: bool) -> Self {
        if bit {
            Self::one()
        } else {
            Self::zero()
        }
    }

    /// The low `n` bits of the canonical representative.
    fn low_bits(self, n: u32) -> u128 {
        self.to_word() & low_mask(n)
    }
}

/// Mask for the low `n` bits, `n <= 128`.
pub(crate) fn low_mask(n: u32) -> u128 {
    if n >= 128 {
        u128::MAX
    } else {
        (1u128 << n) - 1
    }
}
