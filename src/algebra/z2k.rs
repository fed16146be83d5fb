//! The ring `Z_{2^128}` used by SPDZ2k.
//!
//! Arithmetic wraps at 128 bits. A computation configured with bit length
//! `k` only ever reads the low `k` bits of an opened value, the upper
//! `128 - k` bits exist so that MAC forgeries succeed with probability
//! at most `2^-(128 - k)`.
use overload::overload;
use rand::RngCore;
use std::ops;

use crate::{
    algebra::{low_mask, Input, MaskShape, Opened, RangeError, Ring, Word},
    config::ProtocolType,
};

#[derive(
    Default,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Clone,
    Copy,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Z2k(pub u128);

overload!((a: ?Z2k) + (b: ?Z2k) -> Z2k { Z2k(a.0.wrapping_add(b.0)) });
overload!((a: ?Z2k) - (b: ?Z2k) -> Z2k { Z2k(a.0.wrapping_sub(b.0)) });
overload!((a: ?Z2k) * (b: ?Z2k) -> Z2k { Z2k(a.0.wrapping_mul(b.0)) });
overload!(- (a: ?Z2k) -> Z2k { Z2k(a.0.wrapping_neg()) });
overload!((a: &mut Z2k) += (b: ?Z2k) { a.0 = a.0.wrapping_add(b.0); });
overload!((a: &mut Z2k) -= (b: ?Z2k) { a.0 = a.0.wrapping_sub(b.0); });
overload!((a: &mut Z2k) *= (b: ?Z2k) { a.0 = a.0.wrapping_mul(b.0); });

impl std::iter::Sum for Z2k {
    fn sum<I: Iterator<Item = Z2k>>(iter: I) -> Self {
        iter.fold(Z2k(0), |acc, x| acc + x)
    }
}

impl<'a> std::iter::Sum<&'a Z2k> for Z2k {
    fn sum<I: Iterator<Item = &'a Z2k>>(iter: I) -> Self {
        iter.fold(Z2k(0), |acc, x| acc + x)
    }
}

impl From<u128> for Z2k {
    fn from(value: u128) -> Self {
        Z2k(value)
    }
}

impl Ring for Z2k {
    const PROTOCOL: ProtocolType = ProtocolType::Spdz2k;
    const COMPARISON_MASK: MaskShape = MaskShape::HighElement;

    fn zero() -> Self {
        Z2k(0)
    }

    fn one() -> Self {
        Z2k(1)
    }

    fn sample(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        Z2k(u128::from_le_bytes(bytes))
    }

    fn sample_mac_key(rng: &mut impl RngCore, bit_length: u32) -> Self {
        // The key lives in the slack: Z_{2^s} with s = 128 - k.
        let slack = 128 - bit_length.min(127);
        Z2k(Self::sample(rng).0 & low_mask(slack))
    }

    fn encode(input: Input, bit_length: u32) -> Result<Self, RangeError> {
        let raw = match input {
            Input::Signed(v) => v as u128,
            Input::Unsigned(v) => v,
        };
        Ok(Z2k(raw & low_mask(bit_length)))
    }

    fn decode(self, bit_length: u32) -> Opened {
        let unsigned = self.0 & low_mask(bit_length);
        let negative = bit_length > 0 && bit_length < 128 && (unsigned >> (bit_length - 1)) & 1 == 1;
        let signed = if negative {
            (unsigned as i128) - (1i128 << bit_length)
        } else {
            unsigned as i128
        };
        Opened { unsigned, signed }
    }

    fn to_word(self) -> Word {
        self.0
    }

    fn from_word(word: Word) -> Option<Self> {
        Some(Z2k(word))
    }

    fn pow2(i: u32) -> Self {
        Z2k(1u128.checked_shl(i).unwrap_or(0))
    }
}
