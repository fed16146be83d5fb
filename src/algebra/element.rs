//! The MASCOT field, integers modulo the Mersenne prime 2^127 - 1.
use ff::{Field, PrimeField};
use rand::RngCore;

use crate::{
    algebra::{Input, MaskShape, Opened, RangeError, Ring, Word},
    config::ProtocolType,
};

#[derive(PrimeField, serde::Serialize, serde::Deserialize)]
#[PrimeFieldModulus = "170141183460469231731687303715884105727"]
#[PrimeFieldGenerator = "43"]
#[PrimeFieldReprEndianness = "little"]
pub struct Fp127([u64; 2]);

/// The modulus `p`.
pub const PRIME: u128 = (1 << 127) - 1;

/// Statistical security of comparison masks, in bits.
const COMPARISON_SLACK: u32 = 40;

impl From<Fp127> for u128 {
    fn from(val: Fp127) -> Self {
        u128::from_le_bytes(val.to_repr().0)
    }
}

impl TryFrom<u128> for Fp127 {
    type Error = RangeError;

    fn try_from(value: u128) -> Result<Self, Self::Error> {
        Option::from(Fp127::from_repr(Fp127Repr(value.to_le_bytes())))
            .ok_or(RangeError::OutsideFieldUnsigned { value })
    }
}

impl Ring for Fp127 {
    const PROTOCOL: ProtocolType = ProtocolType::Mascot;
    const COMPARISON_MASK: MaskShape = MaskShape::Statistical(COMPARISON_SLACK);

    fn zero() -> Self {
        <Fp127 as Field>::ZERO
    }

    fn one() -> Self {
        <Fp127 as Field>::ONE
    }

    fn sample(rng: &mut impl RngCore) -> Self {
        <Fp127 as Field>::random(rng)
    }

    fn sample_mac_key(rng: &mut impl RngCore, _bit_length: u32) -> Self {
        <Fp127 as Field>::random(rng)
    }

    fn encode(input: Input, _bit_length: u32) -> Result<Self, RangeError> {
        match input {
            Input::Unsigned(v) => Fp127::try_from(v),
            Input::Signed(v) if v >= 0 => Fp127::try_from(v as u128),
            Input::Signed(v) => {
                let magnitude = v.unsigned_abs();
                if magnitude >= PRIME {
                    return Err(RangeError::OutsideField { value: v });
                }
                Ok(-Fp127::try_from(magnitude)?)
            }
        }
    }

    fn decode(self, _bit_length: u32) -> Opened {
        let unsigned = u128::from(self);
        let signed = if unsigned > PRIME / 2 {
            -((PRIME - unsigned) as i128)
        } else {
            unsigned as i128
        };
        Opened { unsigned, signed }
    }

    fn to_word(self) -> Word {
        self.into()
    }

    fn from_word(word: Word) -> Option<Self> {
        Fp127::try_from(word).ok()
    }

    fn pow2(i: u32) -> Self {
        <Fp127 as PrimeField>::from_u128(1u128.checked_shl(i).unwrap_or(0))
    }
}
