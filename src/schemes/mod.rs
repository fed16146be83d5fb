//! Secret sharing schemes.

pub mod spdz;

use crate::algebra::{Fp127, Z2k};

/// A party computing over `Z_{2^k}`.
pub type Spdz2kParty = spdz::party::Party<Z2k>;

/// A party computing over the 127-bit prime field.
pub type MascotParty = spdz::party::Party<Fp127>;
