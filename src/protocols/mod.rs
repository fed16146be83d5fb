//! Local algebra of the protocols run by [`Party`](crate::schemes::spdz::party::Party).

pub mod beaver;
pub mod commitments;
pub mod comparison;
