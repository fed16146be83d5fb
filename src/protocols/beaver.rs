//! Local algebra of Beaver multiplication.
//!
//! With a triple `(a, b, c = a·b)` the parties open `e = x - a` and
//! `d = y - b`, after which
//! `x·y = c + e·b + d·a + e·d`
//! is a linear function of shares and public values.

use crate::{
    algebra::Ring,
    schemes::spdz::{Share, SpdzParams},
};

/// Beaver (Multiplication) Triple
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct BeaverTriple<R: Ring> {
    pub shares: (Share<R>, Share<R>, Share<R>),
}

impl<R: Ring> BeaverTriple<R> {
    /// Construct a beaver triple from shares.
    ///
    /// The shares must hold the invariant that `a * b = c`,
    /// for the underlying ring, otherwise they are
    /// considered malformed.
    pub fn from_foreign(a: Share<R>, b: Share<R>, c: Share<R>) -> Self {
        Self { shares: (a, b, c) }
    }

    /// The shares of `e = x - a` and `d = y - b` to open.
    pub fn mask(&self, x: Share<R>, y: Share<R>) -> (Share<R>, Share<R>) {
        let (a, b, _) = self.shares;
        (x - a, y - b)
    }

    /// Our share of `x·y` given the opened masks.
    pub fn combine(&self, e: R, d: R, params: &SpdzParams<R>) -> Share<R> {
        let (a, b, c) = self.shares;
        (c + b * e + a * d).add_public(e * d, params)
    }
}
