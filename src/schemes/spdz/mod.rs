//! SPDZ-style authenticated additive secret sharing.
//!
//! This SPDZ implementation is primarely based on the following lecture by Ivan Damgård:
//! (part one:) <https://www.youtube.com/watch?v=N80DV3Brds0> (and part two:) <https://www.youtube.com/watch?v=Ce45hp24b2E>
//!
//! A secret `x` is held as shares `x_i` with MAC shares `m_i` such that
//! `Σ x_i = x` and `Σ m_i = α·x` for a global key `α` that nobody knows.
//! Party `i` holds the key share `α_i`. Preprocessing is handled by a
//! dealer, see [`preprocessing`].
//!
//! The same code runs SPDZ2k (over [`Z2k`](crate::algebra::Z2k)) and
//! MASCOT (over [`Fp127`](crate::algebra::Fp127)).

use derive_more::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::{algebra::Ring, net::Id};

pub mod party;
pub mod preprocessing;

/// One party's fragment of a secret.
#[derive(
    Debug,
    Clone,
    Copy,
    Add,
    Sub,
    Neg,
    AddAssign,
    SubAssign,
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
)]
#[serde(bound = "")]
pub struct Share<R: Ring> {
    val: R,
    mac: R,
}

/// What a party needs to mix public values into shares.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct SpdzParams<R: Ring> {
    pub(crate) mac_key_share: R,
    pub who_am_i: Id,
}

impl<R: Ring> SpdzParams<R> {
    pub fn new(mac_key_share: R, who_am_i: Id) -> Self {
        Self {
            mac_key_share,
            who_am_i,
        }
    }

    /// Party 0 absorbs public constants into its value share.
    fn is_chosen_party(&self) -> bool {
        self.who_am_i == Id(0)
    }
}

impl<R: Ring> Share<R> {
    /// Construct a share from a value share and a MAC share.
    ///
    /// Nothing checks that the parts are consistent with the other
    /// parties' shares, a bad pair is caught when the value is opened.
    pub fn from_parts(val: R, mac: R) -> Self {
        Share { val, mac }
    }

    pub fn val(&self) -> R {
        self.val
    }

    pub fn mac(&self) -> R {
        self.mac
    }

    pub fn zero() -> Self {
        Share {
            val: R::zero(),
            mac: R::zero(),
        }
    }

    #[must_use]
    pub fn add_public(self, val: R, params: &SpdzParams<R>) -> Self {
        let val_val = if params.is_chosen_party() { val } else { R::zero() };
        Share {
            val: self.val + val_val,
            mac: self.mac + val * params.mac_key_share,
        }
    }

    #[must_use]
    pub fn sub_public(self, val: R, params: &SpdzParams<R>) -> Self {
        self.add_public(-val, params)
    }

    /// A share of `val - self`.
    #[must_use]
    pub fn public_sub(self, val: R, params: &SpdzParams<R>) -> Self {
        (-self).add_public(val, params)
    }

    /// `α_i·x - m_i`, which sums to zero over all parties iff the MAC on
    /// the opened value `x` is intact.
    pub(crate) fn mac_check_value(&self, opened: R, params: &SpdzParams<R>) -> R {
        opened * params.mac_key_share - self.mac
    }
}

impl<R: Ring> std::ops::AddAssign<&Self> for Share<R> {
    fn add_assign(&mut self, rhs: &Self) {
        *self += *rhs;
    }
}

impl<R: Ring> std::ops::SubAssign<&Self> for Share<R> {
    fn sub_assign(&mut self, rhs: &Self) {
        *self -= *rhs;
    }
}

// Mutliplication between a share and a public value
// This operation is symmetric
impl<R: Ring> std::ops::Mul<R> for Share<R> {
    type Output = Share<R>;

    fn mul(self, rhs: R) -> Self::Output {
        Share {
            val: self.val * rhs,
            mac: self.mac * rhs,
        }
    }
}

impl<R: Ring> std::iter::Sum for Share<R> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Share::zero(), |acc, s| acc + s)
    }
}

#[cfg(test)]
mod test {
    use rand::{thread_rng, SeedableRng};

    use super::*;
    use crate::algebra::{Fp127, Input, Z2k};

    /// Split `x` into authenticated shares under a freshly drawn key.
    fn deal<R: Ring>(x: R, n: usize) -> (Vec<Share<R>>, Vec<SpdzParams<R>>) {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(5);
        let keys: Vec<R> = (0..n).map(|_| R::sample_mac_key(&mut rng, 64)).collect();
        let alpha: R = keys.iter().copied().sum();
        let mut vals: Vec<R> = (1..n).map(|_| R::sample(&mut rng)).collect();
        let mut macs: Vec<R> = (1..n).map(|_| R::sample(&mut rng)).collect();
        vals.push(x - vals.iter().copied().sum::<R>());
        macs.push(alpha * x - macs.iter().copied().sum::<R>());
        let shares = vals
            .into_iter()
            .zip(macs)
            .map(|(val, mac)| Share { val, mac })
            .collect();
        let params = keys
            .into_iter()
            .enumerate()
            .map(|(i, k)| SpdzParams::new(k, Id(i)))
            .collect();
        (shares, params)
    }

    fn mac_holds<R: Ring>(shares: &[Share<R>], params: &[SpdzParams<R>]) -> Option<R> {
        let x: R = shares.iter().map(|s| s.val).sum();
        let check: R = shares
            .iter()
            .zip(params)
            .map(|(s, p)| s.mac_check_value(x, p))
            .sum();
        (check == R::zero()).then_some(x)
    }

    fn linear_ops_keep_macs<R: Ring>() {
        let x = R::encode(Input::Unsigned(40), 64).unwrap();
        let y = R::encode(Input::Unsigned(2), 64).unwrap();
        let (xs, params) = deal(x, 3);
        let (ys, _) = deal(y, 3);

        let sum: Vec<_> = xs.iter().zip(&ys).map(|(a, b)| *a + *b).collect();
        assert_eq!(mac_holds(&sum, &params), Some(x + y));

        let diff: Vec<_> = xs.iter().zip(&ys).map(|(a, b)| *a - *b).collect();
        assert_eq!(mac_holds(&diff, &params), Some(x - y));

        let scaled: Vec<_> = xs.iter().map(|a| *a * y).collect();
        assert_eq!(mac_holds(&scaled, &params), Some(x * y));

        let shifted: Vec<_> = xs
            .iter()
            .zip(&params)
            .map(|(a, p)| a.add_public(y, p))
            .collect();
        assert_eq!(mac_holds(&shifted, &params), Some(x + y));

        let flipped: Vec<_> = xs
            .iter()
            .zip(&params)
            .map(|(a, p)| a.public_sub(y, p))
            .collect();
        assert_eq!(mac_holds(&flipped, &params), Some(y - x));
    }

    #[test]
    fn linear_operations_z2k() {
        linear_ops_keep_macs::<Z2k>();
    }

    #[test]
    fn linear_operations_field() {
        linear_ops_keep_macs::<Fp127>();
    }

    #[test]
    fn tampered_mac_is_caught() {
        let (mut shares, params) = deal(Fp127::sample(&mut thread_rng()), 2);
        shares[1] = Share::from_parts(shares[1].val(), shares[1].mac() + <Fp127 as Ring>::one());
        assert_eq!(mac_holds(&shares, &params), None);
    }
}
