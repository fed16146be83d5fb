//! Local algebra of the less-than-zero circuit.
//!
//! For an `l`-bit signed `x` the circuit computes `y = x + 2^(l-1)`, whose
//! top bit is set iff `x >= 0`. It opens `c = y + r` for a random `r` built
//! from shared bits `r_i`, then recovers the top bit of `y = c - r` by
//! running the borrow chain of the subtraction over the low `l` bits.
//! Every step of the chain costs one multiplication.

use crate::{
    algebra::{MaskShape, Ring},
    schemes::spdz::{Share, SpdzParams},
};

/// Preprocessing consumed by one less-than-zero evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cost {
    pub triples: usize,
    pub bits: usize,
}

impl Cost {
    pub fn times(self, n: usize) -> Self {
        Cost {
            triples: self.triples * n,
            bits: self.bits * n,
        }
    }
}

pub fn ltz_cost<R: Ring>(bit_length: u32) -> Cost {
    let l = bit_length as usize;
    match R::COMPARISON_MASK {
        // One extra triple, its `a` masks the bits above `l`.
        MaskShape::HighElement => Cost {
            triples: l,
            bits: l,
        },
        MaskShape::Statistical(slack) => Cost {
            triples: l - 1,
            bits: l + slack as usize,
        },
    }
}

/// Share of `x + 2^(l-1) + r` where `r = Σ 2^i bits_i (+ 2^l high)`.
pub fn mask_operand<R: Ring>(
    x: Share<R>,
    bits: &[Share<R>],
    high: Option<Share<R>>,
    bit_length: u32,
    params: &SpdzParams<R>,
) -> Share<R> {
    let y = x.add_public(R::pow2(bit_length - 1), params);
    let r: Share<R> = bits
        .iter()
        .enumerate()
        .map(|(i, bit)| *bit * R::pow2(i as u32))
        .sum();
    let r = match high {
        Some(a) => r + a * R::pow2(bit_length),
        None => r,
    };
    y + r
}

pub fn bit(c: u128, i: u32) -> bool {
    (c >> i) & 1 == 1
}

/// Borrow out of position 0 of `c - r`.
pub fn first_borrow<R: Ring>(c: u128, r0: Share<R>) -> Share<R> {
    if bit(c, 0) {
        Share::zero()
    } else {
        r0
    }
}

/// Borrow out of position `i`, given the borrow `b` into it and `rb = r_i·b`.
pub fn next_borrow<R: Ring>(c_i: bool, r_i: Share<R>, b: Share<R>, rb: Share<R>) -> Share<R> {
    if c_i {
        rb
    } else {
        r_i + b - rb
    }
}

/// Bit `l-1` of `c - r`, that is `c ⊕ r ⊕ b` with `rb = r·b`.
pub fn top_bit<R: Ring>(
    c_top: bool,
    r_top: Share<R>,
    b: Share<R>,
    rb: Share<R>,
    params: &SpdzParams<R>,
) -> Share<R> {
    let t = r_top + b - rb * (R::one() + R::one());
    if c_top {
        t.public_sub(R::one(), params)
    } else {
        t
    }
}

/// `1 - top`, the indicator of `x < 0`.
pub fn ltz_from_top<R: Ring>(top: Share<R>, params: &SpdzParams<R>) -> Share<R> {
    top.public_sub(R::one(), params)
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;

    use super::*;
    use crate::{
        algebra::{low_mask, Fp127, Input, Z2k},
        net::Id,
    };

    /// Run the circuit with one party holding plain values, multiplying in the clear.
    fn ltz_clear<R: Ring>(x: i64, l: u32, rng: &mut impl rand::RngCore) -> R {
        let params = SpdzParams::new(R::zero(), Id(0));
        let plain = |v: R| Share::from_parts(v, R::zero());
        let mul = |a: Share<R>, b: Share<R>| plain(a.val() * b.val());

        let cost = ltz_cost::<R>(l);
        let bits: Vec<_> = (0..cost.bits)
            .map(|_| plain(R::from_bool(rng.next_u32() & 1 == 1)))
            .collect();
        let high = match R::COMPARISON_MASK {
            MaskShape::HighElement => Some(plain(R::sample(rng))),
            MaskShape::Statistical(_) => None,
        };
        let x = plain(R::encode(Input::Signed(x.into()), l).unwrap());
        let c = mask_operand(x, &bits, high, l, &params).val().low_bits(l);
        assert!(c <= low_mask(l));

        let mut b = first_borrow(c, bits[0]);
        for i in 1..(l - 1) as usize {
            let rb = mul(bits[i], b);
            b = next_borrow(bit(c, i as u32), bits[i], b, rb);
        }
        let r_top = bits[l as usize - 1];
        let top = top_bit(bit(c, l - 1), r_top, b, mul(r_top, b), &params);
        ltz_from_top(top, &params).val()
    }

    fn ltz_is_correct<R: Ring>() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
        for l in [2u32, 8, 16] {
            let bound = 1i64 << (l - 1);
            for x in [-bound + 1, -bound / 2, -1, 0, 1, bound / 2, bound - 1] {
                for _ in 0..8 {
                    let expected = R::from_bool(x < 0);
                    assert_eq!(ltz_clear::<R>(x, l, &mut rng), expected, "x = {x}, l = {l}");
                }
            }
        }
    }

    #[test]
    fn ltz_z2k() {
        ltz_is_correct::<Z2k>();
    }

    #[test]
    fn ltz_field() {
        ltz_is_correct::<Fp127>();
    }

    #[test]
    fn costs() {
        assert_eq!(ltz_cost::<Z2k>(16), Cost { triples: 16, bits: 16 });
        assert_eq!(ltz_cost::<Fp127>(16), Cost { triples: 15, bits: 56 });
        assert_eq!(ltz_cost::<Fp127>(16).times(2).bits, 112);
    }
}
