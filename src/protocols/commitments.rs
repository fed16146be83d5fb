//! Hash-based commitments, used to commit to MAC check values before
//! they are opened.
use digest::Digest;
use rand::RngCore;
use sha2::Sha256;

use crate::algebra::Word;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Commitment(pub [u8; 32]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Salt(pub [u8; 32]);

/// Commit to `values` under a fresh random salt.
pub fn commit(values: &[Word], rng: &mut impl RngCore) -> (Commitment, Salt) {
    let mut salt = [0u8; 32];
    rng.fill_bytes(&mut salt);
    let salt = Salt(salt);
    (make_commit(values, &salt), salt)
}

fn make_commit(values: &[Word], salt: &Salt) -> Commitment {
    let mut hasher = Sha256::new();
    hasher.update(salt.0);
    hasher.update((values.len() as u64).to_le_bytes());
    for v in values {
        hasher.update(v.to_le_bytes());
    }
    Commitment(digest_bytes(hasher))
}

pub fn verify_commit(values: &[Word], commitment: &Commitment, salt: &Salt) -> bool {
    make_commit(values, salt) == *commitment
}

/// Digest over a sequence of commitments, used as an audit token.
pub fn transcript<'a>(commitments: impl IntoIterator<Item = &'a Commitment>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for c in commitments {
        hasher.update(c.0);
    }
    digest_bytes(hasher)
}

fn digest_bytes(hasher: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn honest_opening_verifies() {
        let mut rng = rand::thread_rng();
        let values = [3, 1 << 100];
        let (c, s) = commit(&values, &mut rng);
        assert!(verify_commit(&values, &c, &s));
    }

    #[test]
    fn altered_values_fail() {
        let mut rng = rand::thread_rng();
        let (c, s) = commit(&[3, 4], &mut rng);
        assert!(!verify_commit(&[3, 5], &c, &s));
        assert!(!verify_commit(&[3], &c, &s));
        let (_, other_salt) = commit(&[3, 4], &mut rng);
        assert!(!verify_commit(&[3, 4], &c, &other_salt));
    }

    #[test]
    fn transcript_depends_on_order() {
        let a = Commitment([1; 32]);
        let b = Commitment([2; 32]);
        assert_ne!(transcript([&a, &b]), transcript([&b, &a]));
    }
}
