//! Homomorphic encryption of number vectors.
//!
//! Both schemes run on the BFV implementation of the `fhe` crate with SIMD
//! batching. BFV encrypts integers exactly. CKKS-style approximate
//! arithmetic is provided as fixed-point encoding over a large plaintext
//! modulus: reals are multiplied by an explicit scale and rounded, and every
//! ciphertext tracks its current scale.
//!
//! A [`HeContext`] owns the keys. It must be initialized before use and can
//! be destroyed explicitly, after which every operation fails with
//! [`HeError::NotInitialized`].

use std::{fmt, sync::Arc};

use fhe::bfv::{
    BfvParameters, BfvParametersBuilder, Ciphertext, Encoding, Plaintext, PublicKey,
    RelinearizationKey, SecretKey,
};
use fhe_traits::{FheDecoder, FheDecrypter, FheEncoder, FheEncrypter, Serialize as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Largest ciphertext modulus, in bits, for 128-bit security at degree 8192.
const MAX_MODULUS_BITS: usize = 218;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Bfv,
    Ckks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeConfig {
    pub scheme: Scheme,
    /// Ring degree, also the number of slots.
    pub degree: usize,
    pub plaintext_modulus: u64,
    /// Bit sizes of the ciphertext moduli.
    pub moduli_sizes: Vec<usize>,
    /// Fixed-point scale of fresh CKKS ciphertexts. Ignored for BFV.
    pub scale: f64,
}

impl HeConfig {
    pub fn bfv() -> Self {
        Self {
            scheme: Scheme::Bfv,
            degree: 8192,
            plaintext_modulus: 65537,
            moduli_sizes: vec![62, 62, 62],
            scale: 1.0,
        }
    }

    pub fn ckks() -> Self {
        Self {
            scheme: Scheme::Ckks,
            degree: 8192,
            // 54-bit NTT-friendly prime
            plaintext_modulus: 0x3fff_ffff_0000_01,
            moduli_sizes: vec![62, 62, 62],
            scale: (1u64 << 20) as f64,
        }
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

#[derive(Error, Debug)]
pub enum HeError {
    #[error("ciphertexts belong to different schemes or contexts")]
    IncompatibleScheme,
    #[error("encryption context is not initialized")]
    NotInitialized,
    #[error("BFV only encrypts integers, got {0}")]
    NonIntegral(f64),
    #[error("{0} does not fit the plaintext modulus")]
    OutOfRange(f64),
    #[error("{len} values do not fit in {slots} slots")]
    TooManyValues { len: usize, slots: usize },
    #[error("scale {0:e} would overflow the plaintext modulus")]
    ScaleOverflow(f64),
    #[error("encryption backend failed: {0}")]
    Backend(#[from] fhe::Error),
}

/// Identifies the key pair a ciphertext was made under.
type Fingerprint = [u8; 8];

#[derive(Clone)]
pub struct HeCiphertext {
    scheme: Scheme,
    context: Fingerprint,
    scale: f64,
    len: usize,
    inner: Ciphertext,
}

impl HeCiphertext {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Number of encrypted values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for HeCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeCiphertext")
            .field("scheme", &self.scheme)
            .field("context", &self.context)
            .field("scale", &self.scale)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

struct Keys {
    params: Arc<BfvParameters>,
    secret: SecretKey,
    public: PublicKey,
    relin: RelinearizationKey,
    fingerprint: Fingerprint,
}

/// Leading bytes of the SHA-256 of the serialized public key.
fn fingerprint(public: &PublicKey) -> Fingerprint {
    let digest = Sha256::digest(public.to_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct HeContext {
    config: HeConfig,
    keys: Option<Keys>,
}

impl HeContext {
    pub fn new(config: HeConfig) -> Self {
        Self { config, keys: None }
    }

    pub fn scheme(&self) -> Scheme {
        self.config.scheme
    }

    pub fn is_initialized(&self) -> bool {
        self.keys.is_some()
    }

    /// Generate parameters and keys. Calling it again replaces the keys,
    /// so ciphertexts made before can no longer be used with this context.
    pub fn initialize(&mut self) -> Result<(), HeError> {
        let mut rng = rand09::rng();
        let params = BfvParametersBuilder::new()
            .set_degree(self.config.degree)
            .set_plaintext_modulus(self.config.plaintext_modulus)
            .set_moduli_sizes(&self.config.moduli_sizes)
            .build_arc()?;
        let bits: usize = self.config.moduli_sizes.iter().sum();
        if self.config.degree < 8192 || bits > MAX_MODULUS_BITS {
            tracing::warn!(degree = self.config.degree, bits, "parameters below 128-bit security");
        }
        let secret = SecretKey::random(&params, &mut rng);
        let public = PublicKey::new(&secret, &mut rng);
        let relin = RelinearizationKey::new(&secret, &mut rng)?;
        let fingerprint = fingerprint(&public);
        self.keys = Some(Keys {
            params,
            secret,
            public,
            relin,
            fingerprint,
        });
        tracing::debug!(context = %hex(&fingerprint), scheme = ?self.config.scheme, "he context initialized");
        Ok(())
    }

    /// Drop all key material. Harmless on a context that is not initialized.
    pub fn destroy(&mut self) {
        if let Some(keys) = self.keys.take() {
            tracing::debug!(context = %hex(&keys.fingerprint), "he context destroyed");
        }
    }

    fn keys(&self) -> Result<&Keys, HeError> {
        self.keys.as_ref().ok_or(HeError::NotInitialized)
    }

    fn half_modulus(&self) -> u64 {
        self.config.plaintext_modulus / 2
    }

    fn slots(&self) -> usize {
        self.config.degree
    }

    /// Map `values`, scaled by `scale`, to plaintext slots.
    fn encode(&self, values: &[f64], scale: f64) -> Result<Plaintext, HeError> {
        let keys = self.keys()?;
        if values.len() > self.slots() {
            return Err(HeError::TooManyValues {
                len: values.len(),
                slots: self.slots(),
            });
        }
        let t = self.config.plaintext_modulus;
        let half = self.half_modulus() as f64;
        let slots = values
            .iter()
            .map(|&v| {
                let scaled = match self.config.scheme {
                    Scheme::Bfv if v.fract() != 0.0 => return Err(HeError::NonIntegral(v)),
                    Scheme::Bfv => v,
                    Scheme::Ckks => (v * scale).round(),
                };
                if !scaled.is_finite() || scaled.abs() > half {
                    return Err(HeError::OutOfRange(v));
                }
                let magnitude = scaled.abs() as u64;
                Ok(if scaled < 0.0 {
                    t - magnitude
                } else {
                    magnitude
                })
            })
            .collect::<Result<Vec<u64>, HeError>>()?;
        Ok(Plaintext::try_encode(slots.as_slice(), Encoding::simd(), &keys.params)?)
    }

    fn decode(&self, plaintext: &Plaintext, len: usize, scale: f64) -> Result<Vec<f64>, HeError> {
        let t = self.config.plaintext_modulus;
        let half = self.half_modulus();
        let slots = Vec::<u64>::try_decode(plaintext, Encoding::simd())?;
        Ok(slots
            .into_iter()
            .take(len)
            .map(|v| {
                let centered = if v > half {
                    -((t - v) as f64)
                } else {
                    v as f64
                };
                match self.config.scheme {
                    Scheme::Bfv => centered,
                    Scheme::Ckks => centered / scale,
                }
            })
            .collect())
    }

    fn fresh_scale(&self) -> f64 {
        match self.config.scheme {
            Scheme::Bfv => 1.0,
            Scheme::Ckks => self.config.scale,
        }
    }

    /// Largest scale a ciphertext may carry while still leaving room for
    /// values up to 2^10 in magnitude.
    fn max_scale(&self) -> f64 {
        self.half_modulus() as f64 / 1024.0
    }

    fn product_scale(&self, a: f64, b: f64) -> Result<f64, HeError> {
        let scale = a * b;
        if self.config.scheme == Scheme::Ckks && scale > self.max_scale() {
            return Err(HeError::ScaleOverflow(scale));
        }
        Ok(scale)
    }

    fn check(&self, ct: &HeCiphertext) -> Result<(), HeError> {
        let keys = self.keys()?;
        if ct.scheme != self.config.scheme || ct.context != keys.fingerprint {
            return Err(HeError::IncompatibleScheme);
        }
        Ok(())
    }

    pub fn encrypt(&self, values: &[f64]) -> Result<HeCiphertext, HeError> {
        let scale = self.fresh_scale();
        let plaintext = self.encode(values, scale)?;
        let keys = self.keys()?;
        let inner = keys.public.try_encrypt(&plaintext, &mut rand09::rng())?;
        Ok(HeCiphertext {
            scheme: self.config.scheme,
            context: keys.fingerprint,
            scale,
            len: values.len(),
            inner,
        })
    }

    pub fn decrypt(&self, ct: &HeCiphertext) -> Result<Vec<f64>, HeError> {
        self.check(ct)?;
        let plaintext = self.keys()?.secret.try_decrypt(&ct.inner)?;
        self.decode(&plaintext, ct.len, ct.scale)
    }

    pub fn add(&self, a: &HeCiphertext, b: &HeCiphertext) -> Result<HeCiphertext, HeError> {
        self.check(a)?;
        self.check(b)?;
        // Fixed-point values only add up at equal scales.
        if a.scale != b.scale {
            return Err(HeError::IncompatibleScheme);
        }
        Ok(HeCiphertext {
            inner: &a.inner + &b.inner,
            len: a.len.max(b.len),
            ..a.clone()
        })
    }

    pub fn multiply(&self, a: &HeCiphertext, b: &HeCiphertext) -> Result<HeCiphertext, HeError> {
        self.check(a)?;
        self.check(b)?;
        let scale = self.product_scale(a.scale, b.scale)?;
        let mut inner = &a.inner * &b.inner;
        self.keys()?.relin.relinearizes(&mut inner)?;
        Ok(HeCiphertext {
            inner,
            scale,
            len: a.len.max(b.len),
            ..a.clone()
        })
    }

    /// Multiply slot-wise by plain values.
    pub fn multiply_plain(&self, a: &HeCiphertext, values: &[f64]) -> Result<HeCiphertext, HeError> {
        self.check(a)?;
        let plain_scale = self.fresh_scale();
        let scale = self.product_scale(a.scale, plain_scale)?;
        let plaintext = self.encode(values, plain_scale)?;
        Ok(HeCiphertext {
            inner: &a.inner * &plaintext,
            scale,
            len: a.len.max(values.len()),
            ..a.clone()
        })
    }
}

impl Drop for HeContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ready(config: HeConfig) -> HeContext {
        let mut ctx = HeContext::new(config);
        ctx.initialize().unwrap();
        ctx
    }

    fn assert_close(got: &[f64], expected: &[f64]) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() <= 1e-4 * e.abs().max(1.0), "{g} != {e}");
        }
    }

    #[test]
    fn bfv_round_trip() {
        let ctx = ready(HeConfig::bfv());
        let ct = ctx.encrypt(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(ctx.decrypt(&ct).unwrap(), vec![1.0, 2.0, 3.0]);
        let ct = ctx.encrypt(&[-5.0, 0.0, 32000.0]).unwrap();
        assert_eq!(ctx.decrypt(&ct).unwrap(), vec![-5.0, 0.0, 32000.0]);
    }

    #[test]
    fn bfv_homomorphism() {
        let ctx = ready(HeConfig::bfv());
        let a = ctx.encrypt(&[1.0, 2.0, -3.0]).unwrap();
        let b = ctx.encrypt(&[4.0, 5.0, 6.0]).unwrap();
        let sum = ctx.add(&a, &b).unwrap();
        assert_eq!(ctx.decrypt(&sum).unwrap(), vec![5.0, 7.0, 3.0]);
        let product = ctx.multiply(&a, &b).unwrap();
        assert_eq!(ctx.decrypt(&product).unwrap(), vec![4.0, 10.0, -18.0]);
        let scaled = ctx.multiply_plain(&a, &[3.0, 3.0, 3.0]).unwrap();
        assert_eq!(ctx.decrypt(&scaled).unwrap(), vec![3.0, 6.0, -9.0]);
    }

    #[test]
    fn bfv_rejects_fractions() {
        let ctx = ready(HeConfig::bfv());
        assert!(matches!(ctx.encrypt(&[1.5]), Err(HeError::NonIntegral(_))));
        assert!(matches!(ctx.encrypt(&[1e9]), Err(HeError::OutOfRange(_))));
    }

    #[test]
    fn ckks_round_trip() {
        let ctx = ready(HeConfig::ckks());
        let values = [1.5, -2.25, std::f64::consts::PI, 1000.125];
        let ct = ctx.encrypt(&values).unwrap();
        assert_close(&ctx.decrypt(&ct).unwrap(), &values);
    }

    #[test]
    fn ckks_homomorphism() {
        let ctx = ready(HeConfig::ckks());
        let a = ctx.encrypt(&[1.5, -2.0, 0.25]).unwrap();
        let b = ctx.encrypt(&[2.0, 3.5, -4.0]).unwrap();
        assert_close(&ctx.decrypt(&ctx.add(&a, &b).unwrap()).unwrap(), &[3.5, 1.5, -3.75]);
        let product = ctx.multiply(&a, &b).unwrap();
        assert_eq!(product.scale(), a.scale() * b.scale());
        assert_close(&ctx.decrypt(&product).unwrap(), &[3.0, -7.0, -1.0]);
        let halved = ctx.multiply_plain(&a, &[0.5, 0.5, 0.5]).unwrap();
        assert_close(&ctx.decrypt(&halved).unwrap(), &[0.75, -1.0, 0.125]);

        // Adding across scales would silently mix fixed-point formats.
        assert!(matches!(ctx.add(&a, &product), Err(HeError::IncompatibleScheme)));
        assert!(matches!(
            ctx.multiply(&product, &product),
            Err(HeError::ScaleOverflow(_))
        ));
    }

    #[test]
    fn cross_scheme_rejected() {
        let bfv = ready(HeConfig::bfv());
        let ckks = ready(HeConfig::ckks());
        let a = bfv.encrypt(&[1.0]).unwrap();
        let b = ckks.encrypt(&[1.0]).unwrap();
        assert!(matches!(bfv.add(&a, &b), Err(HeError::IncompatibleScheme)));
        assert!(matches!(ckks.multiply(&b, &a), Err(HeError::IncompatibleScheme)));

        let other = ready(HeConfig::bfv());
        let c = other.encrypt(&[1.0]).unwrap();
        assert!(matches!(bfv.add(&a, &c), Err(HeError::IncompatibleScheme)));
        assert!(matches!(bfv.decrypt(&c), Err(HeError::IncompatibleScheme)));
    }

    #[test]
    fn default_parameters() {
        for config in [HeConfig::bfv(), HeConfig::ckks()] {
            assert_eq!(config.degree, 8192);
            assert!(config.moduli_sizes.iter().sum::<usize>() <= MAX_MODULUS_BITS);
        }
    }

    #[test]
    fn new_keys_reject_old_ciphertexts() {
        let mut ctx = ready(HeConfig::bfv());
        let old = ctx.encrypt(&[7.0]).unwrap();
        ctx.initialize().unwrap();
        assert!(matches!(ctx.decrypt(&old), Err(HeError::IncompatibleScheme)));
        let fresh = ctx.encrypt(&[7.0]).unwrap();
        assert_eq!(ctx.decrypt(&fresh).unwrap(), vec![7.0]);
    }

    #[test]
    fn lifecycle() {
        let mut ctx = HeContext::new(HeConfig::bfv());
        assert!(matches!(ctx.encrypt(&[1.0]), Err(HeError::NotInitialized)));
        ctx.initialize().unwrap();
        let ct = ctx.encrypt(&[1.0]).unwrap();
        ctx.destroy();
        ctx.destroy();
        assert!(!ctx.is_initialized());
        assert!(matches!(ctx.decrypt(&ct), Err(HeError::NotInitialized)));
        assert!(matches!(ctx.add(&ct, &ct), Err(HeError::NotInitialized)));
    }
}
