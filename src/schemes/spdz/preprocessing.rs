// Preprocessing
//
// Correlated randomness consumed by the online phase: multiplication
// triples, shared random bits and input masks. Every unit is handed out
// exactly once. Sources are pluggable through `PreprocessingSource`; the
// crate ships a static `Pool` and a `TrustedDealer` that generates
// matching material for every party on demand.

use std::{
    collections::VecDeque,
    fmt,
    fs::File,
    io::Write,
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::{
    algebra::Ring,
    net::Id,
    protocols::{beaver::BeaverTriple, comparison::Cost},
    schemes::spdz::Share,
};

pub type MultiplicationTriple<R> = BeaverTriple<R>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Triple,
    Bit,
    InputMask(Id),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Resource::Triple => write!(f, "multiplication triples"),
            Resource::Bit => write!(f, "shared bits"),
            Resource::InputMask(owner) => write!(f, "input masks for {owner}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PreprocessingError {
    #[error("not enough preprocessed {0}")]
    Exhausted(Resource),
    #[error("this source cannot generate new material")]
    GenerationUnsupported,
    #[error("no party with id {0}")]
    UnknownParty(Id),
    #[error("own input mask is missing its clear value")]
    MaskWithoutValue,
    #[error("could not access material: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed material: {0}")]
    Encoding(#[from] bincode::Error),
}

/// A share of a random `r`, plus `r` itself if we own the mask.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct InputMask<R: Ring> {
    pub share: Share<R>,
    pub value: Option<R>,
}

/// Material reserved in one go for a composite operation.
#[derive(Debug, Clone)]
pub struct Bundle<R: Ring> {
    pub triples: VecDeque<MultiplicationTriple<R>>,
    pub bits: VecDeque<Share<R>>,
}

impl<R: Ring> Bundle<R> {
    /// Move `cost` worth of material into a new bundle.
    pub fn split_off(&mut self, cost: Cost) -> Self {
        let triples = self.triples.drain(..cost.triples.min(self.triples.len())).collect();
        let bits = self.bits.drain(..cost.bits.min(self.bits.len())).collect();
        Bundle { triples, bits }
    }

    pub fn triple(&mut self) -> Result<MultiplicationTriple<R>, PreprocessingError> {
        self.triples
            .pop_front()
            .ok_or(PreprocessingError::Exhausted(Resource::Triple))
    }
}

/// Remaining material in a source.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct Stock {
    pub triples: usize,
    pub bits: usize,
    /// Indexed by the owner of the mask.
    pub input_masks: Vec<usize>,
}

/// Anything able to hand out preprocessed material to one party.
///
/// Pops are atomic: concurrent operations never receive the same unit.
#[async_trait]
pub trait PreprocessingSource<R: Ring>: Send + Sync {
    fn party(&self) -> Id;

    fn mac_key_share(&self) -> R;

    async fn generate_triples(&self, count: usize) -> Result<(), PreprocessingError>;

    async fn generate_bits(&self, count: usize) -> Result<(), PreprocessingError>;

    async fn generate_input_masks(&self, owner: Id, count: usize) -> Result<(), PreprocessingError>;

    fn get_triple(&self) -> Result<MultiplicationTriple<R>, PreprocessingError>;

    fn get_bit(&self) -> Result<Share<R>, PreprocessingError>;

    fn get_input_mask(&self, owner: Id) -> Result<InputMask<R>, PreprocessingError>;

    /// Take `triples` triples and `bits` bits, or nothing at all.
    fn reserve(&self, triples: usize, bits: usize) -> Result<Bundle<R>, PreprocessingError>;

    fn stock(&self) -> Stock;

    /// Drop all held material. Calling it twice is harmless.
    fn cleanup(&self);
}

/// Everything one party holds.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct Material<R: Ring> {
    pub party: Id,
    pub mac_key_share: R,
    pub triples: VecDeque<MultiplicationTriple<R>>,
    pub bits: VecDeque<Share<R>>,
    /// Indexed by the owner of the mask.
    pub input_masks: Vec<VecDeque<InputMask<R>>>,
}

impl<R: Ring> Material<R> {
    pub fn empty(party: Id, parties: usize, mac_key_share: R) -> Self {
        Self {
            party,
            mac_key_share,
            triples: VecDeque::new(),
            bits: VecDeque::new(),
            input_masks: vec![VecDeque::new(); parties],
        }
    }

    fn stock(&self) -> Stock {
        Stock {
            triples: self.triples.len(),
            bits: self.bits.len(),
            input_masks: self.input_masks.iter().map(VecDeque::len).collect(),
        }
    }

    fn masks_mut(&mut self, owner: Id) -> Result<&mut VecDeque<InputMask<R>>, PreprocessingError> {
        self.input_masks
            .get_mut(owner.0)
            .ok_or(PreprocessingError::UnknownParty(owner))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A fixed store of material, seeded up front (e.g. from a file).
pub struct Pool<R: Ring> {
    material: Mutex<Material<R>>,
}

impl<R: Ring> Pool<R> {
    pub fn new(material: Material<R>) -> Self {
        Self {
            material: Mutex::new(material),
        }
    }

    pub fn from_file(mut file: File) -> Result<Self, PreprocessingError> {
        load_material(&mut file).map(Self::new)
    }

    fn extend(&self, f: impl FnOnce(&mut Material<R>) -> Result<(), PreprocessingError>) -> Result<(), PreprocessingError> {
        f(&mut lock(&self.material))
    }
}

#[async_trait]
impl<R: Ring> PreprocessingSource<R> for Pool<R> {
    fn party(&self) -> Id {
        lock(&self.material).party
    }

    fn mac_key_share(&self) -> R {
        lock(&self.material).mac_key_share
    }

    async fn generate_triples(&self, _count: usize) -> Result<(), PreprocessingError> {
        Err(PreprocessingError::GenerationUnsupported)
    }

    async fn generate_bits(&self, _count: usize) -> Result<(), PreprocessingError> {
        Err(PreprocessingError::GenerationUnsupported)
    }

    async fn generate_input_masks(&self, _owner: Id, _count: usize) -> Result<(), PreprocessingError> {
        Err(PreprocessingError::GenerationUnsupported)
    }

    fn get_triple(&self) -> Result<MultiplicationTriple<R>, PreprocessingError> {
        lock(&self.material)
            .triples
            .pop_front()
            .ok_or(PreprocessingError::Exhausted(Resource::Triple))
    }

    fn get_bit(&self) -> Result<Share<R>, PreprocessingError> {
        lock(&self.material)
            .bits
            .pop_front()
            .ok_or(PreprocessingError::Exhausted(Resource::Bit))
    }

    fn get_input_mask(&self, owner: Id) -> Result<InputMask<R>, PreprocessingError> {
        lock(&self.material)
            .masks_mut(owner)?
            .pop_front()
            .ok_or(PreprocessingError::Exhausted(Resource::InputMask(owner)))
    }

    fn reserve(&self, triples: usize, bits: usize) -> Result<Bundle<R>, PreprocessingError> {
        let mut material = lock(&self.material);
        if material.triples.len() < triples {
            return Err(PreprocessingError::Exhausted(Resource::Triple));
        }
        if material.bits.len() < bits {
            return Err(PreprocessingError::Exhausted(Resource::Bit));
        }
        Ok(Bundle {
            triples: material.triples.drain(..triples).collect(),
            bits: material.bits.drain(..bits).collect(),
        })
    }

    fn stock(&self) -> Stock {
        lock(&self.material).stock()
    }

    fn cleanup(&self) {
        let mut material = lock(&self.material);
        material.triples.clear();
        material.bits.clear();
        material.input_masks.iter_mut().for_each(VecDeque::clear);
    }
}

/// In-process trusted dealer.
///
/// Produces correlated material for every party. Each party draws its own
/// portion; as long as all parties request the same amounts in the same
/// order, the `j`-th unit of every party belongs to the same tuple.
pub struct TrustedDealer<R: Ring> {
    parties: usize,
    state: Mutex<DealerState<R>>,
}

struct DealerState<R: Ring> {
    rng: ChaCha20Rng,
    mac_key: R,
    /// Generated, but not yet drawn, material per party.
    outboxes: Vec<Material<R>>,
}

impl<R: Ring> DealerState<R> {
    /// Random additive authenticated sharing of `value`.
    fn share_out(&mut self, value: R) -> Vec<Share<R>> {
        let n = self.outboxes.len();
        let mut vals: Vec<R> = (0..n - 1).map(|_| R::sample(&mut self.rng)).collect();
        let mut macs: Vec<R> = (0..n - 1).map(|_| R::sample(&mut self.rng)).collect();
        let rest_val = value - vals.iter().copied().sum::<R>();
        let rest_mac = value * self.mac_key - macs.iter().copied().sum::<R>();
        vals.push(rest_val);
        macs.push(rest_mac);
        vals.into_iter()
            .zip(macs)
            .map(|(val, mac)| Share::from_parts(val, mac))
            .collect()
    }

    fn triples(&mut self, count: usize) {
        for _ in 0..count {
            let a = R::sample(&mut self.rng);
            let b = R::sample(&mut self.rng);
            let (a_s, b_s, c_s) = (self.share_out(a), self.share_out(b), self.share_out(a * b));
            for (i, outbox) in self.outboxes.iter_mut().enumerate() {
                outbox
                    .triples
                    .push_back(BeaverTriple::from_foreign(a_s[i], b_s[i], c_s[i]));
            }
        }
    }

    fn bits(&mut self, count: usize) {
        for _ in 0..count {
            let bit = R::from_bool(self.rng.next_u32() & 1 == 1);
            let shares = self.share_out(bit);
            for (outbox, share) in self.outboxes.iter_mut().zip(shares) {
                outbox.bits.push_back(share);
            }
        }
    }

    fn input_masks(&mut self, owner: Id, count: usize) {
        for _ in 0..count {
            let r = R::sample(&mut self.rng);
            let shares = self.share_out(r);
            for (i, (outbox, share)) in self.outboxes.iter_mut().zip(shares).enumerate() {
                let value = (i == owner.0).then_some(r);
                outbox.input_masks[owner.0].push_back(InputMask { share, value });
            }
        }
    }
}

impl<R: Ring> TrustedDealer<R> {
    pub fn new(parties: usize, bit_length: u32) -> Self {
        Self::with_rng(parties, bit_length, ChaCha20Rng::from_entropy())
    }

    pub fn with_rng(parties: usize, bit_length: u32, mut rng: ChaCha20Rng) -> Self {
        let key_shares: Vec<R> = (0..parties)
            .map(|_| R::sample_mac_key(&mut rng, bit_length))
            .collect();
        let mac_key = key_shares.iter().copied().sum();
        let outboxes = key_shares
            .into_iter()
            .enumerate()
            .map(|(i, key)| Material::empty(Id(i), parties, key))
            .collect();
        Self {
            parties,
            state: Mutex::new(DealerState {
                rng,
                mac_key,
                outboxes,
            }),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn mac_key_share(&self, party: Id) -> Result<R, PreprocessingError> {
        lock(&self.state)
            .outboxes
            .get(party.0)
            .map(|m| m.mac_key_share)
            .ok_or(PreprocessingError::UnknownParty(party))
    }

    #[cfg(test)]
    pub(crate) fn mac_key(&self) -> R {
        lock(&self.state).mac_key
    }

    fn check(&self, party: Id) -> Result<(), PreprocessingError> {
        if party.0 < self.parties {
            Ok(())
        } else {
            Err(PreprocessingError::UnknownParty(party))
        }
    }

    fn draw_triples(&self, party: Id, count: usize) -> Result<Vec<MultiplicationTriple<R>>, PreprocessingError> {
        self.check(party)?;
        let mut state = lock(&self.state);
        let missing = count.saturating_sub(state.outboxes[party.0].triples.len());
        state.triples(missing);
        Ok(state.outboxes[party.0].triples.drain(..count).collect())
    }

    fn draw_bits(&self, party: Id, count: usize) -> Result<Vec<Share<R>>, PreprocessingError> {
        self.check(party)?;
        let mut state = lock(&self.state);
        let missing = count.saturating_sub(state.outboxes[party.0].bits.len());
        state.bits(missing);
        Ok(state.outboxes[party.0].bits.drain(..count).collect())
    }

    fn draw_input_masks(&self, party: Id, owner: Id, count: usize) -> Result<Vec<InputMask<R>>, PreprocessingError> {
        self.check(party)?;
        self.check(owner)?;
        let mut state = lock(&self.state);
        let missing = count.saturating_sub(state.outboxes[party.0].input_masks[owner.0].len());
        state.input_masks(owner, missing);
        Ok(state.outboxes[party.0].input_masks[owner.0].drain(..count).collect())
    }

    /// Generate complete material for every party at once, e.g. to write
    /// it to files. Does not touch what parties draw on demand.
    pub fn deal(&self, triples: usize, bits: usize, masks_per_party: usize) -> Vec<Material<R>> {
        let mut state = lock(&self.state);
        let mut batch = DealerState {
            rng: ChaCha20Rng::from_rng(&mut state.rng).unwrap_or_else(|_| ChaCha20Rng::from_entropy()),
            mac_key: state.mac_key,
            outboxes: state
                .outboxes
                .iter()
                .map(|m| Material::empty(m.party, self.parties, m.mac_key_share))
                .collect(),
        };
        drop(state);
        batch.triples(triples);
        batch.bits(bits);
        for owner in 0..self.parties {
            batch.input_masks(Id(owner), masks_per_party);
        }
        batch.outboxes
    }

    /// One on-demand source per party.
    pub fn sources(self: &Arc<Self>) -> Vec<DealerSource<R>> {
        (0..self.parties)
            .filter_map(|i| DealerSource::new(self.clone(), Id(i)).ok())
            .collect()
    }
}

/// A party's view of a [`TrustedDealer`].
pub struct DealerSource<R: Ring> {
    dealer: Arc<TrustedDealer<R>>,
    pool: Pool<R>,
}

impl<R: Ring> DealerSource<R> {
    pub fn new(dealer: Arc<TrustedDealer<R>>, party: Id) -> Result<Self, PreprocessingError> {
        let key = dealer.mac_key_share(party)?;
        let pool = Pool::new(Material::empty(party, dealer.parties(), key));
        Ok(Self { dealer, pool })
    }
}

#[async_trait]
impl<R: Ring> PreprocessingSource<R> for DealerSource<R> {
    fn party(&self) -> Id {
        self.pool.party()
    }

    fn mac_key_share(&self) -> R {
        self.pool.mac_key_share()
    }

    async fn generate_triples(&self, count: usize) -> Result<(), PreprocessingError> {
        let drawn = self.dealer.draw_triples(self.party(), count)?;
        self.pool.extend(|m| {
            m.triples.extend(drawn);
            Ok(())
        })
    }

    async fn generate_bits(&self, count: usize) -> Result<(), PreprocessingError> {
        let drawn = self.dealer.draw_bits(self.party(), count)?;
        self.pool.extend(|m| {
            m.bits.extend(drawn);
            Ok(())
        })
    }

    async fn generate_input_masks(&self, owner: Id, count: usize) -> Result<(), PreprocessingError> {
        let drawn = self.dealer.draw_input_masks(self.party(), owner, count)?;
        self.pool.extend(|m| {
            m.masks_mut(owner)?.extend(drawn);
            Ok(())
        })
    }

    fn get_triple(&self) -> Result<MultiplicationTriple<R>, PreprocessingError> {
        self.pool.get_triple()
    }

    fn get_bit(&self) -> Result<Share<R>, PreprocessingError> {
        self.pool.get_bit()
    }

    fn get_input_mask(&self, owner: Id) -> Result<InputMask<R>, PreprocessingError> {
        self.pool.get_input_mask(owner)
    }

    fn reserve(&self, triples: usize, bits: usize) -> Result<Bundle<R>, PreprocessingError> {
        self.pool.reserve(triples, bits)
    }

    fn stock(&self) -> Stock {
        self.pool.stock()
    }

    fn cleanup(&self) {
        self.pool.cleanup()
    }
}

pub fn write_material<R: Ring>(
    files: &mut [File],
    materials: &[Material<R>],
) -> Result<(), PreprocessingError> {
    for (file, material) in files.iter_mut().zip(materials) {
        let data: Vec<u8> = bincode::serialize(material)?;
        file.write_all(&data)?;
    }
    Ok(())
}

pub fn load_material<R: Ring>(file: &mut File) -> Result<Material<R>, PreprocessingError> {
    let buffered = std::io::BufReader::new(file);
    Ok(bincode::deserialize_from(buffered)?)
}

pub async fn load_material_async<R: Ring>(file: &Path) -> Result<Material<R>, PreprocessingError> {
    let contents = tokio::fs::read(file).await?;
    Ok(bincode::deserialize_from(&*contents)?)
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, io::Seek};

    use super::*;
    use crate::algebra::{Fp127, Z2k};

    fn open<R: Ring>(shares: impl IntoIterator<Item = Share<R>>, mac_key: R) -> R {
        let (vals, macs): (Vec<R>, Vec<R>) = shares.into_iter().map(|s| (s.val(), s.mac())).unzip();
        let x: R = vals.into_iter().sum();
        let m: R = macs.into_iter().sum();
        assert_eq!(m, x * mac_key, "MAC does not match");
        x
    }

    fn dealer_is_consistent<R: Ring>() {
        let dealer = TrustedDealer::<R>::with_rng(3, 32, ChaCha20Rng::seed_from_u64(9));
        let mac_key = dealer.mac_key();
        let materials = dealer.deal(4, 8, 2);

        let key_sum: R = materials.iter().map(|m| m.mac_key_share).sum();
        assert_eq!(key_sum, mac_key);

        for j in 0..4 {
            let a = open(materials.iter().map(|m| m.triples[j].shares.0), mac_key);
            let b = open(materials.iter().map(|m| m.triples[j].shares.1), mac_key);
            let c = open(materials.iter().map(|m| m.triples[j].shares.2), mac_key);
            assert_eq!(a * b, c);
        }
        for j in 0..8 {
            let bit = open(materials.iter().map(|m| m.bits[j]), mac_key);
            assert!(bit == R::zero() || bit == R::one());
        }
        for owner in 0..3 {
            for j in 0..2 {
                let r = open(materials.iter().map(|m| m.input_masks[owner][j].share), mac_key);
                for (i, m) in materials.iter().enumerate() {
                    let value = m.input_masks[owner][j].value;
                    assert_eq!(value, (i == owner).then_some(r));
                }
            }
        }
    }

    #[test]
    fn dealer_z2k() {
        dealer_is_consistent::<Z2k>();
    }

    #[test]
    fn dealer_field() {
        dealer_is_consistent::<Fp127>();
    }

    #[tokio::test]
    async fn on_demand_draws_line_up() {
        let dealer = Arc::new(TrustedDealer::<Fp127>::new(2, 64));
        let mac_key = dealer.mac_key();
        let sources = dealer.sources();
        // Party 1 asks first and in different chunks.
        sources[1].generate_triples(2).await.unwrap();
        sources[1].generate_triples(1).await.unwrap();
        sources[0].generate_triples(3).await.unwrap();
        sources[0].generate_input_masks(Id(1), 1).await.unwrap();
        sources[1].generate_input_masks(Id(1), 1).await.unwrap();

        for _ in 0..3 {
            let t0 = sources[0].get_triple().unwrap();
            let t1 = sources[1].get_triple().unwrap();
            let a = open([t0.shares.0, t1.shares.0], mac_key);
            let b = open([t0.shares.1, t1.shares.1], mac_key);
            let c = open([t0.shares.2, t1.shares.2], mac_key);
            assert_eq!(a * b, c);
        }
        let m0 = sources[0].get_input_mask(Id(1)).unwrap();
        let m1 = sources[1].get_input_mask(Id(1)).unwrap();
        assert_eq!(m0.value, None);
        assert_eq!(Some(open([m0.share, m1.share], mac_key)), m1.value);
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let dealer = Arc::new(TrustedDealer::<Z2k>::new(2, 64));
        let source = DealerSource::new(dealer, Id(0)).unwrap();
        source.generate_triples(1).await.unwrap();
        source.get_triple().unwrap();
        assert!(matches!(
            source.get_triple(),
            Err(PreprocessingError::Exhausted(Resource::Triple))
        ));
        assert!(matches!(
            source.get_bit(),
            Err(PreprocessingError::Exhausted(Resource::Bit))
        ));
        assert!(matches!(
            source.get_input_mask(Id(1)),
            Err(PreprocessingError::Exhausted(Resource::InputMask(Id(1))))
        ));
        assert!(matches!(
            source.get_input_mask(Id(5)),
            Err(PreprocessingError::UnknownParty(Id(5)))
        ));
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let dealer = TrustedDealer::<Z2k>::new(2, 64);
        let pool = Pool::new(dealer.deal(3, 5, 0).remove(0));
        assert!(pool.reserve(2, 6).is_err());
        assert_eq!(pool.stock().triples, 3);
        assert_eq!(pool.stock().bits, 5);
        let mut bundle = pool.reserve(2, 4).unwrap();
        assert_eq!(pool.stock().triples, 1);
        assert_eq!(pool.stock().bits, 1);
        let half = bundle.split_off(Cost { triples: 1, bits: 2 });
        assert_eq!((half.triples.len(), half.bits.len()), (1, 2));
        assert_eq!((bundle.triples.len(), bundle.bits.len()), (1, 2));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let dealer = TrustedDealer::<Fp127>::new(3, 64);
        let pool = Pool::new(dealer.deal(3, 5, 2).remove(1));
        assert_eq!(pool.stock().input_masks, vec![2, 2, 2]);
        pool.cleanup();
        pool.cleanup();
        assert_eq!(
            pool.stock(),
            Stock {
                triples: 0,
                bits: 0,
                input_masks: vec![0, 0, 0]
            }
        );
    }

    #[test]
    fn static_pool_cannot_generate() {
        let dealer = TrustedDealer::<Fp127>::new(2, 64);
        let pool = Pool::new(dealer.deal(0, 0, 0).remove(0));
        let res = futures::executor::block_on(pool.generate_triples(1));
        assert!(matches!(res, Err(PreprocessingError::GenerationUnsupported)));
    }

    #[test]
    fn concurrent_pops_never_repeat() {
        let dealer = TrustedDealer::<Z2k>::new(2, 64);
        let pool = Arc::new(Pool::new(dealer.deal(400, 0, 0).remove(0)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(t) = pool.get_triple() {
                        seen.push(t.shares.0.val().0);
                    }
                    seen
                })
            })
            .collect();
        let all: Vec<u128> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 400);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 400);
    }

    #[tokio::test]
    async fn material_files() {
        let dealer = TrustedDealer::<Fp127>::new(2, 64);
        let materials = dealer.deal(3, 4, 1);
        let mut files = [tempfile::tempfile().unwrap(), tempfile::tempfile().unwrap()];
        write_material(&mut files, &materials).unwrap();
        files.iter_mut().for_each(|f| {
            f.rewind().unwrap();
        });
        let [f0, _] = files;
        let pool = Pool::<Fp127>::from_file(f0).unwrap();
        assert_eq!(pool.party(), Id(0));
        assert_eq!(pool.mac_key_share(), materials[0].mac_key_share);
        assert_eq!(pool.get_triple().unwrap(), materials[0].triples[0]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("party1.bin");
        let mut file = File::create(&path).unwrap();
        write_material(std::slice::from_mut(&mut file), &materials[1..]).unwrap();
        drop(file);
        let loaded = load_material_async::<Fp127>(&path).await.unwrap();
        assert_eq!(loaded.party, Id(1));
        assert_eq!(loaded.bits, materials[1].bits);
        assert_eq!(loaded.input_masks[0], materials[1].input_masks[0]);
    }
}
