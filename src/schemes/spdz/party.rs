//! One party of an SPDZ-style computation.
//!
//! [`Party`] runs the online phase over any [`Ring`]: SPDZ2k over
//! [`Z2k`](crate::algebra::Z2k) and MASCOT over [`Fp127`](crate::algebra::Fp127).
//!
//! Every operation takes its id and its preprocessing synchronously when it
//! is called, and only then returns a future that runs the communication
//! rounds. Parties that issue operations in the same order therefore agree on
//! both, even when the futures are polled concurrently.

use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use rand::thread_rng;
use tokio::task::JoinHandle;

use crate::{
    algebra::{Input, MaskShape, Opened, Ring, Word},
    config::{ConfigError, MpcConfig},
    error::MpcError,
    net::{mailbox::Mailbox, Id, Message, OperationId, Payload, Receiver, Step, Transport},
    protocols::{
        beaver::BeaverTriple,
        commitments::{commit, transcript, verify_commit, Commitment, Salt},
        comparison::{
            bit, first_borrow, ltz_cost, ltz_from_top, mask_operand, next_borrow, top_bit, Cost,
        },
    },
    schemes::spdz::{
        preprocessing::{Bundle, InputMask, PreprocessingError, PreprocessingSource, Resource},
        Share, SpdzParams,
    },
};

/// A value opened and MAC-checked by every party.
#[derive(Debug, Clone, PartialEq)]
pub struct Opening<R: Ring> {
    pub value: R,
    pub opened: Opened,
    /// Digest of the MAC check commitments.
    pub transcript: [u8; 32],
    pub operation: OperationId,
}

struct Attached<R: Ring> {
    source: Arc<dyn PreprocessingSource<R>>,
    params: SpdzParams<R>,
}

pub struct Party<R: Ring> {
    config: MpcConfig,
    transport: Arc<dyn Transport>,
    mailbox: Arc<Mailbox>,
    preprocessing: Option<Attached<R>>,
    counter: AtomicU64,
    pump: JoinHandle<()>,
}

/// Move incoming messages into the mailbox until the transport closes.
async fn pump(transport: Arc<dyn Transport>, mailbox: Arc<Mailbox>) {
    let me = transport.id();
    loop {
        match transport.recv().await {
            Ok(msg) => match msg.receiver {
                Receiver::Party(to) if to != me => {
                    tracing::warn!(%me, %to, "dropping message addressed to someone else");
                }
                _ => mailbox.deliver(msg),
            },
            Err(e) => {
                tracing::debug!(%me, error = %e, "transport closed");
                break;
            }
        }
    }
}

fn malformed(operation: &OperationId, sender: Id, step: Step) -> MpcError {
    MpcError::MalformedMessage {
        operation: operation.clone(),
        sender,
        step,
    }
}

fn decode_words<R: Ring>(
    words: &[Word],
    operation: &OperationId,
    sender: Id,
    step: Step,
) -> Result<Vec<R>, MpcError> {
    words
        .iter()
        .map(|w| R::from_word(*w))
        .collect::<Option<Vec<R>>>()
        .ok_or_else(|| malformed(operation, sender, step))
}

/// Settles an operation in the mailbox once it is dropped, whether it
/// finished, failed or was cancelled.
struct Settle {
    mailbox: Arc<Mailbox>,
    operation: OperationId,
}

impl Drop for Settle {
    fn drop(&mut self) {
        self.mailbox.settle(&self.operation);
    }
}

// Not part of any future, ThreadRng is not Send.
fn fresh_commit(values: &[Word]) -> (Commitment, Salt) {
    commit(values, &mut thread_rng())
}

impl<R: Ring> Party<R> {
    /// Join a computation over `transport`.
    ///
    /// Must be called inside a tokio runtime, a task is spawned to receive
    /// messages.
    pub fn new(config: MpcConfig, transport: Arc<dyn Transport>) -> Result<Self, MpcError> {
        config.validate()?;
        if config.protocol != R::PROTOCOL {
            return Err(MpcError::ProtocolMismatch);
        }
        if transport.parties() != config.num_parties {
            return Err(ConfigError::PartyCount {
                expected: config.num_parties,
                actual: transport.parties(),
            }
            .into());
        }
        let mailbox = Arc::new(Mailbox::new());
        let pump = tokio::spawn(pump(transport.clone(), mailbox.clone()));
        Ok(Self {
            config,
            transport,
            mailbox,
            preprocessing: None,
            counter: AtomicU64::new(0),
            pump,
        })
    }

    /// Attach the source every operation draws its preprocessing from.
    pub fn attach(&mut self, source: Arc<dyn PreprocessingSource<R>>) {
        let params = SpdzParams::new(source.mac_key_share(), self.id());
        if source.party() != self.id() {
            tracing::warn!(me = %self.id(), owner = %source.party(), "preprocessing was dealt to another party");
        }
        self.preprocessing = Some(Attached { source, params });
    }

    #[must_use]
    pub fn with_preprocessing(mut self, source: Arc<dyn PreprocessingSource<R>>) -> Self {
        self.attach(source);
        self
    }

    pub fn id(&self) -> Id {
        self.transport.id()
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    pub fn parties(&self) -> impl Iterator<Item = Id> {
        (0..self.config.num_parties).map(Id)
    }

    fn others(&self) -> Vec<Id> {
        let me = self.id();
        self.parties().filter(|&id| id != me).collect()
    }

    /// Parties currently reachable, ourselves included.
    pub fn connected(&self) -> usize {
        self.transport.connected()
    }

    pub fn is_quorum_ready(&self) -> bool {
        self.connected() >= self.config.quorum()
    }

    pub fn preprocessing(&self) -> Result<&Arc<dyn PreprocessingSource<R>>, MpcError> {
        self.attached().map(|a| &a.source)
    }

    fn attached(&self) -> Result<&Attached<R>, MpcError> {
        self.preprocessing
            .as_ref()
            .ok_or(MpcError::PreprocessingNotInitialized)
    }

    fn params(&self) -> Result<SpdzParams<R>, MpcError> {
        self.attached().map(|a| a.params)
    }

    /// Take the next operation id. Its messages are discarded once the
    /// returned guard is dropped.
    fn next_op(&self, kind: &str) -> (OperationId, Settle) {
        let op = OperationId::new(kind, self.counter.fetch_add(1, Ordering::Relaxed));
        let settle = Settle {
            mailbox: self.mailbox.clone(),
            operation: op.clone(),
        };
        (op, settle)
    }

    /// Generate one batch of every kind of material.
    pub async fn replenish(&self) -> Result<(), MpcError> {
        let source = self.preprocessing()?;
        let batch = self.config.preprocessing_batch_size;
        source.generate_triples(batch).await?;
        source.generate_bits(batch).await?;
        for owner in self.parties() {
            source.generate_input_masks(owner, batch).await?;
        }
        tracing::debug!(me = %self.id(), batch, "replenished preprocessing");
        Ok(())
    }

    pub fn encode(&self, value: impl Into<Input>) -> Result<R, MpcError> {
        Ok(R::encode(value.into(), self.config.bit_length)?)
    }

    /// Our share of a public value.
    pub fn constant(&self, value: impl Into<Input>) -> Result<Share<R>, MpcError> {
        let value = self.encode(value)?;
        Ok(Share::zero().add_public(value, &self.params()?))
    }

    pub fn add_public(&self, x: Share<R>, value: impl Into<Input>) -> Result<Share<R>, MpcError> {
        let value = self.encode(value)?;
        Ok(x.add_public(value, &self.params()?))
    }

    pub fn multiply_public(&self, x: Share<R>, value: impl Into<Input>) -> Result<Share<R>, MpcError> {
        Ok(x * self.encode(value)?)
    }

    /// Secret-share our own value.
    pub fn share(
        &self,
        value: impl Into<Input>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        self.input(self.id(), Some(value.into()))
    }

    /// Receive our share of a value input by `from`.
    pub fn receive_share(
        &self,
        from: Id,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        self.input(from, None)
    }

    /// Input protocol. `owner` must supply `value`, every other party `None`.
    pub fn input(
        &self,
        owner: Id,
        value: Option<Input>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op("input");
        let prepared = self.prepare_input(owner, value);
        async move {
            let _settle = settle;
            let (mask, correction, params) = prepared?;
            let correction = match correction {
                Some(correction) => {
                    let payload = Payload::Share {
                        correction: correction.to_word(),
                    };
                    self.transport
                        .send(Message::broadcast(self.id(), op.clone(), payload))
                        .await?;
                    correction
                }
                None => {
                    let mut slot = self
                        .mailbox
                        .collect(&op, Step::Share, &[owner], self.config.message_timeout)
                        .await?;
                    match slot.remove(&owner) {
                        Some(Payload::Share { correction }) => {
                            decode_words::<R>(&[correction], &op, owner, Step::Share)?[0]
                        }
                        _ => return Err(malformed(&op, owner, Step::Share)),
                    }
                }
            };
            tracing::debug!(%op, %owner, "input received");
            Ok(mask.share.add_public(correction, &params))
        }
    }

    /// The mask for `owner`'s input and, if we are the owner, the public
    /// correction `x - r`.
    ///
    /// The mask is taken before the value is looked at, so a rejected value
    /// uses up the same mask at every party.
    fn prepare_input(
        &self,
        owner: Id,
        value: Option<Input>,
    ) -> Result<(InputMask<R>, Option<R>, SpdzParams<R>), MpcError> {
        if owner.0 >= self.config.num_parties {
            return Err(MpcError::UnknownParty(owner));
        }
        let attached = self.attached()?;
        let mask = attached.source.get_input_mask(owner)?;
        if owner != self.id() {
            return Ok((mask, None, attached.params));
        }
        let x = self.encode(value.ok_or(MpcError::MissingInput(owner))?)?;
        let r = mask.value.ok_or(PreprocessingError::MaskWithoutValue)?;
        Ok((mask, Some(x - r), attached.params))
    }

    /// Reconstruct `x` towards every party and check its MAC.
    ///
    /// Over `Z_{2^128}` only the low `bit_length` bits are revealed, the
    /// rest is covered by `2^bit_length·ρ` for a fresh shared `ρ`.
    pub fn open(
        &self,
        x: Share<R>,
    ) -> impl Future<Output = Result<Opening<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op("open");
        let prepared = self.high_mask();
        async move {
            let _settle = settle;
            let l = self.config.bit_length;
            let x = match prepared? {
                Some(rho) => x + rho * R::pow2(l),
                None => x,
            };
            let payload = Payload::ReconstructReveal {
                value: x.val().to_word(),
            };
            let (values, transcript) = self.open_checked(&op, &[x], payload).await?;
            let opened = values[0].decode(l);
            Ok(Opening {
                value: R::encode(Input::Unsigned(opened.unsigned), l)?,
                opened,
                transcript,
                operation: op,
            })
        }
    }

    /// A random share to mask the bits above `bit_length` with, if the
    /// ring has any.
    fn high_mask(&self) -> Result<Option<Share<R>>, MpcError> {
        match R::COMPARISON_MASK {
            MaskShape::HighElement => Ok(Some(self.attached()?.source.get_triple()?.shares.0)),
            MaskShape::Statistical(_) => Ok(None),
        }
    }

    pub fn multiply(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        self.multiply_as("mul", x, y)
    }

    fn multiply_as(
        &self,
        kind: &str,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op(kind);
        let prepared = self.attached().and_then(|a| Ok((a.source.get_triple()?, a.params)));
        async move {
            let _settle = settle;
            let (triple, params) = prepared?;
            self.beaver(&op, x, y, triple, &params).await
        }
    }

    /// Logical AND of two shared bits.
    pub fn and(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        self.multiply_as("and", x, y)
    }

    /// Logical OR of two shared bits, `x + y - x·y`.
    pub fn or(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let xy = self.multiply_as("or", x, y);
        async move { Ok(x + y - xy.await?) }
    }

    /// Logical XOR of two shared bits, `x + y - 2·x·y`.
    pub fn xor(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let xy = self.multiply_as("xor", x, y);
        async move { Ok(x + y - xy.await? * (R::one() + R::one())) }
    }

    fn reserve(&self, cost: Cost) -> Result<(Bundle<R>, SpdzParams<R>), MpcError> {
        let attached = self.attached()?;
        let bundle = attached.source.reserve(cost.triples, cost.bits)?;
        Ok((bundle, attached.params))
    }

    /// Shared bit of `x < y`.
    pub fn less_than(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op("lt");
        let prepared = self.reserve(ltz_cost::<R>(self.config.bit_length));
        async move {
            let _settle = settle;
            let (bundle, params) = prepared?;
            self.ltz(&op, x - y, bundle, &params).await
        }
    }

    /// Shared bit of `x > y`.
    pub fn greater_than(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op("gt");
        let prepared = self.reserve(ltz_cost::<R>(self.config.bit_length));
        async move {
            let _settle = settle;
            let (bundle, params) = prepared?;
            self.ltz(&op, y - x, bundle, &params).await
        }
    }

    /// Shared bit of `x == y`.
    pub fn equals(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op("eq");
        let prepared = self.reserve(ltz_cost::<R>(self.config.bit_length).times(2));
        async move {
            let _settle = settle;
            let (bundle, params) = prepared?;
            let (lt, gt) = self.both_ways(&op, x, y, bundle, &params).await?;
            Ok((lt + gt).public_sub(R::one(), &params))
        }
    }

    /// Three-way comparison: a share of `1` if `x > y`, `0` if they are
    /// equal and `-1` if `x < y`.
    pub fn compare(
        &self,
        x: Share<R>,
        y: Share<R>,
    ) -> impl Future<Output = Result<Share<R>, MpcError>> + Send + '_ {
        let (op, settle) = self.next_op("cmp");
        let prepared = self.reserve(ltz_cost::<R>(self.config.bit_length).times(2));
        async move {
            let _settle = settle;
            let (bundle, params) = prepared?;
            let (lt, gt) = self.both_ways(&op, x, y, bundle, &params).await?;
            Ok(gt - lt)
        }
    }

    /// `x < y` and `x > y`, run side by side.
    async fn both_ways(
        &self,
        op: &OperationId,
        x: Share<R>,
        y: Share<R>,
        mut bundle: Bundle<R>,
        params: &SpdzParams<R>,
    ) -> Result<(Share<R>, Share<R>), MpcError> {
        let first = bundle.split_off(ltz_cost::<R>(self.config.bit_length));
        let (lt_op, gt_op) = (op.child("lt"), op.child("gt"));
        futures::try_join!(
            self.ltz(&lt_op, x - y, first, params),
            self.ltz(&gt_op, y - x, bundle, params),
        )
    }

    /// Shared bit of `x < 0` for `x` read as a signed `bit_length`-bit integer.
    #[tracing::instrument(level = "debug", skip_all, fields(me = %self.id(), op = %op))]
    async fn ltz(
        &self,
        op: &OperationId,
        x: Share<R>,
        mut bundle: Bundle<R>,
        params: &SpdzParams<R>,
    ) -> Result<Share<R>, MpcError> {
        let l = self.config.bit_length;
        let high = match R::COMPARISON_MASK {
            MaskShape::HighElement => Some(bundle.triple()?.shares.0),
            MaskShape::Statistical(_) => None,
        };
        let bits: Vec<Share<R>> = bundle.bits.drain(..).collect();
        if bits.len() < l as usize {
            return Err(PreprocessingError::Exhausted(Resource::Bit).into());
        }

        let masked = mask_operand(x, &bits, high, l, params);
        let payload = Payload::ComparisonBit {
            masked: masked.val().to_word(),
        };
        let (opened, _) = self.open_checked(&op.child("c"), &[masked], payload).await?;
        let c = opened[0].low_bits(l);

        let mut b = first_borrow(c, bits[0]);
        for i in 1..(l - 1) {
            let r_i = bits[i as usize];
            let rb = self
                .beaver(&op.child(format!("b{i}")), r_i, b, bundle.triple()?, params)
                .await?;
            b = next_borrow(bit(c, i), r_i, b, rb);
        }
        let r_top = bits[l as usize - 1];
        let rb = self
            .beaver(&op.child("top"), r_top, b, bundle.triple()?, params)
            .await?;
        let top = top_bit(bit(c, l - 1), r_top, b, rb, params);
        Ok(ltz_from_top(top, params))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(me = %self.id(), op = %op))]
    async fn beaver(
        &self,
        op: &OperationId,
        x: Share<R>,
        y: Share<R>,
        triple: BeaverTriple<R>,
        params: &SpdzParams<R>,
    ) -> Result<Share<R>, MpcError> {
        let (d, e) = triple.mask(x, y);
        let payload = Payload::MultiplyMask {
            d: d.val().to_word(),
            e: e.val().to_word(),
        };
        let (opened, _) = self.open_checked(op, &[d, e], payload).await?;
        Ok(triple.combine(opened[0], opened[1], params))
    }

    /// Broadcast `payload` and gather the same step from every other party.
    async fn exchange(
        &self,
        op: &OperationId,
        payload: Payload,
    ) -> Result<BTreeMap<Id, Payload>, MpcError> {
        let step = payload.step();
        self.transport
            .send(Message::broadcast(self.id(), op.clone(), payload.clone()))
            .await?;
        let mut slot = self
            .mailbox
            .collect(op, step, &self.others(), self.config.message_timeout)
            .await?;
        slot.insert(self.id(), payload);
        Ok(slot)
    }

    /// Sum the values carried by everyone's `payload`, without any check.
    async fn open_unchecked(
        &self,
        op: &OperationId,
        payload: Payload,
    ) -> Result<Vec<R>, MpcError> {
        let step = payload.step();
        let width = payload.words().map_or(0, |w| w.len());
        let slot = self.exchange(op, payload).await?;
        let mut sums = vec![R::zero(); width];
        for (sender, payload) in slot {
            let words = payload
                .words()
                .filter(|w| w.len() == width && payload.step() == step)
                .ok_or_else(|| malformed(op, sender, step))?;
            let values = decode_words::<R>(&words, op, sender, step)?;
            for (sum, v) in sums.iter_mut().zip(values) {
                *sum += v;
            }
        }
        Ok(sums)
    }

    /// Open `shares`, whose values are carried by `payload`, and check
    /// their MACs.
    async fn open_checked(
        &self,
        op: &OperationId,
        shares: &[Share<R>],
        payload: Payload,
    ) -> Result<(Vec<R>, [u8; 32]), MpcError> {
        let opened = self.open_unchecked(op, payload).await?;
        let transcript = self.check_macs(op, &opened, shares).await?;
        Ok((opened, transcript))
    }

    /// Check that `opened` is consistent with the MACs on `shares`.
    ///
    /// Every party commits to `α_i·x - m_i` for each value, and opens the
    /// commitment only once all commitments are in. Returns the digest of
    /// all commitments.
    #[tracing::instrument(level = "debug", skip_all, fields(me = %self.id(), op = %op))]
    pub async fn check_macs(
        &self,
        op: &OperationId,
        opened: &[R],
        shares: &[Share<R>],
    ) -> Result<[u8; 32], MpcError> {
        let params = self.params()?;
        let mac_op = op.child("mac");
        let values: Vec<Word> = opened
            .iter()
            .zip(shares)
            .map(|(x, share)| share.mac_check_value(*x, &params).to_word())
            .collect();
        let (commitment, salt) = fresh_commit(&values);

        let commitments = self
            .exchange(&mac_op, Payload::MacCommit { digest: commitment.0 })
            .await?;
        let openings = self
            .exchange(&mac_op, Payload::MacOpen { values, salt: salt.0 })
            .await?;

        let mut digests = Vec::with_capacity(commitments.len());
        let mut sums = vec![R::zero(); shares.len()];
        let mut intact = true;
        for (sender, payload) in &commitments {
            let Payload::MacCommit { digest } = payload else {
                return Err(malformed(&mac_op, *sender, Step::MacCommit));
            };
            let commitment = Commitment(*digest);
            digests.push(commitment);
            let Some(Payload::MacOpen { values, salt }) = openings.get(sender) else {
                return Err(malformed(&mac_op, *sender, Step::MacOpen));
            };
            if values.len() != sums.len() || !verify_commit(values, &commitment, &Salt(*salt)) {
                tracing::warn!(%op, %sender, "MAC check opening does not match its commitment");
                intact = false;
                continue;
            }
            let values = decode_words::<R>(values, &mac_op, *sender, Step::MacOpen)?;
            for (sum, z) in sums.iter_mut().zip(values) {
                *sum += z;
            }
        }
        if !intact || sums.iter().any(|z| *z != R::zero()) {
            tracing::warn!(%op, "MAC verification failed");
            return Err(MpcError::MacVerification {
                operation: op.clone(),
            });
        }
        Ok(transcript(&digests))
    }
}

impl<R: Ring> Drop for Party<R> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
