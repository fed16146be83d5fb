//! JIFF-style façade over a [`Party`].
//!
//! A [`Computation`] picks SPDZ2k or MASCOT from its configuration and hands
//! out protocol-tagged [`SecretShare`]s, so application code does not need to
//! be generic over the ring. Openings come back with the MAC check transcript
//! and some metadata for auditing.

use std::{
    future::Future,
    path::Path,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::{
    future::{self, BoxFuture},
    FutureExt, TryFutureExt,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    algebra::{Fp127, Input, Opened, Ring, Z2k},
    config::{MpcConfig, ProtocolType},
    error::MpcError,
    net::{Id, OperationId, Transport},
    schemes::spdz::{
        party::{Opening, Party},
        preprocessing::{load_material_async, Pool, PreprocessingSource, TrustedDealer},
        Share,
    },
};

/// A share of either protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ShareValue {
    Spdz2k(Share<Z2k>),
    Mascot(Share<Fp127>),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecretShare {
    pub value: ShareValue,
    /// The party that input the value, `None` for computed values.
    pub sender: Option<Id>,
}

impl SecretShare {
    pub fn protocol(&self) -> ProtocolType {
        match self.value {
            ShareValue::Spdz2k(_) => ProtocolType::Spdz2k,
            ShareValue::Mascot(_) => ProtocolType::Mascot,
        }
    }

    fn derived(value: ShareValue) -> Self {
        Self {
            value,
            sender: None,
        }
    }
}

/// Ties a ring to its [`ShareValue`] variant.
trait Variant: Ring {
    fn wrap(share: Share<Self>) -> ShareValue;
    fn unwrap(value: ShareValue) -> Result<Share<Self>, MpcError>;
}

impl Variant for Z2k {
    fn wrap(share: Share<Self>) -> ShareValue {
        ShareValue::Spdz2k(share)
    }

    fn unwrap(value: ShareValue) -> Result<Share<Self>, MpcError> {
        match value {
            ShareValue::Spdz2k(share) => Ok(share),
            ShareValue::Mascot(_) => Err(MpcError::ProtocolMismatch),
        }
    }
}

impl Variant for Fp127 {
    fn wrap(share: Share<Self>) -> ShareValue {
        ShareValue::Mascot(share)
    }

    fn unwrap(value: ShareValue) -> Result<Share<Self>, MpcError> {
        match value {
            ShareValue::Mascot(share) => Ok(share),
            ShareValue::Spdz2k(_) => Err(MpcError::ProtocolMismatch),
        }
    }
}

/// Where a computation gets its correlated randomness.
#[derive(Clone)]
pub enum Preprocessing {
    Spdz2k(Arc<dyn PreprocessingSource<Z2k>>),
    Mascot(Arc<dyn PreprocessingSource<Fp127>>),
}

impl Preprocessing {
    pub fn protocol(&self) -> ProtocolType {
        match self {
            Preprocessing::Spdz2k(_) => ProtocolType::Spdz2k,
            Preprocessing::Mascot(_) => ProtocolType::Mascot,
        }
    }

    /// On-demand sources for every party, backed by one in-process dealer.
    pub fn trusted_dealer(config: &MpcConfig) -> Vec<Self> {
        match config.protocol {
            ProtocolType::Spdz2k => dealer_sources::<Z2k>(config)
                .into_iter()
                .map(Preprocessing::Spdz2k)
                .collect(),
            ProtocolType::Mascot => dealer_sources::<Fp127>(config)
                .into_iter()
                .map(Preprocessing::Mascot)
                .collect(),
        }
    }

    /// A fixed pool read from a material file.
    pub async fn load(protocol: ProtocolType, path: &Path) -> Result<Self, MpcError> {
        Ok(match protocol {
            ProtocolType::Spdz2k => {
                let material = load_material_async::<Z2k>(path).await?;
                Preprocessing::Spdz2k(Arc::new(Pool::new(material)))
            }
            ProtocolType::Mascot => {
                let material = load_material_async::<Fp127>(path).await?;
                Preprocessing::Mascot(Arc::new(Pool::new(material)))
            }
        })
    }
}

fn dealer_sources<R: Ring>(config: &MpcConfig) -> Vec<Arc<dyn PreprocessingSource<R>>> {
    let dealer = Arc::new(TrustedDealer::<R>::new(config.num_parties, config.bit_length));
    dealer
        .sources()
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn PreprocessingSource<R>>)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Proof {
    #[serde(rename = "type")]
    pub kind: String,
    /// Hex SHA-256 over every party's MAC check commitment.
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenMetadata {
    pub computation_id: Option<String>,
    pub operation_id: OperationId,
    pub protocol: ProtocolType,
    pub parties: Vec<Id>,
    pub threshold: usize,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenResult {
    pub value: Opened,
    pub proof: Proof,
    pub metadata: OpenMetadata,
}

#[derive(Debug, Clone, Copy)]
enum Binary {
    Multiply,
    LessThan,
    GreaterThan,
    Equals,
    Compare,
    And,
    Or,
    Xor,
}

enum Backend {
    Spdz2k(Party<Z2k>),
    Mascot(Party<Fp127>),
}

macro_rules! on_party {
    ($backend:expr, |$p:ident| $body:expr) => {
        match $backend {
            Backend::Spdz2k($p) => $body,
            Backend::Mascot($p) => $body,
        }
    };
}

pub struct Computation {
    backend: Backend,
}

impl Computation {
    /// Join a computation. The protocol is taken from `config.protocol`.
    pub fn configure(
        config: MpcConfig,
        transport: Arc<dyn Transport>,
        preprocessing: Option<Preprocessing>,
    ) -> Result<Self, MpcError> {
        let backend = match config.protocol {
            ProtocolType::Spdz2k => Backend::Spdz2k(Party::new(config, transport)?),
            ProtocolType::Mascot => Backend::Mascot(Party::new(config, transport)?),
        };
        let mut computation = Self { backend };
        if let Some(preprocessing) = preprocessing {
            computation.attach_preprocessing(preprocessing)?;
        }
        tracing::info!(
            me = %computation.id(),
            protocol = %computation.config().protocol,
            "computation configured"
        );
        Ok(computation)
    }

    pub fn attach_preprocessing(&mut self, preprocessing: Preprocessing) -> Result<(), MpcError> {
        match (&mut self.backend, preprocessing) {
            (Backend::Spdz2k(p), Preprocessing::Spdz2k(source)) => p.attach(source),
            (Backend::Mascot(p), Preprocessing::Mascot(source)) => p.attach(source),
            _ => return Err(MpcError::ProtocolMismatch),
        }
        Ok(())
    }

    pub fn id(&self) -> Id {
        on_party!(&self.backend, |p| p.id())
    }

    pub fn config(&self) -> &MpcConfig {
        on_party!(&self.backend, |p| p.config())
    }

    pub fn is_quorum_ready(&self) -> bool {
        on_party!(&self.backend, |p| p.is_quorum_ready())
    }

    fn ensure_quorum(&self) -> Result<(), MpcError> {
        if self.is_quorum_ready() {
            Ok(())
        } else {
            let connected = on_party!(&self.backend, |p| p.connected());
            Err(MpcError::QuorumNotReady {
                connected,
                required: self.config().quorum(),
            })
        }
    }

    /// Generate a batch of preprocessing.
    pub async fn preprocess(&self) -> Result<(), MpcError> {
        on_party!(&self.backend, |p| p.replenish().await)
    }

    /// Secret-share our own value with every party.
    pub fn share(
        &self,
        value: impl Into<Input>,
    ) -> impl Future<Output = Result<SecretShare, MpcError>> + Send + '_ {
        self.share_from(self.id(), Some(value.into()))
    }

    /// Our share of the value input by `from`.
    pub fn receive_share(
        &self,
        from: Id,
    ) -> impl Future<Output = Result<SecretShare, MpcError>> + Send + '_ {
        self.share_from(from, None)
    }

    /// Input protocol for `sender`, who must supply `value`.
    pub fn share_from(
        &self,
        sender: Id,
        value: Option<Input>,
    ) -> impl Future<Output = Result<SecretShare, MpcError>> + Send + '_ {
        let started = self.ensure_quorum().map(|()| {
            on_party!(&self.backend, |p| input(p, sender, value))
        });
        async move { started?.await }
    }

    /// A share must name a party of this computation as its sender.
    fn check_sender(&self, share: &SecretShare) -> Result<(), MpcError> {
        match share.sender {
            Some(id) if id.0 >= self.config().num_parties => Err(MpcError::UnknownParty(id)),
            _ => Ok(()),
        }
    }

    /// Reconstruct a value. Fails unless every MAC checks out.
    pub fn open(&self, share: &SecretShare) -> BoxFuture<'_, Result<OpenResult, MpcError>> {
        if let Err(e) = self.check_sender(share).and_then(|()| self.ensure_quorum()) {
            return future::ready(Err(e)).boxed();
        }
        on_party!(&self.backend, |p| open(p, share))
    }

    pub fn add(&self, a: &SecretShare, b: &SecretShare) -> Result<SecretShare, MpcError> {
        self.check_sender(a)?;
        self.check_sender(b)?;
        on_party!(&self.backend, |p| linear(p, a, b, |x, y| x + y))
    }

    pub fn sub(&self, a: &SecretShare, b: &SecretShare) -> Result<SecretShare, MpcError> {
        self.check_sender(a)?;
        self.check_sender(b)?;
        on_party!(&self.backend, |p| linear(p, a, b, |x, y| x - y))
    }

    pub fn add_public(&self, a: &SecretShare, value: impl Into<Input>) -> Result<SecretShare, MpcError> {
        self.check_sender(a)?;
        let value = value.into();
        on_party!(&self.backend, |p| with_public(p, a, |x| p.add_public(x, value)))
    }

    pub fn multiply_public(
        &self,
        a: &SecretShare,
        value: impl Into<Input>,
    ) -> Result<SecretShare, MpcError> {
        self.check_sender(a)?;
        let value = value.into();
        on_party!(&self.backend, |p| with_public(p, a, |x| p.multiply_public(x, value)))
    }

    pub fn multiply(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::Multiply)
    }

    pub fn less_than(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::LessThan)
    }

    pub fn greater_than(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::GreaterThan)
    }

    pub fn equals(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::Equals)
    }

    /// `1`, `0` or `-1` as `a` is greater than, equal to or less than `b`.
    pub fn compare(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::Compare)
    }

    pub fn and(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::And)
    }

    pub fn or(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::Or)
    }

    pub fn xor(&self, a: &SecretShare, b: &SecretShare) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        self.binary(a, b, Binary::Xor)
    }

    fn binary(
        &self,
        a: &SecretShare,
        b: &SecretShare,
        op: Binary,
    ) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
        let checked = self
            .check_sender(a)
            .and_then(|()| self.check_sender(b))
            .and_then(|()| self.ensure_quorum());
        if let Err(e) = checked {
            return future::ready(Err(e)).boxed();
        }
        on_party!(&self.backend, |p| binary(p, a, b, op))
    }
}

fn input<R: Variant>(
    p: &Party<R>,
    sender: Id,
    value: Option<Input>,
) -> BoxFuture<'_, Result<SecretShare, MpcError>> {
    p.input(sender, value)
        .map_ok(move |share| SecretShare {
            value: R::wrap(share),
            sender: Some(sender),
        })
        .boxed()
}

fn linear<R: Variant>(
    _: &Party<R>,
    a: &SecretShare,
    b: &SecretShare,
    f: impl FnOnce(Share<R>, Share<R>) -> Share<R>,
) -> Result<SecretShare, MpcError> {
    let (x, y) = (R::unwrap(a.value)?, R::unwrap(b.value)?);
    Ok(SecretShare::derived(R::wrap(f(x, y))))
}

fn with_public<R: Variant>(
    _: &Party<R>,
    a: &SecretShare,
    f: impl FnOnce(Share<R>) -> Result<Share<R>, MpcError>,
) -> Result<SecretShare, MpcError> {
    let x = R::unwrap(a.value)?;
    Ok(SecretShare::derived(R::wrap(f(x)?)))
}

fn binary<'a, R: Variant>(
    p: &'a Party<R>,
    a: &SecretShare,
    b: &SecretShare,
    op: Binary,
) -> BoxFuture<'a, Result<SecretShare, MpcError>> {
    let (x, y) = match (R::unwrap(a.value), R::unwrap(b.value)) {
        (Ok(x), Ok(y)) => (x, y),
        (Err(e), _) | (_, Err(e)) => return future::ready(Err(e)).boxed(),
    };
    let running = match op {
        Binary::Multiply => p.multiply(x, y).boxed(),
        Binary::LessThan => p.less_than(x, y).boxed(),
        Binary::GreaterThan => p.greater_than(x, y).boxed(),
        Binary::Equals => p.equals(x, y).boxed(),
        Binary::Compare => p.compare(x, y).boxed(),
        Binary::And => p.and(x, y).boxed(),
        Binary::Or => p.or(x, y).boxed(),
        Binary::Xor => p.xor(x, y).boxed(),
    };
    running
        .map_ok(|share| SecretShare::derived(R::wrap(share)))
        .boxed()
}

fn open<'a, R: Variant>(
    p: &'a Party<R>,
    share: &SecretShare,
) -> BoxFuture<'a, Result<OpenResult, MpcError>> {
    let x = match R::unwrap(share.value) {
        Ok(x) => x,
        Err(e) => return future::ready(Err(e)).boxed(),
    };
    p.open(x)
        .map_ok(move |opening| open_result(p, opening))
        .boxed()
}

fn open_result<R: Ring>(p: &Party<R>, opening: Opening<R>) -> OpenResult {
    let config = p.config();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    OpenResult {
        value: opening.opened,
        proof: Proof {
            kind: "spdz_mac_check".to_string(),
            transcript: opening
                .transcript
                .iter()
                .map(|b| format!("{b:02x}"))
                .join(""),
        },
        metadata: OpenMetadata {
            computation_id: config.computation_id.clone(),
            operation_id: opening.operation,
            protocol: config.protocol,
            parties: p.parties().collect(),
            threshold: config.threshold,
            timestamp,
        },
    }
}
