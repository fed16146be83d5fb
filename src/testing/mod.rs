//! Tools for running a whole computation inside one test.

use std::{future::Future, sync::Arc};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::{
    algebra::Ring,
    config::MpcConfig,
    net::{network::InMemoryNetwork, Transport},
    schemes::spdz::{
        party::Party,
        preprocessing::{PreprocessingSource, Pool, TrustedDealer},
    },
};

fn in_memory(n: usize) -> Vec<Arc<dyn Transport>> {
    InMemoryNetwork::in_memory(n)
        .into_iter()
        .map(|n| Arc::new(n) as Arc<dyn Transport>)
        .collect()
}

/// `n` parties on an in-memory network, fed by one trusted dealer.
pub struct Cluster<R: Ring> {
    pub parties: Vec<Arc<Party<R>>>,
}

impl<R: Ring> Cluster<R> {
    /// Parties drawing on demand, each with one batch already generated.
    pub async fn new(config: MpcConfig) -> Self {
        let transports = in_memory(config.num_parties);
        Self::over(config, transports).await
    }

    /// Like [`Cluster::new`], over the given transports.
    pub async fn over(config: MpcConfig, transports: Vec<Arc<dyn Transport>>) -> Self {
        let dealer = Arc::new(TrustedDealer::<R>::with_rng(
            config.num_parties,
            config.bit_length,
            ChaCha20Rng::seed_from_u64(0xdea1),
        ));
        let sources = dealer
            .sources()
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn PreprocessingSource<R>>)
            .collect();
        let cluster = Self::assemble(config, transports, sources);
        for party in &cluster.parties {
            party.replenish().await.unwrap();
        }
        cluster
    }

    /// Parties with a fixed stock of material and nothing more.
    pub async fn with_material(config: MpcConfig, triples: usize, bits: usize, masks: usize) -> Self {
        let dealer = TrustedDealer::<R>::new(config.num_parties, config.bit_length);
        let sources = dealer
            .deal(triples, bits, masks)
            .into_iter()
            .map(|m| Arc::new(Pool::new(m)) as Arc<dyn PreprocessingSource<R>>)
            .collect();
        let transports = in_memory(config.num_parties);
        Self::assemble(config, transports, sources)
    }

    fn assemble(
        config: MpcConfig,
        transports: Vec<Arc<dyn Transport>>,
        sources: Vec<Arc<dyn PreprocessingSource<R>>>,
    ) -> Self {
        let parties = transports
            .into_iter()
            .zip(sources)
            .map(|(transport, source)| {
                let party = Party::new(config.clone(), transport).unwrap();
                Arc::new(party.with_preprocessing(source))
            })
            .collect();
        Self { parties }
    }

    /// Run `prg` on every party concurrently and collect the results in
    /// party order.
    pub async fn run<T, P, F>(&self, prg: P) -> Vec<T>
    where
        T: Send + 'static,
        P: Fn(Arc<Party<R>>) -> F,
        F: Future<Output = T> + Send + 'static,
    {
        let handles: Vec<_> = self
            .parties
            .iter()
            .map(|p| tokio::spawn(prg(p.clone())))
            .collect();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|res| res.unwrap())
            .collect()
    }
}
