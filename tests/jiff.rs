use std::{
    fs::File,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use mpcore::{
    algebra::Fp127,
    jiff::{Computation, Preprocessing, SecretShare},
    net::{
        network::{InMemoryNetwork, TcpNetwork},
        Id, Transport,
    },
    schemes::spdz::preprocessing::{write_material, TrustedDealer},
    MpcConfig, MpcError, ProtocolType,
};

fn cluster(config: &MpcConfig) -> Vec<Arc<Computation>> {
    InMemoryNetwork::in_memory(config.num_parties)
        .into_iter()
        .zip(Preprocessing::trusted_dealer(config))
        .map(|(net, pre)| {
            Arc::new(Computation::configure(config.clone(), Arc::new(net), Some(pre)).unwrap())
        })
        .collect()
}

/// Every party inputs `inputs[i]`; returns everyone's shares in party order.
async fn share_all(c: &Computation, inputs: &[i64]) -> Result<Vec<SecretShare>, MpcError> {
    let mut shares = Vec::new();
    for (i, v) in inputs.iter().enumerate() {
        let share = if c.id() == Id(i) {
            c.share(*v).await?
        } else {
            c.receive_share(Id(i)).await?
        };
        shares.push(share);
    }
    Ok(shares)
}

async fn auction(config: MpcConfig) {
    let bids = [17i64, 42, 23];
    let handles: Vec<_> = cluster(&config)
        .into_iter()
        .map(|c| {
            tokio::spawn(async move {
                c.preprocess().await?;
                let s = share_all(&c, &bids).await?;
                let total = c.add(&c.add(&s[0], &s[1])?, &s[2])?;
                let product = c.multiply(&s[0], &s[2]).await?;
                let first_wins = c.greater_than(&s[0], &s[1]).await?;
                let second_wins = c.greater_than(&s[1], &s[2]).await?;
                let ordering = c.compare(&s[2], &s[0]).await?;
                let same = c.equals(&s[1], &s[1]).await?;
                let either = c.or(&first_wins, &second_wins).await?;
                let mut out = Vec::new();
                for share in [total, product, first_wins, second_wins, ordering, same, either] {
                    out.push(c.open(&share).await?.value.signed);
                }
                Ok::<_, MpcError>(out)
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), vec![82, 391, 0, 1, 1, 1, 1]);
    }
}

#[tokio::test]
async fn auction_spdz2k() {
    auction(MpcConfig::spdz2k(3).with_bit_length(32).with_batch_size(1000)).await;
}

#[tokio::test]
async fn auction_mascot() {
    auction(MpcConfig::mascot(3).with_bit_length(32).with_batch_size(1000)).await;
}

#[tokio::test]
async fn configuration_from_json() {
    let config = MpcConfig::from_json(
        r#"{"numParties": 2, "threshold": 2, "bitLength": 16, "protocol": "MASCOT", "messageTimeout": 2000}"#,
    )
    .unwrap();
    assert_eq!(config.protocol, ProtocolType::Mascot);
    let parties = cluster(&config);
    assert!(parties.iter().all(|c| c.is_quorum_ready()));
    assert_eq!(parties[1].config().message_timeout, Duration::from_secs(2));
}

#[tokio::test]
async fn material_from_files() {
    let config = MpcConfig::mascot(2);
    let dealer = TrustedDealer::<Fp127>::new(2, config.bit_length);
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..2).map(|i| dir.path().join(format!("p{i}.bin"))).collect();
    let mut files: Vec<File> = paths.iter().map(|p| File::create(p).unwrap()).collect();
    write_material(&mut files, &dealer.deal(1, 0, 1)).unwrap();
    drop(files);

    let networks = InMemoryNetwork::in_memory(2);
    let mut handles = Vec::new();
    for (net, path) in networks.into_iter().zip(paths) {
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let pre = Preprocessing::load(ProtocolType::Mascot, &path).await?;
            let c = Computation::configure(config, Arc::new(net), Some(pre))?;
            let s = share_all(&c, &[6, 7]).await?;
            let z = c.multiply(&s[0], &s[1]).await?;
            let opened = c.open(&z).await?.value.signed;
            // The files held exactly one triple.
            let again = c.multiply(&z, &z).await;
            Ok::<_, MpcError>((opened, again.is_err()))
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), (42, true));
    }
}

#[tokio::test]
async fn over_tcp() {
    let addrs: Vec<SocketAddr> = (0..3)
        .map(|i| SocketAddr::from((Ipv4Addr::LOCALHOST, 47420 + i)))
        .collect();
    let config = MpcConfig::spdz2k(3);
    let preprocessing = Preprocessing::trusted_dealer(&config);
    let handles: Vec<_> = preprocessing
        .into_iter()
        .enumerate()
        .map(|(i, pre)| {
            let addrs = addrs.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let net = TcpNetwork::connect(Id(i), &addrs, Duration::from_secs(5)).await?;
                assert_eq!(net.parties(), 3);
                let c = Computation::configure(config, Arc::new(net), Some(pre))?;
                c.preprocess().await?;
                let s = share_all(&c, &[-3, 5, 0]).await?;
                let z = c.multiply(&s[0], &s[1]).await?;
                Ok::<_, MpcError>(c.open(&z).await?.value.signed)
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), -15);
    }
}
