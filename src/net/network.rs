use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::future;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::tcp::OwnedWriteHalf,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

use crate::net::{
    connection::{Connection, ConnectionError, Receiving, Sending},
    Id, Message, Receiver, Transport, TransportError,
};

/// Peer-2-peer network
///
/// This acts as a single waypoint to all other (connected) parties in the network.
/// Every peer connection gets a reader task forwarding its frames into one
/// inbox, so messages from all peers can be consumed through [`Transport::recv`].
///
/// * `peers`: Writers, one for each peer, sorted by their id, skipping our own id.
/// * `index`: My own id
pub struct Network<W: AsyncWrite + Unpin> {
    index: Id,
    peers: Vec<Peer<W>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Message>>,
}

struct Peer<W: AsyncWrite + Unpin> {
    id: Id,
    writer: Mutex<Sending<W>>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Network<W> {
    /// Build a network from connections ordered by peer id, skipping our own.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<R>(index: Id, connections: Vec<Connection<R, W>>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, inbox) = mpsc::unbounded_channel();
        let peers = connections
            .into_iter()
            .enumerate()
            .map(|(i, conn)| {
                let id = if i < index.0 { Id(i) } else { Id(i + 1) };
                let (rx, writer) = conn.split();
                let alive = Arc::new(AtomicBool::new(true));
                let reader = tokio::spawn(forward(id, rx, tx.clone(), alive.clone()));
                Peer {
                    id,
                    writer: Mutex::new(writer),
                    alive,
                    reader,
                }
            })
            .collect();
        Self {
            index,
            peers,
            inbox: Mutex::new(inbox),
        }
    }

    fn peer(&self, id: Id) -> Result<&Peer<W>, TransportError> {
        if id == self.index {
            return Err(TransportError::SelfAddressed);
        }
        self.peers
            .iter()
            .find(|p| p.id == id)
            .ok_or(TransportError::UnknownParty(id))
    }

    /// Returns the ids of every participant, ourselves included.
    pub fn participants(&self) -> impl Iterator<Item = Id> {
        (0..=self.peers.len()).map(Id)
    }
}

/// Pump frames from one peer into the shared inbox until it disconnects.
async fn forward<R: AsyncRead + Unpin>(
    id: Id,
    mut rx: Receiving<R>,
    inbox: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
) {
    loop {
        match rx.recv::<Message>().await {
            Ok(msg) if msg.sender != id => {
                tracing::warn!(peer = %id, claimed = %msg.sender, "dropping message with forged sender");
            }
            Ok(msg) => {
                if inbox.send(msg).is_err() {
                    break;
                }
            }
            Err(ConnectionError::MalformedMessage(e)) => {
                tracing::warn!(peer = %id, error = %e, "dropping malformed frame");
            }
            Err(ConnectionError::Closed) => {
                tracing::debug!(peer = %id, "peer disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %id, error = %e, "connection failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
}

impl<W: AsyncWrite + Unpin> Drop for Network<W> {
    fn drop(&mut self) {
        for peer in &self.peers {
            peer.reader.abort();
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Transport for Network<W> {
    fn id(&self) -> Id {
        self.index
    }

    fn parties(&self) -> usize {
        self.peers.len() + 1
    }

    fn connected(&self) -> usize {
        1 + self
            .peers
            .iter()
            .filter(|p| p.alive.load(Ordering::Acquire))
            .count()
    }

    #[tracing::instrument(skip_all, fields(me = %self.index, op = %message.operation))]
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let targets: Vec<&Peer<W>> = match message.receiver {
            Receiver::Broadcast => self.peers.iter().collect(),
            Receiver::Party(id) => vec![self.peer(id)?],
        };
        let outgoing = targets.into_iter().map(|peer| {
            let message = &message;
            async move {
                let mut writer = peer.writer.lock().await;
                writer
                    .send(message)
                    .await
                    .map_err(|source| TransportError::Connection { id: peer.id, source })
            }
        });
        future::try_join_all(outgoing).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        let mut inbox = self.inbox.lock().await;
        inbox.recv().await.ok_or(TransportError::Closed)
    }
}

/// Network containing only duplex connections.
/// Used for local testing and single-process deployments.
pub type InMemoryNetwork = Network<WriteHalf<DuplexStream>>;

impl InMemoryNetwork {
    /// Construct a list of networks for each 'peer' in the peer-2-peer network.
    ///
    /// * `player_count`: Size of the network in terms of peers.
    pub fn in_memory(player_count: usize) -> Vec<Self> {
        let mut internet: BTreeMap<(usize, usize), Connection<ReadHalf<DuplexStream>, _>> =
            BTreeMap::new();
        for i in 0..player_count {
            for j in 0..i {
                let (c1, c2) = Connection::in_memory();
                internet.insert((i, j), c1);
                internet.insert((j, i), c2);
            }
        }

        (0..player_count)
            .map(|i| {
                let connections = (0..player_count)
                    .filter(|&j| j != i)
                    .filter_map(|j| internet.remove(&(i, j)))
                    .collect();
                Network::new(Id(i), connections)
            })
            .collect()
    }
}

/// TCP Network based on TCP Streams.
pub type TcpNetwork = Network<OwnedWriteHalf>;

/// First frame on a fresh TCP connection, announcing who dialed.
#[derive(serde::Serialize, serde::Deserialize)]
struct Hello {
    id: Id,
}

impl TcpNetwork {
    /// Construct a TCP-based network among the parties at `addrs`.
    ///
    /// Ids follow the order of `addrs`. We dial every party with a lower id
    /// and accept connections from every party with a higher id, retrying
    /// dials until `patience` runs out.
    ///
    /// * `me`: Our position in `addrs`
    /// * `addrs`: Socket addresses of all parties, ourselves included
    /// * `patience`: How long to keep dialing peers that are not up yet
    pub async fn connect(
        me: Id,
        addrs: &[SocketAddr],
        patience: Duration,
    ) -> Result<Self, TransportError> {
        let n = addrs.len();
        let own = *addrs.get(me.0).ok_or(TransportError::UnknownParty(me))?;
        let io = |id: Id| move |e: std::io::Error| TransportError::Connection {
            id,
            source: ConnectionError::Io(e),
        };
        let listener = tokio::net::TcpListener::bind(own).await.map_err(io(me))?;

        let dials = (0..me.0).map(|j| async move {
            let stream = dial(addrs[j], patience).await.map_err(io(Id(j)))?;
            stream.set_nodelay(true).map_err(io(Id(j)))?;
            let mut conn = Connection::from_tcp(stream);
            conn.send(&Hello { id: me })
                .await
                .map_err(|source| TransportError::Connection { id: Id(j), source })?;
            Ok::<_, TransportError>((Id(j), conn))
        });
        let accepts = async {
            let mut accepted = Vec::new();
            while accepted.len() < n - me.0 - 1 {
                let (stream, _) = listener.accept().await.map_err(io(me))?;
                stream.set_nodelay(true).map_err(io(me))?;
                let mut conn = Connection::from_tcp(stream);
                let hello: Hello = conn
                    .recv()
                    .await
                    .map_err(|source| TransportError::Connection { id: me, source })?;
                if hello.id.0 <= me.0 || hello.id.0 >= n {
                    return Err(TransportError::UnknownParty(hello.id));
                }
                accepted.push((hello.id, conn));
            }
            Ok(accepted)
        };

        let (dialed, accepted) = futures::try_join!(future::try_join_all(dials), accepts)?;
        let mut connections: BTreeMap<Id, _> = dialed.into_iter().chain(accepted).collect();
        if connections.len() != n - 1 {
            return Err(TransportError::Closed);
        }
        let connections = (0..n)
            .filter(|&j| j != me.0)
            .filter_map(|j| connections.remove(&Id(j)))
            .collect();
        tracing::debug!(%me, parties = n, "tcp network established");
        Ok(Network::new(me, connections))
    }
}

async fn dial(addr: SocketAddr, patience: Duration) -> std::io::Result<tokio::net::TcpStream> {
    let deadline = tokio::time::Instant::now() + patience;
    loop {
        match tokio::net::TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if tokio::time::Instant::now() >= deadline => return Err(e),
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
}
