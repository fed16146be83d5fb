//! Framed connections over anything that implements `AsyncRead`/`AsyncWrite`.
//!
//! Messages are serialized with bincode and length delimited. There is
//! built-in support for TCP and in-memory duplex-based connections.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
};

/// Buffer size of in-memory pipes.
const DUPLEX_BUFFER: usize = 1 << 16;

pub struct Connection<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: FramedRead<R, LengthDelimitedCodec>,
    writer: FramedWrite<W, LengthDelimitedCodec>,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Deserialization failed")]
    MalformedMessage(#[from] bincode::Error),
    #[error("No message to receive")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// Construct a new connection from a reader and writer
    ///
    /// * `reader`: Reader to receive messages from
    /// * `writer`: Writer to send messages to
    pub fn new(reader: R, writer: W) -> Self {
        let codec = LengthDelimitedCodec::new();
        let reader = FramedRead::new(reader, codec.clone());
        let writer = FramedWrite::new(writer, codec);

        Connection { reader, writer }
    }

    /// Send a message, waiting until it is flushed
    ///
    /// * `msg`: Message to send
    pub async fn send(&mut self, msg: &impl serde::Serialize) -> Result<(), ConnectionError> {
        send_frame(&mut self.writer, msg).await
    }

    /// Receive a message waiting for arrival
    pub async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, ConnectionError> {
        recv_frame(&mut self.reader).await
    }

    /// Split into independently owned halves, so reading and writing can
    /// happen from different tasks.
    pub fn split(self) -> (Receiving<R>, Sending<W>) {
        (Receiving(self.reader), Sending(self.writer))
    }
}

async fn send_frame<W: AsyncWrite + Unpin>(
    writer: &mut FramedWrite<W, LengthDelimitedCodec>,
    msg: &impl serde::Serialize,
) -> Result<(), ConnectionError> {
    let msg = bincode::serialize(msg)?;
    writer.send(Bytes::from(msg)).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            ConnectionError::Closed
        }
        _ => ConnectionError::Io(e),
    })
}

async fn recv_frame<R: AsyncRead + Unpin, T: serde::de::DeserializeOwned>(
    reader: &mut FramedRead<R, LengthDelimitedCodec>,
) -> Result<T, ConnectionError> {
    let buf = reader.next().await.ok_or(ConnectionError::Closed)??;
    let buf = std::io::Cursor::new(buf);
    bincode::deserialize_from(buf).map_err(ConnectionError::MalformedMessage)
}

pub struct Receiving<R: AsyncRead>(FramedRead<R, LengthDelimitedCodec>);
pub struct Sending<W: AsyncWrite>(FramedWrite<W, LengthDelimitedCodec>);

impl<R: AsyncRead + Unpin> Receiving<R> {
    pub async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, ConnectionError> {
        recv_frame(&mut self.0).await
    }
}

impl<W: AsyncWrite + Unpin> Sending<W> {
    pub async fn send(&mut self, msg: &impl serde::Serialize) -> Result<(), ConnectionError> {
        send_frame(&mut self.0, msg).await
    }
}

pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;
impl TcpConnection {
    /// New TCP-based connection from a stream
    ///
    /// * `stream`: TCP stream to use
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

/// Connection to a in-memory data stream.
/// This always have a corresponding other connection in the same process.
pub type DuplexConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
impl DuplexConnection {
    /// Construct a duplex/in-memory connection pair
    pub fn in_memory() -> (Self, Self) {
        let (s1, s2) = tokio::io::duplex(DUPLEX_BUFFER);

        let (r1, w1) = tokio::io::split(s1);
        let (r2, w2) = tokio::io::split(s2);

        (Self::new(r1, w1), Self::new(r2, w2))
    }
}

#[cfg(test)]
mod test {
    use std::net::SocketAddrV4;

    use tokio::net::TcpListener;

    use super::*;
    use crate::net::{Id, Message, OperationId, Payload};

    fn reveal(sender: usize, value: u128) -> Message {
        Message::broadcast(
            Id(sender),
            OperationId::new("open", 3),
            Payload::ReconstructReveal { value },
        )
    }

    async fn ping_pong<R, W>(mut a: Connection<R, W>, mut b: Connection<R, W>)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let first = async move {
            a.send(&reveal(0, 1)).await.unwrap();
            a.send(&reveal(0, u128::MAX)).await.unwrap();
            let answer: Message = a.recv().await.unwrap();
            assert_eq!(answer, reveal(1, 7));
        };
        let second = async move {
            let msg: Message = b.recv().await.unwrap();
            assert_eq!(msg, reveal(0, 1));
            let msg: Message = b.recv().await.unwrap();
            assert_eq!(msg, reveal(0, u128::MAX));
            b.send(&reveal(1, 7)).await.unwrap();
        };
        futures::join!(first, second);
    }

    #[tokio::test]
    async fn in_memory() {
        let (a, b) = DuplexConnection::in_memory();
        ping_pong(a, b).await;
    }

    #[tokio::test]
    async fn closed_after_drop() {
        let (conn1, conn2) = DuplexConnection::in_memory();
        drop(conn1);
        let (mut rx, _tx) = conn2.split();
        let res: Result<Message, _> = rx.recv().await;
        assert!(matches!(res, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn malformed_frame() {
        let (mut conn1, mut conn2) = DuplexConnection::in_memory();
        conn1.send(&1u8).await.unwrap();
        let res: Result<Message, _> = conn2.recv().await;
        assert!(matches!(res, Err(ConnectionError::MalformedMessage(_))));
    }

    #[tokio::test]
    async fn tcp() {
        let addr = "127.0.0.1:4321".parse::<SocketAddrV4>().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let a = Connection::from_tcp(dialed.unwrap());
        let b = Connection::from_tcp(accepted.unwrap().0);
        ping_pong(a, b).await;
    }
}
