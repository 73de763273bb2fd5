//! TCP connection wrapper around the frame codec.

use std::time::Duration;

use binrw::prelude::*;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::frame::{read_frame, write_frame};
use crate::TransportError;

/// One framed PFS connection.
///
/// A connection is used either request/response (`call`) or split into
/// independent halves for full-duplex streams such as the token stream.
pub struct PfsConnection {
    stream: TcpStream,
}

impl PfsConnection {
    /// Connects to `addr` with a deadline.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout(addr.to_string()))??;
        stream.set_nodelay(true)?;
        log::debug!("connected to {addr}");
        Ok(PfsConnection { stream })
    }

    /// Wraps an accepted stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        Ok(PfsConnection { stream })
    }

    pub fn peer_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Ok(self.stream.peer_addr()?)
    }

    pub async fn send<M>(&mut self, message: &M) -> Result<(), TransportError>
    where
        M: for<'a> BinWrite<Args<'a> = ()>,
    {
        write_frame(&mut self.stream, message).await
    }

    pub async fn recv<M>(&mut self) -> Result<M, TransportError>
    where
        M: for<'a> BinRead<Args<'a> = ()>,
    {
        read_frame(&mut self.stream).await
    }

    /// Sends one request and awaits its response.
    pub async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, TransportError>
    where
        Req: for<'a> BinWrite<Args<'a> = ()>,
        Resp: for<'a> BinRead<Args<'a> = ()>,
    {
        self.send(request).await?;
        self.recv().await
    }

    /// Splits into an independently owned reader and writer, for streams
    /// that are read and written from different tasks.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        let (read, write) = self.stream.into_split();
        (ConnectionReader { read }, ConnectionWriter { write })
    }
}

/// Receiving half of a split [`PfsConnection`].
pub struct ConnectionReader {
    read: OwnedReadHalf,
}

impl ConnectionReader {
    pub async fn recv<M>(&mut self) -> Result<M, TransportError>
    where
        M: for<'a> BinRead<Args<'a> = ()>,
    {
        read_frame(&mut self.read).await
    }
}

/// Sending half of a split [`PfsConnection`].
pub struct ConnectionWriter {
    write: OwnedWriteHalf,
}

impl ConnectionWriter {
    pub async fn send<M>(&mut self, message: &M) -> Result<(), TransportError>
    where
        M: for<'a> BinWrite<Args<'a> = ()>,
    {
        write_frame(&mut self.write, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfs_msg::{MetaRequest, MetaResponse};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_call_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = PfsConnection::from_stream(stream).unwrap();
            let req: MetaRequest = conn.recv().await.unwrap();
            assert_eq!(req, MetaRequest::Ping);
            conn.send(&MetaResponse::Pong).await.unwrap();
        });

        let mut conn = PfsConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let resp: MetaResponse = conn.call(&MetaRequest::Ping).await.unwrap();
        assert_eq!(resp, MetaResponse::Pong);
        server.await.unwrap();
    }
}
