//! Storage node server loop.

use std::path::PathBuf;
use std::sync::Arc;

use pfs_msg::{ErrorKind, NodeRequest, NodeResponse, WireError};
use pfs_transport::{PfsConnection, TransportError};
use tokio::net::TcpListener;

use crate::{BlockStore, NodeError};

/// Accepts framed connections and serves block I/O from a [`BlockStore`].
pub struct NodeServer {
    listener: TcpListener,
    store: Arc<BlockStore>,
}

impl NodeServer {
    /// Binds `addr` and opens the store under `root`.
    pub async fn bind(addr: &str, root: impl Into<PathBuf>) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(addr).await?;
        let store = Arc::new(BlockStore::open(root).await?);
        log::info!(
            "storage node listening on {}",
            listener.local_addr()?
        );
        Ok(NodeServer { listener, store })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, NodeError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop until the listener fails.
    pub async fn run(self) -> Result<(), NodeError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            log::debug!("accepted connection from {peer}");
            let store = self.store.clone();
            tokio::spawn(async move {
                let conn = match PfsConnection::from_stream(stream) {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::error!("failed to set up connection from {peer}: {e}");
                        return;
                    }
                };
                if let Err(e) = serve_connection(store, conn).await {
                    if !e.is_closed() {
                        log::error!("connection from {peer} failed: {e}");
                    }
                }
                log::debug!("connection from {peer} done");
            });
        }
    }
}

async fn serve_connection(
    store: Arc<BlockStore>,
    mut conn: PfsConnection,
) -> Result<(), TransportError> {
    loop {
        let request: NodeRequest = conn.recv().await?;
        let response = handle_request(&store, request).await;
        conn.send(&response).await?;
    }
}

async fn handle_request(store: &BlockStore, request: NodeRequest) -> NodeResponse {
    match request {
        NodeRequest::Ping => NodeResponse::Pong,
        NodeRequest::Read { name, offset, size } => {
            match store.read(&name, offset, size).await {
                Ok(data) => NodeResponse::Data { data },
                Err(e) => error_response(e),
            }
        }
        NodeRequest::Write { name, offset, data } => {
            match store.write(&name, offset, &data).await {
                Ok(count) => NodeResponse::Written { count },
                Err(e) => error_response(e),
            }
        }
        NodeRequest::Delete { name } => match store.delete(&name).await {
            Ok(()) => NodeResponse::Deleted,
            Err(e) => error_response(e),
        },
    }
}

fn error_response(e: NodeError) -> NodeResponse {
    let kind = match &e {
        NodeError::InvalidName(_) => ErrorKind::InvalidArgument,
        _ => ErrorKind::Transport,
    };
    NodeResponse::Error(WireError::new(kind, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_node_serves_block_io() {
        let dir = tempfile::tempdir().unwrap();
        let server = NodeServer::bind("127.0.0.1:0", dir.path()).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let handle = tokio::spawn(server.run());

        let mut conn = PfsConnection::connect(&addr, std::time::Duration::from_secs(5))
            .await
            .unwrap();

        let pong: NodeResponse = conn.call(&NodeRequest::Ping).await.unwrap();
        assert_eq!(pong, NodeResponse::Pong);

        let written: NodeResponse = conn
            .call(&NodeRequest::Write {
                name: "f".into(),
                offset: 0,
                data: b"AAAA".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(written, NodeResponse::Written { count: 4 });

        let data: NodeResponse = conn
            .call(&NodeRequest::Read {
                name: "f".into(),
                offset: 0,
                size: 16,
            })
            .await
            .unwrap();
        assert_eq!(
            data,
            NodeResponse::Data {
                data: b"AAAA".to_vec()
            }
        );

        handle.abort();
    }
}
