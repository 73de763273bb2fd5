//! Metadata server: accept loop, unary handlers and token streams.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pfs_msg::{MetaRequest, MetaResponse, TokenMode, TokenOp, TokenRequest, TokenResponse};
use pfs_transport::{ConnectionReader, PfsConnection, TransportError};
use tokio::net::TcpListener;

use crate::{Catalog, TokenEngine};

/// Interval of the periodic token-table dump at debug log level.
const DUMP_INTERVAL: Duration = Duration::from_secs(10);

struct ServiceState {
    catalog: Catalog,
    engine: TokenEngine,
    next_client_id: AtomicU32,
}

/// The metadata server.
///
/// Every accepted connection starts on the unary surface. A connection
/// that sends `OpenTokenStream` becomes that client's token stream: its
/// read half keeps consuming requests and acknowledgments, while a writer
/// task drains the client's outbox of grants and revocations.
pub struct MetaServer {
    listener: TcpListener,
    state: Arc<ServiceState>,
}

impl MetaServer {
    /// Binds `addr`. `node_count` caps the stripe width of created files.
    pub async fn bind(addr: &str, node_count: u32) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!(
            "metadata server listening on {}, {node_count} storage nodes",
            listener.local_addr()?
        );
        Ok(MetaServer {
            listener,
            state: Arc::new(ServiceState {
                catalog: Catalog::new(node_count),
                engine: TokenEngine::new(),
                next_client_id: AtomicU32::new(1),
            }),
        })
    }

    pub fn local_addr(&self) -> crate::Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop until the listener fails.
    pub async fn run(self) -> crate::Result<()> {
        let dump_state = self.state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DUMP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                dump_state.engine.dump_state();
            }
        });

        loop {
            let (stream, peer) = self.listener.accept().await?;
            log::debug!("accepted connection from {peer}");
            let state = self.state.clone();
            tokio::spawn(async move {
                let conn = match PfsConnection::from_stream(stream) {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::error!("failed to set up connection from {peer}: {e}");
                        return;
                    }
                };
                if let Err(e) = serve_connection(state, conn).await {
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
    state: Arc<ServiceState>,
    mut conn: PfsConnection,
) -> Result<(), TransportError> {
    loop {
        let request: MetaRequest = conn.recv().await?;

        if let MetaRequest::OpenTokenStream { client_id } = request {
            conn.send(&MetaResponse::Ok).await?;
            return serve_token_stream(state, conn, client_id).await;
        }

        let response = handle_unary(&state, request);
        conn.send(&response).await?;
    }
}

fn handle_unary(state: &ServiceState, request: MetaRequest) -> MetaResponse {
    match request {
        MetaRequest::Ping => MetaResponse::Pong,
        MetaRequest::Initialize => {
            let client_id = state.next_client_id.fetch_add(1, Ordering::SeqCst);
            log::info!("assigned client id {client_id}");
            MetaResponse::ClientId { client_id }
        }
        MetaRequest::Create { name, stripe_width } => {
            reply(state.catalog.create(&name, stripe_width).map(|_| MetaResponse::Ok))
        }
        MetaRequest::Fetch { name } => reply(
            state
                .catalog
                .fetch(&name)
                .map(|meta| MetaResponse::Metadata { meta }),
        ),
        MetaRequest::Update { name, size, mtime } => reply(
            state
                .catalog
                .update(&name, size, mtime)
                .map(|_| MetaResponse::Ok),
        ),
        MetaRequest::Delete { name } => {
            let result = state
                .catalog
                .remove_if(&name, || !state.engine.file_has_tokens(&name))
                .map(|_| {
                    state.engine.forget_file(&name);
                    MetaResponse::Ok
                });
            reply(result)
        }
        MetaRequest::Shutdown { client_id } => {
            state.engine.release_client(client_id);
            log::info!("client {client_id} shut down");
            MetaResponse::Ok
        }
        MetaRequest::OpenTokenStream { .. } => unreachable!("handled by the connection loop"),
    }
}

fn reply(result: crate::Result<MetaResponse>) -> MetaResponse {
    match result {
        Ok(response) => response,
        Err(e) => {
            log::debug!("request failed: {e}");
            MetaResponse::Error(e.to_wire())
        }
    }
}

/// Serves one client's token stream until the client closes it.
///
/// Token acquisitions are spawned so the read loop keeps consuming
/// acknowledgments while a grant is waiting on revocations; the client-side
/// discipline of one outstanding request at a time makes this safe.
async fn serve_token_stream(
    state: Arc<ServiceState>,
    conn: PfsConnection,
    client_id: u32,
) -> Result<(), TransportError> {
    let mut outbox = state.engine.register_client(client_id);
    let (mut reader, mut writer) = conn.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            if let Err(e) = writer.send(&message).await {
                log::debug!("token stream writer for client {client_id} stopped: {e}");
                break;
            }
        }
    });

    let result = token_stream_loop(&state, &mut reader, client_id).await;

    // Stream gone, for whatever reason: treat as client shutdown.
    state.engine.release_client(client_id);
    writer_task.abort();

    match result {
        Err(e) if !e.is_closed() => Err(e),
        _ => Ok(()),
    }
}

async fn token_stream_loop(
    state: &Arc<ServiceState>,
    reader: &mut ConnectionReader,
    client_id: u32,
) -> Result<(), TransportError> {
    loop {
        let request: TokenRequest = reader.recv().await?;
        if request.client_id != client_id {
            log::warn!(
                "client {client_id} sent a request claiming id {}",
                request.client_id
            );
        }

        match request.op {
            TokenOp::Read | TokenOp::Write => {
                let mode = match request.op {
                    TokenOp::Read => TokenMode::Read,
                    _ => TokenMode::Write,
                };
                let state = state.clone();
                tokio::spawn(async move {
                    state
                        .engine
                        .acquire(client_id, &request.name, mode, request.start, request.end)
                        .await;
                });
            }
            TokenOp::Ack => {
                state
                    .engine
                    .ack(client_id, &request.name, request.start, request.end);
            }
            TokenOp::Close => {
                state.engine.release_file(client_id, &request.name);
                state
                    .engine
                    .notify(client_id, TokenResponse::close_ack(client_id, &request.name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfs_msg::ErrorKind;
    use std::time::Duration;

    async fn start_server() -> (String, tokio::task::JoinHandle<crate::Result<()>>) {
        let server = MetaServer::bind("127.0.0.1:0", 3).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let handle = tokio::spawn(server.run());
        (addr, handle)
    }

    async fn connect(addr: &str) -> PfsConnection {
        PfsConnection::connect(addr, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_unary_surface() {
        let (addr, handle) = start_server().await;
        let mut conn = connect(&addr).await;

        let pong: MetaResponse = conn.call(&MetaRequest::Ping).await.unwrap();
        assert_eq!(pong, MetaResponse::Pong);

        let id: MetaResponse = conn.call(&MetaRequest::Initialize).await.unwrap();
        assert_eq!(id, MetaResponse::ClientId { client_id: 1 });

        let created: MetaResponse = conn
            .call(&MetaRequest::Create {
                name: "t".into(),
                stripe_width: 3,
            })
            .await
            .unwrap();
        assert_eq!(created, MetaResponse::Ok);

        let dup: MetaResponse = conn
            .call(&MetaRequest::Create {
                name: "t".into(),
                stripe_width: 3,
            })
            .await
            .unwrap();
        match dup {
            MetaResponse::Error(e) => assert_eq!(e.kind, ErrorKind::AlreadyExists),
            other => panic!("expected error, got {other:?}"),
        }

        let fetched: MetaResponse = conn
            .call(&MetaRequest::Fetch { name: "t".into() })
            .await
            .unwrap();
        match fetched {
            MetaResponse::Metadata { meta } => {
                assert_eq!(meta.name, "t");
                assert_eq!(meta.stripe_width, 3);
            }
            other => panic!("expected metadata, got {other:?}"),
        }

        handle.abort();
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_token_stream_grant_and_close() {
        let (addr, handle) = start_server().await;

        let mut unary = connect(&addr).await;
        let created: MetaResponse = unary
            .call(&MetaRequest::Create {
                name: "f".into(),
                stripe_width: 1,
            })
            .await
            .unwrap();
        assert_eq!(created, MetaResponse::Ok);

        let mut stream = connect(&addr).await;
        let ok: MetaResponse = stream
            .call(&MetaRequest::OpenTokenStream { client_id: 7 })
            .await
            .unwrap();
        assert_eq!(ok, MetaResponse::Ok);

        stream
            .send(&TokenRequest::acquire(7, 1, "f", TokenMode::Write, 0, 99))
            .await
            .unwrap();
        let grant: TokenResponse = stream.recv().await.unwrap();
        assert_eq!(grant, TokenResponse::grant(7, "f", TokenMode::Write, 0, 99));

        // Delete must fail while the token lives.
        let busy: MetaResponse = unary
            .call(&MetaRequest::Delete { name: "f".into() })
            .await
            .unwrap();
        match busy {
            MetaResponse::Error(e) => assert_eq!(e.kind, ErrorKind::Busy),
            other => panic!("expected busy, got {other:?}"),
        }

        stream.send(&TokenRequest::close(7, 1, "f")).await.unwrap();
        let ack: TokenResponse = stream.recv().await.unwrap();
        assert_eq!(ack, TokenResponse::close_ack(7, "f"));

        let deleted: MetaResponse = unary
            .call(&MetaRequest::Delete { name: "f".into() })
            .await
            .unwrap();
        assert_eq!(deleted, MetaResponse::Ok);

        handle.abort();
    }
}
