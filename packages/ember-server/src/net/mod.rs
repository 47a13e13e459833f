//! TCP acceptor: listens on the configured address, assigns
//! each accepted connection an id, and runs its read/respond loop.

use std::sync::Arc;
use std::time::Duration;

use ember_core::RespCodec;
use futures::{SinkExt, StreamExt};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::connection::ConnectionId;
use crate::dispatcher::Dispatcher;

const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the accept loop until `shutdown` fires. Closing `shutdown` causes
/// the accept loop to exit; active connections are left to close on client
/// disconnect or their next read failure.
pub async fn serve(
    bind_addr: &str,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    connections: Arc<crate::connection::ConnectionRegistry>,
    mut shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind((bind_addr, port)).await?;
    info!(bind_addr, port, "emberdb listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                if let Err(err) = configure_keepalive(&socket) {
                    warn!(%err, %peer, "failed to configure tcp keepalive");
                }
                let conn = connections.register();
                let dispatcher = Arc::clone(&dispatcher);
                let connections = Arc::clone(&connections);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(socket, conn, dispatcher).await {
                        warn!(%err, conn, "connection loop ended with an error");
                    }
                    connections.deregister(conn);
                });
            }
            _ = &mut shutdown => {
                info!("accept loop shutting down");
                return Ok(());
            }
        }
    }
}

fn configure_keepalive(socket: &TcpStream) -> std::io::Result<()> {
    let sock_ref = SockRef::from(socket);
    sock_ref.set_keepalive(true)?;
    sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_interval(KEEPALIVE_INTERVAL))?;
    Ok(())
}

/// Per-connection read/respond loop:
/// - read the next framed command; a clean `Eof` exits quietly.
/// - invoke the dispatcher; a handler-side `Eof` (e.g. `QUIT`) exits
///   quietly, any other error writes a `-Error <message>\r\n` frame.
/// - write a successful response, chunked if larger than 1024 bytes; a
///   zero-length response writes nothing.
async fn handle_connection(socket: TcpStream, conn: ConnectionId, dispatcher: Arc<Dispatcher>) -> Result<(), ember_core::Error> {
    let mut framed = Framed::new(socket, RespCodec::new());

    loop {
        let tokens = match framed.next().await {
            Some(Ok(tokens)) => tokens,
            Some(Err(err)) if err.is_eof() => return Ok(()),
            Some(Err(err)) => {
                // Framing is desynchronized past this point; report and close.
                write_chunked(&mut framed, &err.to_resp_frame()).await?;
                return Ok(());
            }
            None => return Ok(()),
        };

        match dispatcher.handle(tokens, Some(conn), false, false).await {
            Ok(response) if response.is_empty() => {}
            Ok(response) => write_chunked(&mut framed, &response).await?,
            Err(err) if err.is_eof() => return Ok(()),
            Err(err) => write_chunked(&mut framed, &err.to_resp_frame()).await?,
        }
    }
}

async fn write_chunked(framed: &mut Framed<TcpStream, RespCodec>, bytes: &[u8]) -> Result<(), ember_core::Error> {
    for chunk in ember_core::resp::chunk_response(bytes) {
        framed.send(chunk.to_vec()).await?;
    }
    Ok(())
}
