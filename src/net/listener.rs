//! Acceptor task: one per listening port (spec §5).
//!
//! Grounded on the teacher's `socket::server::SocketServer::accept_loop`:
//! bind once, then loop accepting sockets and handing each one to
//! [`crate::net::client_conn::ClientConn::spawn`], announcing it to the
//! core via the shared event channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::events::RouterEvent;
use crate::net::client_conn::ClientConn;

/// Monotonic, 1-up session id generator shared by the acceptor and (if
/// ever needed) other connection sources.
#[derive(Debug, Default)]
pub struct SessionIdGen(AtomicU64);

impl SessionIdGen {
    /// Allocate the next session id, starting from 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Binds the listen port and spawns the accept loop.
///
/// Connections this task spawns are deliberately "fire and forget": each
/// accepted socket gets its own [`ClientConn`], and the core learns about
/// it (and about its eventual disconnect) purely through events, never
/// through a handle this function holds onto.
pub async fn serve(
    port: u16,
    router_events: UnboundedSender<RouterEvent>,
    ids: Arc<SessionIdGen>,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding listen port {port}"))?;
    log::info!("[net] listening for clients on 0.0.0.0:{port}");

    let handle = tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("[net] accept error: {e}");
                    continue;
                }
            };
            let id = ids.next();
            log::info!("[net] client {id} connected from {addr}");
            let (conn, outbound) =
                ClientConn::spawn(id, addr, stream, router_events.clone());
            if router_events
                .send(RouterEvent::ClientConnected {
                    id,
                    addr,
                    outbound,
                    conn,
                })
                .is_err()
            {
                break;
            }
        }
    });

    Ok(handle)
}
