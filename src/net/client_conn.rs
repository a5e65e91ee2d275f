//! Per-downstream-client reader/writer tasks (spec §5: "2 tasks per client
//! session: a reader... and a writer").
//!
//! Grounded on the teacher's `socket::client_conn::SocketClientConn`: the
//! read half decodes frames and forwards them as core events; the write
//! half drains an outbound channel. The core never touches the socket
//! directly — only this module does.

use std::net::SocketAddr;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::events::RouterEvent;
use crate::message::{LineCodec, Message};
use crate::session::OutboundHandle;

/// Owns the reader/writer tasks for one accepted client socket.
#[derive(Debug)]
pub struct ClientConn {
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl ClientConn {
    /// Spawn the reader and writer tasks for a freshly-accepted socket and
    /// announce the connection to the core via `router_events`.
    ///
    /// Returns the connection handle (for later cancellation) and the
    /// [`OutboundHandle`] the core will store in the new `ClientSession`.
    pub fn spawn(
        id: u64,
        addr: SocketAddr,
        stream: TcpStream,
        router_events: UnboundedSender<RouterEvent>,
    ) -> (ClientConn, OutboundHandle) {
        let framed = Framed::new(stream, LineCodec::new());
        let (mut sink, mut stream) = framed.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let queued_bytes = Arc::new(AtomicI64::new(0));
        let outbound = OutboundHandle::new(tx, queued_bytes.clone());

        let write_events = router_events.clone();

        let read_handle = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(msg)) => {
                        if router_events
                            .send(RouterEvent::ClientLine { id, msg })
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("[net] client {id} read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            let _ = router_events.send(RouterEvent::ClientDisconnected { id });
        });

        let write_handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let approx_len = msg.to_line().len() as i64 + 2;
                let started = Instant::now();
                if sink.send(msg).await.is_err() {
                    break;
                }
                queued_bytes.fetch_sub(approx_len, std::sync::atomic::Ordering::Relaxed);
                let _ = write_events.send(RouterEvent::WriteLatencySample {
                    peer_id: id,
                    latency: started.elapsed(),
                });
            }
        });

        (
            ClientConn {
                read_handle,
                write_handle,
            },
            outbound,
        )
    }

    /// Cancel both tasks (spec §5: "Closing a session cancels its reader
    /// and writer tasks; any messages still in its outbound queue are
    /// discarded").
    pub fn disconnect(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}
