//! Events flowing into the single core routing task (spec §5: "mutation of
//! router-global state happens only at task yield points... the only
//! observable interleaving points").
//!
//! Every reader, ticker, and HTTP handler talks to the core exclusively by
//! sending a [`RouterEvent`] down one channel; nothing else ever touches
//! the cache, client table, or filter flags directly (spec §9 redesign
//! guidance: "a single router-context value owned by the event-loop task").

use std::net::SocketAddr;

use tokio::sync::oneshot;

use crate::message::Message;
use crate::net::client_conn::ClientConn;
use crate::session::OutboundHandle;

/// A command issued by an HTTP handler that needs to mutate core state and
/// get a result back.
#[derive(Debug)]
pub enum Command {
    /// `POST /api/disconnect`.
    Disconnect { client_id: u64 },
    /// `POST /api/upstream`: switch to a new target.
    SwitchUpstream {
        /// New upstream host.
        host: String,
        /// New upstream port.
        port: u16,
        /// New upstream password.
        password: String,
    },
    /// `GET /api/filter/{elevation,traffic}/{enable,disable}`.
    SetFilter {
        /// Which filter to change.
        which: FilterName,
        /// New state.
        enabled: bool,
    },
    /// `POST /api/blocklist/add`.
    BlocklistAdd {
        /// CIDR to add to the deny list.
        cidr: String,
    },
    /// `POST /api/blocklist/remove`.
    BlocklistRemove {
        /// CIDR to remove from the deny list.
        cidr: String,
    },
    /// `POST /api/vpilotprint/message`: inject an operator message as if it
    /// came from upstream, for display-only keywords (e.g. a print banner).
    VpilotPrintMessage {
        /// Free-text message to forward to every client.
        text: String,
    },
    /// `GET /api/stats`.
    GetStats,
    /// `GET /api/clients`.
    GetClients,
    /// `GET /api/routerinfo`.
    GetRouterInfo,
    /// `GET /api/upstream`.
    GetUpstream,
    /// `GET /api/sharedinfo`.
    GetSharedInfo,
    /// `GET /api/blocklist`.
    GetBlocklist,
}

/// Which runtime filter an HTTP `SetFilter` command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterName {
    /// Elevation-injection filter.
    Elevation,
    /// Traffic/TCAS filter.
    Traffic,
}

/// Result of applying a [`Command`], sent back over a oneshot channel.
#[derive(Debug)]
pub enum CommandResult {
    /// Succeeded, with a human-readable confirmation.
    Ok(String),
    /// Failed, with a human-readable reason (never a raw `Debug` dump).
    Err(String),
    /// Succeeded, carrying a JSON payload for a `GET` query.
    Json(serde_json::Value),
}

/// Everything that can happen to the router core.
#[derive(Debug)]
pub enum RouterEvent {
    /// A new TCP client was accepted and given a session id.
    ClientConnected {
        /// Newly-assigned session id.
        id: u64,
        /// Peer address.
        addr: SocketAddr,
        /// Handle to push outbound lines to this client's writer task.
        outbound: OutboundHandle,
        /// Owns the reader/writer tasks; the core holds this so an
        /// operator-initiated disconnect can abort them directly.
        conn: ClientConn,
    },
    /// A line arrived from a client.
    ClientLine {
        /// Session id this line came from.
        id: u64,
        /// The parsed message.
        msg: Message,
    },
    /// A client's socket closed (EOF, error, or operator command already
    /// tore down the writer).
    ClientDisconnected {
        /// Session id.
        id: u64,
    },
    /// The upstream dial succeeded and its reader/writer tasks are running.
    UpstreamConnected {
        /// Handle to push outbound lines to the upstream writer task.
        outbound: OutboundHandle,
    },
    /// A line arrived from the upstream.
    UpstreamLine {
        /// The parsed message.
        msg: Message,
    },
    /// The upstream socket closed.
    UpstreamDisconnected,
    /// A writer task finished flushing one message to its socket; `peer_id`
    /// is the client's session id, or 0 for the upstream writer (SPEC_FULL
    /// §A.6: the write-latency samples behind `/api/stats`).
    WriteLatencySample {
        /// Session id, or 0 for upstream.
        peer_id: u64,
        /// How long the write took.
        latency: std::time::Duration,
    },
    /// FRDP ping ticker fired: send PING to every identified peer.
    FrdpPingTick,
    /// FRDP router-info ticker fired: broadcast ROUTERINFO.
    FrdpRouterInfoTick,
    /// Operator status-display ticker fired.
    StatusTick,
    /// The short grace window for a pre-welcome FRDP `AUTH` line has passed;
    /// finalize the access check for this client if it hasn't already
    /// been finalized by an earlier non-AUTH line.
    AccessGraceExpired {
        /// Session id.
        id: u64,
    },
    /// The welcome's START window (spec §4.3 step 6, default 2s) elapsed;
    /// finish the welcome burst for this client regardless of what arrived.
    WelcomeStartTimeout {
        /// Session id.
        id: u64,
    },
    /// The 500ms pause after an `exit` reply elapsed; close the session.
    CloseAfterExit {
        /// Session id.
        id: u64,
    },
    /// An HTTP handler is requesting a state mutation.
    HttpCommand(Command, oneshot::Sender<CommandResult>),
}
