//! Per-downstream-client session state machine (spec §4.3).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use uuid::Uuid;

use crate::access::AccessLevel;
use crate::filters::NolongOverride;
use crate::message::Message;

use super::OutboundHandle;

/// States of the per-client state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Just accepted, access check not yet run.
    Connected,
    /// Access check passed; welcome burst not yet started.
    Accepted,
    /// Welcome burst in progress.
    Welcoming,
    /// Welcome complete (or abandoned because upstream died mid-burst);
    /// normal routing applies.
    Ready,
    /// Terminal: socket closed, session removed from the table.
    Closed,
}

/// Everything peculiar to a peer-router session (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct PeerRouterInfo {
    /// Stable UUID derived by the peer at its own startup.
    pub uuid: Option<Uuid>,
    /// FRDP protocol version advertised by the peer.
    pub protocol_version: Option<String>,
    /// Last time a PONG was received from this peer.
    pub last_pong_at: Option<Instant>,
    /// Last ROUTERINFO JSON payload received from this peer, raw.
    pub last_router_info: Option<serde_json::Value>,
    /// Pending PING nonces this router sent to the peer, and when, so a
    /// matching PONG can compute round-trip latency.
    pub outstanding_pings: std::collections::HashMap<String, Instant>,
}

/// Per-downstream-connection state (spec §3 "Client session" data model).
#[derive(Debug)]
pub struct ClientSession {
    /// 1-up, monotonic per router run.
    pub id: u64,
    /// Remote socket address.
    pub addr: SocketAddr,
    /// Current state-machine state.
    pub state: ClientState,
    /// Access level assigned at accept time.
    pub access: AccessLevel,

    /// Whether the welcome burst has fully completed.
    pub welcome_sent: bool,
    /// Whether this session is currently inside the welcome's START window.
    pub waiting_for_start_keywords: bool,
    /// Sender-side `nolong` toggle.
    pub nolong: bool,
    /// Whether FRDP has identified this session as a peer router.
    pub is_peer_router: bool,

    /// Keywords already emitted as part of this client's welcome burst.
    pub welcome_keywords_sent: HashSet<String>,
    /// Messages that arrived (and would normally be forwarded to this
    /// client) before its welcome finished.
    pub pending_messages: Vec<Message>,
    /// Keywords this client has asked for via `demand=`.
    pub demanded: HashSet<String>,

    /// Parsed from `name=ID:NAME`, if ever sent.
    pub client_provided_id: Option<String>,
    /// Parsed from `name=ID:NAME`, if ever sent.
    pub client_provided_display_name: Option<String>,

    /// Lines received from this client.
    pub lines_in: u64,
    /// Lines sent to this client.
    pub lines_out: u64,
    /// Bytes received from this client.
    pub bytes_in: u64,
    /// Bytes sent to this client.
    pub bytes_out: u64,

    /// Per-client override of the `nolong`-excluded keyword set.
    pub nolong_override: NolongOverride,

    /// Peer-router-only metadata, populated once `is_peer_router` is set.
    pub peer: PeerRouterInfo,

    /// FRDP `AUTH` password received, if any, while still in `Connected`
    /// (spec §4.6: password must arrive "before the welcome begins").
    pub pending_auth_password: Option<String>,

    /// Outbound handle to this session's writer task.
    pub outbound: OutboundHandle,
}

impl ClientSession {
    /// Construct a freshly-accepted session in the `Connected` state.
    pub fn new(id: u64, addr: SocketAddr, outbound: OutboundHandle) -> ClientSession {
        ClientSession {
            id,
            addr,
            state: ClientState::Connected,
            access: AccessLevel::Blocked,
            welcome_sent: false,
            waiting_for_start_keywords: false,
            nolong: false,
            is_peer_router: false,
            welcome_keywords_sent: HashSet::new(),
            pending_messages: Vec::new(),
            demanded: HashSet::new(),
            client_provided_id: None,
            client_provided_display_name: None,
            lines_in: 0,
            lines_out: 0,
            bytes_in: 0,
            bytes_out: 0,
            nolong_override: NolongOverride::default(),
            peer: PeerRouterInfo::default(),
            pending_auth_password: None,
            outbound,
        }
    }

    /// Apply the access-check transition: `Connected` → `Accepted` (or the
    /// caller closes the session immediately for `Blocked`).
    pub fn accept(&mut self, access: AccessLevel) {
        self.access = access;
        self.state = ClientState::Accepted;
    }

    /// Begin the welcome burst: `Accepted` → `Welcoming`.
    pub fn begin_welcome(&mut self) {
        self.state = ClientState::Welcoming;
    }

    /// Complete (or abandon) the welcome burst: `Welcoming` → `Ready`.
    ///
    /// Does not drain `pending_messages` itself: the caller needs
    /// `&mut self.clients` to actually deliver them through `send`, so it
    /// must `std::mem::take` the queue and replay it after calling this.
    pub fn finish_welcome(&mut self) {
        self.welcome_sent = true;
        self.waiting_for_start_keywords = false;
        self.state = ClientState::Ready;
    }

    /// Record bookkeeping for a line sent to this client and push it to the
    /// writer task. Returns `false` if the writer is gone.
    pub fn send(&mut self, msg: Message) -> bool {
        let bytes = msg.to_line().len() as u64 + 2;
        let ok = self.outbound.send(msg);
        if ok {
            self.lines_out += 1;
            self.bytes_out += bytes;
        }
        ok
    }

    /// The invariant from spec §4.3: while the welcome isn't finished, any
    /// message rule 3 would otherwise forward to this client must be queued
    /// instead of sent, unless it's itself part of the welcome. Call this
    /// from the rules/delivery layer rather than `send` directly whenever
    /// the message isn't part of an in-progress welcome burst.
    ///
    /// Returns `true` if the message was sent immediately (so the caller can
    /// mirror the same accounting into router-wide counters), `false` if it
    /// was queued (or the writer is gone) and hasn't touched the wire yet.
    pub fn deliver_or_queue(&mut self, msg: Message) -> bool {
        if self.welcome_sent {
            self.send(msg)
        } else {
            self.pending_messages.push(msg);
            false
        }
    }

    /// Mark the client's socket as closed; the router core removes it from
    /// the session table on the next pass.
    pub fn close(&mut self) {
        self.state = ClientState::Closed;
    }

    /// Parse and apply a `name=ID:NAME` line.
    pub fn apply_name(&mut self, value: &str) {
        if let Some((id, name)) = value.split_once(':') {
            self.client_provided_id = Some(id.to_string());
            self.client_provided_display_name = Some(name.to_string());
        } else {
            self.client_provided_display_name = Some(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    fn test_handle() -> (OutboundHandle, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (OutboundHandle::new(tx, Arc::new(AtomicI64::new(0))), rx)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:1234".parse().unwrap()
    }

    #[test]
    fn pending_messages_queue_until_welcome_sent() {
        let (handle, mut rx) = test_handle();
        let mut session = ClientSession::new(1, addr(), handle);
        session.deliver_or_queue(Message::kv("Qs1", "a"));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.pending_messages.len(), 1);

        session.finish_welcome();
        // `finish_welcome` itself never touches `pending_messages` — it has
        // no way to call `send` on itself — so the caller must take and
        // replay the queue around this call (see `Router::finish_welcome`).
        assert_eq!(session.pending_messages.len(), 1);
        assert!(session.welcome_sent);
        assert_eq!(session.state, ClientState::Ready);

        let pending = std::mem::take(&mut session.pending_messages);
        for msg in pending {
            session.send(msg);
        }
        assert_eq!(rx.try_recv().unwrap(), Message::kv("Qs1", "a"));
    }

    #[test]
    fn deliver_or_queue_sends_directly_once_welcomed() {
        let (handle, mut rx) = test_handle();
        let mut session = ClientSession::new(1, addr(), handle);
        session.welcome_sent = true;
        session.deliver_or_queue(Message::signal("load1"));
        assert_eq!(rx.try_recv().unwrap(), Message::signal("load1"));
    }

    #[test]
    fn apply_name_splits_id_and_display_name() {
        let (handle, _rx) = test_handle();
        let mut session = ClientSession::new(1, addr(), handle);
        session.apply_name("42:Copilot");
        assert_eq!(session.client_provided_id.as_deref(), Some("42"));
        assert_eq!(session.client_provided_display_name.as_deref(), Some("Copilot"));
    }
}
