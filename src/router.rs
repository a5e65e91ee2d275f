//! The router core: the single task that owns the cache, catalogue,
//! client table, upstream session, filters, access control, and FRDP
//! registry (spec §5, §9 "a single router-context value owned by the
//! event-loop task").
//!
//! Every other task — acceptor, per-connection readers/writers, tickers,
//! HTTP handlers — talks to this one exclusively through [`RouterEvent`]s.
//! Nothing outside this module ever mutates the cache, a `ClientSession`,
//! or the filter flags.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::access::{AccessControl, AccessLevel};
use crate::cache::Cache;
use crate::catalogue::Catalogue;
use crate::checks::CheckList;
use crate::events::{Command, CommandResult, FilterName, RouterEvent};
use crate::filters::FilterFlags;
use crate::frdp::{
    self, ConnectionSummary, FilterSnapshot, FrdpMessage, FrdpRegistry, RouterIdentity, RouterInfoPayload,
};
use crate::message::Message;
use crate::net::client_conn::ClientConn;
use crate::rules::{self, Action, ClientView, Decision, Dest, SideEffect, Source};
use crate::session::client::{ClientSession, ClientState, PeerRouterInfo};
use crate::session::upstream::{UpstreamSession, UpstreamState, UpstreamTarget};
use crate::stats::Counters;
use crate::trafficlog::{Direction, Entry, TrafficLogHandle};

/// Grace window to let a pre-welcome FRDP `AUTH` line arrive before the
/// access check runs with whatever password (if any) has shown up.
const ACCESS_GRACE: Duration = Duration::from_millis(250);

/// Welcome's START window (spec §4.3 step 6).
const WELCOME_START_WINDOW: Duration = Duration::from_secs(2);

/// Pause between an `exit` reply and closing the session (spec §4.2 rule 4).
const EXIT_CLOSE_PAUSE: Duration = Duration::from_millis(500);

struct ClientEntry {
    session: ClientSession,
    conn: ClientConn,
}

/// Owns every piece of live router state. Constructed once in `main` and
/// driven by [`Router::run`] for the life of the process.
pub struct Router {
    catalogue: Arc<Catalogue>,
    cache: Cache,
    filters: FilterFlags,
    access: AccessControl,
    checks: CheckList,
    frdp: FrdpRegistry,
    identity: RouterIdentity,
    clients: HashMap<u64, ClientEntry>,
    upstream: UpstreamSession,
    upstream_peer: PeerRouterInfo,
    upstream_switch_tx: mpsc::UnboundedSender<UpstreamTarget>,
    router_events: mpsc::UnboundedSender<RouterEvent>,
    counters: Counters,
    traffic_log: TrafficLogHandle,
    started_at: Instant,
    /// Whether an invariant violation (spec §7 "Programmer error" row)
    /// should exit the process instead of logging and continuing.
    stop_minded: bool,
}

impl Router {
    /// Construct a router core ready to `run`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalogue: Arc<Catalogue>,
        filters: FilterFlags,
        access: AccessControl,
        checks: CheckList,
        identity: RouterIdentity,
        initial_upstream: UpstreamTarget,
        upstream_switch_tx: mpsc::UnboundedSender<UpstreamTarget>,
        router_events: mpsc::UnboundedSender<RouterEvent>,
        traffic_log: TrafficLogHandle,
        stop_minded: bool,
    ) -> Router {
        Router {
            catalogue,
            cache: Cache::new(),
            filters,
            access,
            checks,
            frdp: FrdpRegistry::new(),
            identity,
            clients: HashMap::new(),
            upstream: UpstreamSession::new(initial_upstream),
            upstream_peer: PeerRouterInfo::default(),
            upstream_switch_tx,
            router_events,
            counters: Counters::default(),
            traffic_log,
            started_at: Instant::now(),
            stop_minded,
        }
    }

    /// Report an invariant violation (spec §7): always logged loudly; exits
    /// the process non-zero only when the router was configured
    /// `stop_minded` (`[identity] stop_minded = true`).
    fn invariant_violation(&self, detail: impl Into<String>) {
        let err = crate::error::RouterError::Invariant(detail.into());
        log::error!("[router] {err}");
        if self.stop_minded && err.is_stop_minded() {
            std::process::exit(1);
        }
    }

    /// Seed the cache from a disk snapshot taken by a previous run
    /// (SPEC_FULL §A.6), so welcomes can be served before upstream connects.
    pub fn load_cache_snapshot(&mut self, map: serde_json::Map<String, serde_json::Value>) {
        for (keyword, value) in map {
            if let serde_json::Value::String(s) = value {
                let mode = self.catalogue.mode_of(&keyword);
                self.cache.put(&keyword, s, mode);
            }
        }
    }

    /// Drive the event loop until the channel closes (process shutdown).
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        log::info!("[router] event channel closed, shutting down");
    }

    fn handle_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::ClientConnected { id, addr, outbound, conn } => {
                self.on_client_connected(id, addr, outbound, conn);
            }
            RouterEvent::ClientLine { id, msg } => self.on_client_line(id, msg),
            RouterEvent::ClientDisconnected { id } => self.on_client_disconnected(id),
            RouterEvent::UpstreamConnected { outbound } => self.on_upstream_connected(outbound),
            RouterEvent::UpstreamLine { msg } => self.on_upstream_line(msg),
            RouterEvent::UpstreamDisconnected => self.on_upstream_disconnected(),
            RouterEvent::WriteLatencySample { latency, .. } => {
                self.counters.write_latency.push(latency);
            }
            RouterEvent::FrdpPingTick => self.on_frdp_ping_tick(),
            RouterEvent::FrdpRouterInfoTick => self.on_frdp_router_info_tick(),
            RouterEvent::StatusTick => self.on_status_tick(),
            RouterEvent::AccessGraceExpired { id } => self.finalize_access(id),
            RouterEvent::WelcomeStartTimeout { id } => self.finish_welcome(id),
            RouterEvent::CloseAfterExit { id } => self.remove_client(id),
            RouterEvent::HttpCommand(command, reply) => self.on_http_command(command, reply),
        }
    }

    // ---- client lifecycle -------------------------------------------------

    fn on_client_connected(
        &mut self,
        id: u64,
        addr: std::net::SocketAddr,
        outbound: crate::session::OutboundHandle,
        conn: ClientConn,
    ) {
        log::info!("[router] client {id} connected from {addr}");
        let session = ClientSession::new(id, addr, outbound);
        self.clients.insert(id, ClientEntry { session, conn });
        self.schedule(ACCESS_GRACE, RouterEvent::AccessGraceExpired { id });
    }

    fn on_client_disconnected(&mut self, id: u64) {
        if self.clients.remove(&id).is_some() {
            log::info!("[router] client {id} disconnected");
        }
    }

    fn remove_client(&mut self, id: u64) {
        if let Some(entry) = self.clients.remove(&id) {
            entry.conn.disconnect();
        }
    }

    fn on_client_line(&mut self, id: u64, msg: Message) {
        let Some(entry) = self.clients.get_mut(&id) else { return };
        let bytes = msg.to_line().len() as u64 + 2;
        entry.session.lines_in += 1;
        entry.session.bytes_in += bytes;
        self.counters.lines_in += 1;
        self.counters.bytes_in += bytes;
        self.traffic_log.log(Entry::from_message(Direction::In, id, &msg));

        match entry.session.state {
            ClientState::Connected => self.on_line_before_access(id, msg),
            ClientState::Accepted | ClientState::Welcoming | ClientState::Ready => {
                self.route_client_message(id, msg)
            }
            ClientState::Closed => {}
        }
    }

    /// Handle a line that arrives before the access check has run. An FRDP
    /// `AUTH` line just stashes the password and keeps waiting for the
    /// grace timer; anything else finalizes access immediately and then
    /// (if access wasn't blocked) is routed normally.
    fn on_line_before_access(&mut self, id: u64, msg: Message) {
        if let Message::KeyVal(key, value) = &msg {
            if key == "addon" {
                if let Some((_, FrdpMessage::Auth(pw))) = FrdpMessage::parse(value) {
                    if let Some(entry) = self.clients.get_mut(&id) {
                        entry.session.pending_auth_password = Some(pw);
                    }
                    return;
                }
            }
            if frdp::first_line_declares_peer(&msg) {
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.session.is_peer_router = true;
                }
            }
            if key == "name" && !self.checks.is_empty() {
                let report = self.checks.evaluate(value);
                if report.matched_frankenrouter {
                    if let Some(entry) = self.clients.get_mut(&id) {
                        entry.session.is_peer_router = true;
                    }
                }
                for violation in report.version_violations {
                    log::warn!("[checks] client {id} name={value}: {violation}");
                }
            }
        }
        self.finalize_access(id);
        if self.clients.contains_key(&id) {
            self.route_client_message(id, msg);
        }
    }

    fn finalize_access(&mut self, id: u64) {
        let Some(entry) = self.clients.get_mut(&id) else { return };
        if entry.session.state != ClientState::Connected {
            return; // already finalized by an earlier non-AUTH line
        }
        let ip = entry.session.addr.ip();
        let password = entry.session.pending_auth_password.clone();
        let level = self.access.classify(ip, password.as_deref());

        if level == AccessLevel::Blocked {
            log::info!("[router] client {id} blocked by access control");
            self.remove_client(id);
            return;
        }

        let Some(entry) = self.clients.get_mut(&id) else {
            self.invariant_violation(format!("client {id} vanished between access lookups"));
            return;
        };
        entry.session.accept(level);
        entry.session.begin_welcome();
        self.send_welcome_prefix(id);
        self.schedule(WELCOME_START_WINDOW, RouterEvent::WelcomeStartTimeout { id });
    }

    /// Welcome steps 1-6 (spec §4.3): everything synthesizable immediately
    /// from cache, followed by `start` to upstream and the wait for
    /// pure-START keywords, which `finish_welcome` completes once the
    /// window elapses.
    fn send_welcome_prefix(&mut self, id: u64) {
        let Some(entry) = self.clients.get_mut(&id) else { return };

        entry.session.send(Message::kv("id", id.to_string()));

        if let Some(e) = self.cache.get("version") {
            entry.session.send(Message::kv("version", e.value.clone()));
        }
        if let Some(e) = self.cache.get("layout") {
            entry.session.send(Message::kv("layout", e.value.clone()));
        }

        // "Lexicon block": START+ECON entries other than version/layout,
        // in catalogue order (see DESIGN.md for this interpretation).
        for (keyword, cached) in self.cache.snapshot_ordered(&self.catalogue) {
            if keyword == "version" || keyword == "layout" {
                continue;
            }
            if matches!(cached.mode, crate::catalogue::NetworkMode::Start { also_econ: true }) {
                entry.session.send(Message::kv(keyword, cached.value.clone()));
                entry.session.welcome_keywords_sent.insert(keyword.to_string());
            }
        }

        entry.session.send(Message::signal("load1"));
        entry.session.waiting_for_start_keywords = true;

        self.send_upstream(Message::signal("start"));
        self.upstream.start_sent_at = Some(Instant::now());
    }

    /// Welcome steps 7-11: called either when the START window elapses or
    /// (defensively) if the client is somehow still `Welcoming` elsewhere.
    fn finish_welcome(&mut self, id: u64) {
        let Some(entry) = self.clients.get_mut(&id) else { return };
        if entry.session.state != ClientState::Welcoming {
            return;
        }
        entry.session.waiting_for_start_keywords = false;

        for (keyword, cached) in self.cache.snapshot_ordered(&self.catalogue) {
            if entry.session.welcome_keywords_sent.contains(keyword) {
                continue;
            }
            if cached.mode.is_pure_delta() {
                continue;
            }
            entry.session.send(Message::kv(keyword, cached.value.clone()));
            entry.session.welcome_keywords_sent.insert(keyword.to_string());
        }

        entry.session.send(Message::signal("load2"));
        entry.session.send(Message::signal("load3"));
        if let Some(e) = self.cache.get("metar") {
            entry.session.send(Message::kv("metar", e.value.clone()));
        }

        // Take the queued messages out before flipping state: `send` needs
        // `&mut entry.session` itself, so `ClientSession::finish_welcome`
        // can't drain and deliver in one step.
        let pending = std::mem::take(&mut entry.session.pending_messages);
        entry.session.finish_welcome();
        for msg in pending {
            entry.session.send(msg);
        }
    }

    // ---- message routing ---------------------------------------------------

    fn client_views(&self, exclude: Option<u64>) -> Vec<ClientView> {
        self.clients
            .values()
            .filter(|e| e.session.state != ClientState::Closed)
            .filter(|e| Some(e.session.id) != exclude)
            .map(|e| ClientView {
                id: e.session.id,
                is_peer: e.session.is_peer_router,
                nolong: e.session.nolong,
                nolong_override: e.session.nolong_override.clone(),
                waiting_for_start_keywords: e.session.waiting_for_start_keywords,
                welcome_sent: e.session.welcome_sent,
            })
            .collect()
    }

    fn all_client_views(&self) -> Vec<ClientView> {
        self.client_views(None)
    }

    fn route_client_message(&mut self, id: u64, msg: Message) {
        if let Some(entry) = self.clients.get(&id) {
            if entry.session.access == AccessLevel::Observer && !is_observer_allowed(&msg) {
                self.counters.observer_writes_dropped += 1;
                log::debug!("[router] dropped observer write from client {id}: {:?}", msg.keyword());
                return;
            }
        }
        let clients = self.all_client_views();
        let decision = rules::decide(&msg, Source::Client(id), &clients, &self.filters, &self.catalogue);
        self.apply_decision(decision, &msg);
    }

    fn on_upstream_line(&mut self, msg: Message) {
        let bytes = msg.to_line().len() as u64 + 2;
        self.upstream.lines_in += 1;
        self.upstream.bytes_in += bytes;
        self.counters.lines_in += 1;
        self.counters.bytes_in += bytes;
        self.traffic_log.log(Entry::from_message(Direction::In, 0, &msg));

        let clients = self.all_client_views();
        let decision = rules::decide(&msg, Source::Upstream, &clients, &self.filters, &self.catalogue);
        self.apply_decision(decision, &msg);
    }

    fn apply_decision(&mut self, decision: Decision, source_msg: &Message) {
        let direct_send: std::collections::HashSet<(u64, String)> = decision
            .side_effects
            .iter()
            .filter_map(|e| match e {
                SideEffect::MarkWelcomeKeywordSent(id, kw) => Some((*id, kw.clone())),
                _ => None,
            })
            .collect();

        for action in decision.actions {
            match action {
                Action::Deliver(Dest::Upstream, msg) => self.send_upstream(msg),
                Action::Deliver(Dest::Client(id), msg) => {
                    let direct = matches!(&msg, Message::KeyVal(k, _) if direct_send.contains(&(id, k.clone())));
                    let bytes = msg.to_line().len() as u64 + 2;
                    if let Some(entry) = self.clients.get_mut(&id) {
                        let sent = if direct {
                            entry.session.send(msg)
                        } else {
                            entry.session.deliver_or_queue(msg)
                        };
                        if sent {
                            self.counters.lines_out += 1;
                            self.counters.bytes_out += bytes;
                        }
                    }
                }
                Action::BangReplyTo(id) => self.send_bang_reply(id),
                Action::ExitAndClose(id) => self.exit_and_close(id),
            }
        }

        for effect in decision.side_effects {
            self.apply_side_effect(effect, source_msg);
        }
    }

    fn apply_side_effect(&mut self, effect: SideEffect, source_msg: &Message) {
        match effect {
            SideEffect::UpdateCache(k, v) => {
                let mode = self.catalogue.mode_of(&k);
                self.cache.put(&k, v, mode);
            }
            SideEffect::RecordDemand(id, kw) => {
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.session.demanded.insert(kw);
                }
            }
            SideEffect::UpdateName(id, value) => {
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.session.apply_name(&value);
                }
            }
            SideEffect::ResetStartSentAt => {
                self.upstream.start_sent_at = Some(Instant::now());
            }
            SideEffect::ToggleNolong(id) => {
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.session.nolong = !entry.session.nolong;
                }
            }
            SideEffect::MarkWelcomeKeywordSent(id, kw) => {
                if let Some(entry) = self.clients.get_mut(&id) {
                    entry.session.welcome_keywords_sent.insert(kw);
                }
            }
            SideEffect::CountFiltered => {
                let key = source_msg.keyword();
                if self.filters.elevation && crate::filters::ELEVATION_KEYWORDS.contains(&key) {
                    self.counters.filtered_elevation += 1;
                } else if self.filters.traffic && crate::filters::TRAFFIC_KEYWORDS.contains(&key) {
                    self.counters.filtered_traffic += 1;
                } else if self.filters.flight_controls && crate::filters::FLIGHT_CONTROL_KEYWORDS.contains(&key) {
                    self.counters.filtered_flight_controls += 1;
                }
            }
            SideEffect::ToFrdp(sender_id, raw) => self.handle_frdp_payload(sender_id, &raw),
        }
    }

    fn send_bang_reply(&mut self, id: u64) {
        let entries: Vec<(String, String)> = self
            .cache
            .snapshot_replayable(&self.catalogue)
            .into_iter()
            .map(|(k, e)| (k.to_string(), e.value.clone()))
            .collect();
        if let Some(entry) = self.clients.get_mut(&id) {
            for (k, v) in entries {
                entry.session.send(Message::kv(k, v));
            }
        }
    }

    fn exit_and_close(&mut self, id: u64) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.session.send(Message::signal("exit"));
        }
        self.schedule(EXIT_CLOSE_PAUSE, RouterEvent::CloseAfterExit { id });
    }

    fn send_upstream(&mut self, msg: Message) {
        let Some(outbound) = &self.upstream.outbound else {
            log::debug!("[router] dropping message, upstream not connected: {:?}", msg);
            return;
        };
        if outbound.send(msg.clone()) {
            let bytes = msg.to_line().len() as u64 + 2;
            self.upstream.lines_out += 1;
            self.upstream.bytes_out += bytes;
            self.counters.lines_out += 1;
            self.counters.bytes_out += bytes;
            self.traffic_log.log(Entry::from_message(Direction::Out, 0, &msg));
        }
    }

    // ---- upstream lifecycle -------------------------------------------------

    fn on_upstream_connected(&mut self, outbound: crate::session::OutboundHandle) {
        log::info!(
            "[router] upstream connected to {}:{}",
            self.upstream.target.host, self.upstream.target.port
        );
        self.upstream.mark_live(outbound);

        if !self.upstream.target.password.is_empty() {
            self.send_upstream(Message::kv(
                "addon",
                FrdpMessage::Auth(self.upstream.target.password.clone()).encode(frdp::FRDP_VERSION),
            ));
        }
        self.send_upstream(Message::kv(
            "addon",
            FrdpMessage::Ident {
                simulator: self.identity.simulator.clone(),
                router: self.identity.router.clone(),
                uuid: self.identity.uuid,
            }
            .encode(frdp::FRDP_VERSION),
        ));

        // Re-send every client's standing demands (spec §4.4: "if any
        // client has queued demand= entries, re-send them").
        let demands: Vec<String> = self
            .clients
            .values()
            .flat_map(|e| e.session.demanded.iter().cloned())
            .collect();
        for keyword in demands {
            self.send_upstream(Message::kv("demand", keyword));
        }
    }

    fn on_upstream_disconnected(&mut self) {
        log::warn!("[router] upstream disconnected");
        self.upstream.mark_disconnected();
        for entry in self.clients.values_mut() {
            entry.session.send(Message::signal("load1"));
        }
    }

    // ---- FRDP ---------------------------------------------------------------

    fn handle_frdp_payload(&mut self, sender_id: u64, raw: &str) {
        let Some((version, msg)) = FrdpMessage::parse(raw) else {
            log::warn!("[router] unparseable FRDP payload from {sender_id}: {raw}");
            return;
        };
        if version != frdp::FRDP_VERSION {
            log::warn!("[router] FRDP version mismatch from {sender_id}: got {version}, expected {}", frdp::FRDP_VERSION);
        }

        match msg {
            FrdpMessage::Auth(pw) => {
                if let Some(entry) = self.clients.get_mut(&sender_id) {
                    entry.session.pending_auth_password = Some(pw);
                }
            }
            FrdpMessage::Ident { ref simulator, ref router, uuid } => {
                if !self.checks.is_empty() {
                    let report = self.checks.evaluate(router);
                    for violation in report.version_violations {
                        log::warn!("[checks] IDENT from {sender_id} ({simulator}/{router}): {violation}");
                    }
                }
                if sender_id == 0 {
                    self.upstream_peer.uuid = Some(uuid);
                    self.upstream_peer.protocol_version = Some(version);
                } else if let Some(entry) = self.clients.get_mut(&sender_id) {
                    entry.session.is_peer_router = true;
                    entry.session.peer.uuid = Some(uuid);
                    entry.session.peer.protocol_version = Some(version);
                }
            }
            FrdpMessage::Ping(nonce) => {
                let reply = Message::kv("addon", FrdpMessage::Pong(nonce).encode(frdp::FRDP_VERSION));
                if sender_id == 0 {
                    self.send_upstream(reply);
                } else if let Some(entry) = self.clients.get_mut(&sender_id) {
                    entry.session.send(reply);
                }
            }
            FrdpMessage::Pong(nonce) => {
                if sender_id == 0 {
                    self.upstream_peer.outstanding_pings.remove(&nonce);
                } else if let Some(entry) = self.clients.get_mut(&sender_id) {
                    entry.session.is_peer_router = true;
                    if let Some(sent_at) = entry.session.peer.outstanding_pings.remove(&nonce) {
                        entry.session.peer.last_pong_at = Some(Instant::now());
                        log::debug!(
                            "[frdp] RTT to client {sender_id}: {:?}",
                            sent_at.elapsed()
                        );
                    }
                }
            }
            FrdpMessage::RouterInfo(json) => {
                if let Ok(payload) = serde_json::from_value::<RouterInfoPayload>(json.clone()) {
                    self.frdp.record_router_info(payload);
                }
                self.broadcast_frdp_except(sender_id, FrdpMessage::RouterInfo(json));
            }
            FrdpMessage::SharedInfo(json) => {
                self.broadcast_frdp_except(sender_id, FrdpMessage::SharedInfo(json));
            }
            FrdpMessage::ClientInfo(json) => {
                // One-hop: terminated here, used only to set a display name.
                if let Some(name) = json.get("display_name").and_then(|v| v.as_str()) {
                    if let Some(target) = json.get("id").and_then(|v| v.as_u64()) {
                        if let Some(entry) = self.clients.get_mut(&target) {
                            entry.session.client_provided_display_name = Some(name.to_string());
                        }
                    }
                }
            }
            FrdpMessage::Unauthorized => {
                log::warn!("[frdp] unauthorized from {sender_id}");
                if sender_id != 0 {
                    self.remove_client(sender_id);
                }
            }
        }
    }

    /// Re-broadcast a ROUTERINFO/SHAREDINFO payload to every peer other than
    /// the one it arrived from (spec §4.5: "forwarded across the network").
    fn broadcast_frdp_except(&mut self, sender_id: u64, msg: FrdpMessage) {
        let line = Message::kv("addon", msg.encode(frdp::FRDP_VERSION));
        if sender_id != 0 {
            self.send_upstream(line.clone());
        }
        let targets: Vec<u64> = self
            .clients
            .values()
            .filter(|e| e.session.is_peer_router && e.session.id != sender_id)
            .map(|e| e.session.id)
            .collect();
        for id in targets {
            if let Some(entry) = self.clients.get_mut(&id) {
                entry.session.send(line.clone());
            }
        }
    }

    fn on_frdp_ping_tick(&mut self) {
        let nonce = uuid::Uuid::new_v4().to_string();
        if self.upstream.is_live() {
            self.upstream_peer.outstanding_pings.insert(nonce.clone(), Instant::now());
            self.send_upstream(Message::kv("addon", FrdpMessage::Ping(nonce).encode(frdp::FRDP_VERSION)));
        }
        let peer_ids: Vec<u64> = self
            .clients
            .values()
            .filter(|e| e.session.is_peer_router)
            .map(|e| e.session.id)
            .collect();
        for id in peer_ids {
            let nonce = uuid::Uuid::new_v4().to_string();
            if let Some(entry) = self.clients.get_mut(&id) {
                entry.session.peer.outstanding_pings.insert(nonce.clone(), Instant::now());
                entry.session.send(Message::kv("addon", FrdpMessage::Ping(nonce).encode(frdp::FRDP_VERSION)));
            }
        }
    }

    fn on_frdp_router_info_tick(&mut self) {
        let payload = self.router_info_payload();
        let line = Message::kv(
            "addon",
            FrdpMessage::RouterInfo(serde_json::to_value(payload).unwrap_or(serde_json::Value::Null))
                .encode(frdp::FRDP_VERSION),
        );
        self.send_upstream(line.clone());
        let peer_ids: Vec<u64> = self
            .clients
            .values()
            .filter(|e| e.session.is_peer_router)
            .map(|e| e.session.id)
            .collect();
        for id in peer_ids {
            if let Some(entry) = self.clients.get_mut(&id) {
                entry.session.send(line.clone());
            }
        }
    }

    fn router_info_payload(&self) -> RouterInfoPayload {
        RouterInfoPayload {
            router_name: self.identity.router.clone(),
            simulator_name: self.identity.simulator.clone(),
            uuid: self.identity.uuid,
            uptime_secs: self.started_at.elapsed().as_secs(),
            filters: FilterSnapshot {
                elevation: self.filters.elevation,
                traffic: self.filters.traffic,
                flight_controls: self.filters.flight_controls,
            },
            connections: self
                .clients
                .values()
                .map(|e| ConnectionSummary {
                    id: e.session.id,
                    display_name: e.session.client_provided_display_name.clone(),
                    is_peer_router: e.session.is_peer_router,
                })
                .collect(),
        }
    }

    // ---- operator surface -----------------------------------------------

    fn on_status_tick(&self) {
        let upstream_state = match self.upstream.state {
            UpstreamState::Disconnected => "disconnected",
            UpstreamState::Connecting => "connecting",
            UpstreamState::Authing => "authing",
            UpstreamState::Live => "live",
        };
        println!(
            "--- frankenrouter status (uptime {}s) ---",
            self.started_at.elapsed().as_secs()
        );
        println!(
            "upstream: {}:{} [{}]",
            self.upstream.target.host, self.upstream.target.port, upstream_state
        );
        for entry in self.clients.values() {
            println!(
                "  client {:>4} {:<21} state={:?} access={:?} queue={}B{}",
                entry.session.id,
                entry.session.addr,
                entry.session.state,
                entry.session.access,
                entry.session.outbound.queue_depth(),
                if entry.session.outbound.over_high_water() { " [HIGH WATER]" } else { "" },
            );
        }
        println!(
            "filtered: elevation={} traffic={} flight_controls={}",
            self.counters.filtered_elevation, self.counters.filtered_traffic, self.counters.filtered_flight_controls
        );
    }

    fn on_http_command(&mut self, command: Command, reply: oneshot::Sender<CommandResult>) {
        let result = self.execute_command(command);
        let _ = reply.send(result);
    }

    fn execute_command(&mut self, command: Command) -> CommandResult {
        match command {
            Command::Disconnect { client_id } => {
                if self.clients.remove(&client_id).map(|e| e.conn.disconnect()).is_some() {
                    CommandResult::Ok(format!("disconnected client {client_id}"))
                } else {
                    CommandResult::Err(format!("no such client {client_id}"))
                }
            }
            Command::SwitchUpstream { host, port, password } => {
                let target = UpstreamTarget { host, port, password };
                self.upstream.switch_target(target.clone());
                if self.upstream_switch_tx.send(target).is_err() {
                    return CommandResult::Err("upstream supervisor is gone".into());
                }
                CommandResult::Ok("switching upstream".into())
            }
            Command::SetFilter { which, enabled } => {
                match which {
                    FilterName::Elevation => self.filters.elevation = enabled,
                    FilterName::Traffic => self.filters.traffic = enabled,
                }
                CommandResult::Ok(format!("{which:?} filter set to {enabled}"))
            }
            Command::BlocklistAdd { cidr } => match self.access.add_block(&cidr) {
                Ok(()) => CommandResult::Ok(format!("blocked {cidr}")),
                Err(e) => CommandResult::Err(e.to_string()),
            },
            Command::BlocklistRemove { cidr } => {
                self.access.remove_block(&cidr);
                CommandResult::Ok(format!("unblocked {cidr}"))
            }
            Command::VpilotPrintMessage { text } => {
                for entry in self.clients.values_mut() {
                    entry.session.deliver_or_queue(Message::kv("vpilotPrint", text.clone()));
                }
                CommandResult::Ok("broadcast".into())
            }
            Command::GetStats => CommandResult::Json(self.stats_json()),
            Command::GetClients => CommandResult::Json(self.clients_json()),
            Command::GetRouterInfo => CommandResult::Json(self.router_info_json()),
            Command::GetUpstream => CommandResult::Json(self.upstream_json()),
            Command::GetSharedInfo => CommandResult::Json(serde_json::json!({})),
            Command::GetBlocklist => {
                CommandResult::Json(serde_json::json!(self.access.blocklist().collect::<Vec<_>>()))
            }
        }
    }

    fn stats_json(&self) -> serde_json::Value {
        let write_latency = self.counters.write_latency.summary();
        serde_json::json!({
            "lines_in": self.counters.lines_in,
            "lines_out": self.counters.lines_out,
            "bytes_in": self.counters.bytes_in,
            "bytes_out": self.counters.bytes_out,
            "filtered_elevation": self.counters.filtered_elevation,
            "filtered_traffic": self.counters.filtered_traffic,
            "filtered_flight_controls": self.counters.filtered_flight_controls,
            "observer_writes_dropped": self.counters.observer_writes_dropped,
            "traffic_log_dropped": self.traffic_log.dropped_count(),
            "write_latency": write_latency,
            "queue_depths": self.clients.values().map(|e| (e.session.id, e.session.outbound.queue_depth())).collect::<HashMap<_, _>>(),
        })
    }

    fn clients_json(&self) -> serde_json::Value {
        serde_json::json!(self
            .clients
            .values()
            .map(|e| serde_json::json!({
                "id": e.session.id,
                "ip": e.session.addr.ip().to_string(),
                "port": e.session.addr.port(),
                "display_name": e.session.client_provided_display_name,
                "messages_sent": e.session.lines_out,
                "messages_received": e.session.lines_in,
                "client_provided_id": e.session.client_provided_id,
                "client_provided_display_name": e.session.client_provided_display_name,
            }))
            .collect::<Vec<_>>())
    }

    fn router_info_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (uuid, known) in self.frdp.snapshot() {
            map.insert(
                uuid.to_string(),
                serde_json::json!({
                    "payload": known.payload,
                    "received_secs_ago": known.received_at.elapsed().as_secs(),
                }),
            );
        }
        serde_json::Value::Object(map)
    }

    fn upstream_json(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.upstream.target.host,
            "port": self.upstream.target.port,
            "connected": self.upstream.is_live(),
        })
    }

    fn schedule(&self, after: Duration, event: RouterEvent) {
        let tx = self.router_events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event);
        });
    }
}

/// Observer-level clients may send `demand=` and FRDP lines; everything
/// else is silently dropped and counted (spec §4.3).
fn is_observer_allowed(msg: &Message) -> bool {
    match msg {
        Message::KeyVal(key, _) => key == "demand" || key == "addon",
        Message::Signal(_) => false,
    }
}
