//! Peer-discovery sub-protocol (FRDP), carried inside `addon=` lines.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::events::RouterEvent;

/// FRDP protocol version this router speaks.
pub const FRDP_VERSION: &str = "1";

/// Default interval between outgoing PINGs.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval between ROUTERINFO broadcasts.
pub const ROUTERINFO_INTERVAL: Duration = Duration::from_secs(10);

/// A decoded FRDP sub-message (the part after `addon=FRANKENROUTER:<version>:`).
#[derive(Debug, Clone, PartialEq)]
pub enum FrdpMessage {
    /// Shared-secret password, sent immediately after TCP open if configured.
    Auth(String),
    /// Identity exchange.
    Ident {
        /// Simulator name advertised by the peer.
        simulator: String,
        /// Router name advertised by the peer.
        router: String,
        /// The peer's stable UUID.
        uuid: Uuid,
    },
    /// Nonce that must be echoed back as `Pong`.
    Ping(String),
    /// Response to a `Ping`.
    Pong(String),
    /// Periodic router-wide broadcast.
    RouterInfo(serde_json::Value),
    /// One-hop-only client display-name info.
    ClientInfo(serde_json::Value),
    /// Shared-cockpit seat assignment broadcast.
    SharedInfo(serde_json::Value),
    /// Closed with an explicit rejection from the other side.
    Unauthorized,
}

impl FrdpMessage {
    /// Parse the `addon=` value, i.e. everything after `addon=`.
    ///
    /// Expected shape: `FRANKENROUTER:<version>:<TYPE>:<payload>`. A version
    /// mismatch is logged loudly by the caller but still parsed — FRDP
    /// degrades gracefully rather than dropping the connection.
    pub fn parse(addon_value: &str) -> Option<(String, FrdpMessage)> {
        let mut parts = addon_value.splitn(4, ':');
        let magic = parts.next()?;
        if magic != "FRANKENROUTER" {
            return None;
        }
        let version = parts.next()?.to_string();
        let msg_type = parts.next()?;
        let payload = parts.next().unwrap_or("");

        let msg = match msg_type {
            "AUTH" => FrdpMessage::Auth(payload.to_string()),
            "IDENT" => {
                let mut p = payload.splitn(3, ':');
                let simulator = p.next()?.to_string();
                let router = p.next()?.to_string();
                let uuid = Uuid::parse_str(p.next()?).ok()?;
                FrdpMessage::Ident {
                    simulator,
                    router,
                    uuid,
                }
            }
            "PING" => FrdpMessage::Ping(payload.to_string()),
            "PONG" => FrdpMessage::Pong(payload.to_string()),
            "ROUTERINFO" => FrdpMessage::RouterInfo(serde_json::from_str(payload).ok()?),
            "CLIENTINFO" => FrdpMessage::ClientInfo(serde_json::from_str(payload).ok()?),
            "SHAREDINFO" => FrdpMessage::SharedInfo(serde_json::from_str(payload).ok()?),
            "UNAUTHORIZED" => FrdpMessage::Unauthorized,
            _ => return None,
        };
        Some((version, msg))
    }

    /// Encode as the value of an `addon=` line (without the `addon=` prefix).
    pub fn encode(&self, version: &str) -> String {
        match self {
            FrdpMessage::Auth(pw) => format!("FRANKENROUTER:{version}:AUTH:{pw}"),
            FrdpMessage::Ident {
                simulator,
                router,
                uuid,
            } => format!("FRANKENROUTER:{version}:IDENT:{simulator}:{router}:{uuid}"),
            FrdpMessage::Ping(id) => format!("FRANKENROUTER:{version}:PING:{id}"),
            FrdpMessage::Pong(id) => format!("FRANKENROUTER:{version}:PONG:{id}"),
            FrdpMessage::RouterInfo(v) => format!("FRANKENROUTER:{version}:ROUTERINFO:{v}"),
            FrdpMessage::ClientInfo(v) => format!("FRANKENROUTER:{version}:CLIENTINFO:{v}"),
            FrdpMessage::SharedInfo(v) => format!("FRANKENROUTER:{version}:SHAREDINFO:{v}"),
            FrdpMessage::Unauthorized => format!("FRANKENROUTER:{version}:UNAUTHORIZED:"),
        }
    }
}

/// This router's own identity, derived once at startup from the host id and
/// listen port so it stays stable across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterIdentity {
    /// Configured simulator name.
    pub simulator: String,
    /// Configured router name.
    pub router: String,
    /// Stable UUID for this router instance.
    pub uuid: Uuid,
}

impl RouterIdentity {
    /// Derive a stable UUID from a host identifier and the listen port.
    /// Using UUID v5 (name-based, SHA1) over a fixed namespace means the
    /// same `(host_id, port)` pair always yields the same UUID, satisfying
    /// the "stable across restarts" requirement without persisting state.
    pub fn derive_uuid(host_id: &str, port: u16) -> Uuid {
        const NAMESPACE: Uuid = Uuid::from_bytes([
            0xfe, 0xed, 0xfa, 0xce, 0xbe, 0xef, 0x40, 0x00, 0x80, 0x00, 0x46, 0x52, 0x44, 0x50,
            0x00, 0x01,
        ]);
        let name = format!("{host_id}:{port}");
        Uuid::new_v5(&NAMESPACE, name.as_bytes())
    }
}

/// The JSON payload carried by `ROUTERINFO` broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterInfoPayload {
    /// This router's configured name.
    pub router_name: String,
    /// Configured simulator name.
    pub simulator_name: String,
    /// Stable UUID.
    pub uuid: Uuid,
    /// Seconds since this router process started.
    pub uptime_secs: u64,
    /// Current filter flag state.
    pub filters: FilterSnapshot,
    /// Summary of current connections.
    pub connections: Vec<ConnectionSummary>,
}

/// Filter-flag state as published in `ROUTERINFO`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterSnapshot {
    /// Elevation filter state.
    pub elevation: bool,
    /// Traffic filter state.
    pub traffic: bool,
    /// Flight-control lock state.
    pub flight_controls: bool,
}

/// One entry of `ROUTERINFO.connections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummary {
    /// Session id.
    pub id: u64,
    /// Display name, if known.
    pub display_name: Option<String>,
    /// Whether this session has identified as a peer router.
    pub is_peer_router: bool,
}

/// A router known via ROUTERINFO broadcasts, keyed by UUID so duplicates
/// arriving over indirect paths overwrite rather than accumulate.
#[derive(Debug, Clone)]
pub struct KnownRouter {
    /// Most recently received payload.
    pub payload: RouterInfoPayload,
    /// When it was received, for `/api/routerinfo`'s `received` field.
    pub received_at: Instant,
}

/// Tracks outstanding pings and known peer routers for the discovery
/// engine's bookkeeping. A thin, allocation-light companion to the
/// per-session `PeerRouterInfo` (see [`crate::session::client::PeerRouterInfo`]).
#[derive(Debug, Default)]
pub struct FrdpRegistry {
    known_routers: std::collections::HashMap<Uuid, KnownRouter>,
}

impl FrdpRegistry {
    /// Create an empty registry.
    pub fn new() -> FrdpRegistry {
        FrdpRegistry::default()
    }

    /// Record (or overwrite) a ROUTERINFO payload.
    pub fn record_router_info(&mut self, payload: RouterInfoPayload) {
        let uuid = payload.uuid;
        self.known_routers.insert(
            uuid,
            KnownRouter {
                payload,
                received_at: Instant::now(),
            },
        );
    }

    /// Snapshot of all known routers for `/api/routerinfo`.
    pub fn snapshot(&self) -> &std::collections::HashMap<Uuid, KnownRouter> {
        &self.known_routers
    }
}

/// Spawn the ping and router-info broadcast tickers. Like the status
/// ticker, these own no state — they just wake the core up on the
/// relevant event.
pub fn spawn_tickers(router_events: UnboundedSender<RouterEvent>) -> (JoinHandle<()>, JoinHandle<()>) {
    let ping_events = router_events.clone();
    let ping = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if ping_events.send(RouterEvent::FrdpPingTick).is_err() {
                break;
            }
        }
    });
    let router_info = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ROUTERINFO_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if router_events.send(RouterEvent::FrdpRouterInfoTick).is_err() {
                break;
            }
        }
    });
    (ping, router_info)
}

/// Determine whether a connection's first line declares it as a peer
/// router: matched case-insensitively against the word `frankenrouter`
/// anywhere in the value so both historical and renamed clients are
/// recognized.
pub fn first_line_declares_peer(first_line: &crate::message::Message) -> bool {
    if let crate::message::Message::KeyVal(key, value) = first_line {
        key == "name" && value.to_ascii_lowercase().contains("frankenrouter")
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ping_pong() {
        let encoded = FrdpMessage::Ping("abc".into()).encode(FRDP_VERSION);
        let (version, msg) = FrdpMessage::parse(&encoded).unwrap();
        assert_eq!(version, FRDP_VERSION);
        assert_eq!(msg, FrdpMessage::Ping("abc".into()));
    }

    #[test]
    fn parses_ident_with_uuid() {
        let uuid = Uuid::new_v4();
        let encoded = FrdpMessage::Ident {
            simulator: "PSX".into(),
            router: "R1".into(),
            uuid,
        }
        .encode("1");
        let (_, msg) = FrdpMessage::parse(&encoded).unwrap();
        assert_eq!(
            msg,
            FrdpMessage::Ident {
                simulator: "PSX".into(),
                router: "R1".into(),
                uuid
            }
        );
    }

    #[test]
    fn derive_uuid_is_stable_across_calls() {
        let a = RouterIdentity::derive_uuid("host-1", 6111);
        let b = RouterIdentity::derive_uuid("host-1", 6111);
        let c = RouterIdentity::derive_uuid("host-1", 6112);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn registry_overwrites_duplicate_by_uuid() {
        let mut reg = FrdpRegistry::new();
        let uuid = Uuid::new_v4();
        let mk = |uptime: u64| RouterInfoPayload {
            router_name: "R2".into(),
            simulator_name: "PSX".into(),
            uuid,
            uptime_secs: uptime,
            filters: FilterSnapshot {
                elevation: false,
                traffic: false,
                flight_controls: true,
            },
            connections: vec![],
        };
        reg.record_router_info(mk(10));
        reg.record_router_info(mk(20));
        assert_eq!(reg.snapshot().len(), 1);
        assert_eq!(reg.snapshot()[&uuid].payload.uptime_secs, 20);
    }

    #[test]
    fn first_line_peer_detection_is_case_insensitive() {
        let msg = crate::message::Message::kv("name", "1:FRANKEN.PY frankenrouter");
        assert!(first_line_declares_peer(&msg));
        let other = crate::message::Message::kv("name", "1:EFB");
        assert!(!first_line_declares_peer(&other));
    }
}
