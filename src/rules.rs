//! Pure forwarding-rules function (spec §4.2).
//!
//! Deliberately free of I/O and of any reference to the live session table:
//! it takes a snapshot view of the relevant session flags and hands back a
//! `Decision` describing what to deliver and which bookkeeping side effects
//! the caller (the router core) must apply. This is what makes the function
//! referentially transparent and unit-testable in isolation (spec §8).

use crate::catalogue::Catalogue;
use crate::filters::{FilterFlags, NolongOverride, WELCOME_ONLY_KEYWORDS};
use crate::message::Message;

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The single upstream connection.
    Upstream,
    /// A downstream client, identified by session id.
    Client(u64),
}

/// Where a decided action is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    /// The upstream connection.
    Upstream,
    /// A specific downstream client.
    Client(u64),
}

/// A single delivery the router core should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver `Message` to `Dest` (subject to that client's own welcome
    /// queue/deliver semantics if `Dest` is a client).
    Deliver(Dest, Message),
    /// Synthesize and send a `bang` reply to this client from the live
    /// cache (the rules function has no cache access, so it hands back a
    /// marker the caller expands).
    BangReplyTo(u64),
    /// Reply `exit`, then close this client after the grace pause.
    ExitAndClose(u64),
}

/// Bookkeeping the router core must apply alongside (or instead of) a
/// delivery; kept separate from `Action` so the rules function stays a
/// pure mapping from inputs to outputs with no side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Update the cache for this keyword (the caller still checks
    /// cacheability via the catalogue mode).
    UpdateCache(String, String),
    /// Record that `client_id` has demanded `keyword`.
    RecordDemand(u64, String),
    /// Apply a `name=ID:NAME` update to the sending client.
    UpdateName(u64, String),
    /// Reset `start_sent_at` for the upstream session.
    ResetStartSentAt,
    /// Toggle `nolong` on the sending client.
    ToggleNolong(u64),
    /// Mark `keyword` as sent in `client_id`'s welcome burst.
    MarkWelcomeKeywordSent(u64, String),
    /// Increment the filtered-keyword counter (no per-line log, per §7).
    CountFiltered,
    /// Route this line to the FRDP peer-discovery engine instead of
    /// forwarding it as ordinary traffic.
    ToFrdp(u64, String),
}

/// The full result of evaluating the rules for one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    /// Deliveries to perform, in order.
    pub actions: Vec<Action>,
    /// State updates to apply.
    pub side_effects: Vec<SideEffect>,
}

impl Decision {
    fn deliver(mut self, dest: Dest, msg: Message) -> Decision {
        self.actions.push(Action::Deliver(dest, msg));
        self
    }

    fn effect(mut self, effect: SideEffect) -> Decision {
        self.side_effects.push(effect);
        self
    }
}

/// A read-only view of the session-table facts the rules function needs
/// about one potential destination. Built fresh by the router core from
/// its live `ClientSession` table before each call.
#[derive(Debug, Clone)]
pub struct ClientView {
    /// Session id.
    pub id: u64,
    /// Whether FRDP has identified this session as a peer router.
    pub is_peer: bool,
    /// Sender's own `nolong` toggle.
    pub nolong: bool,
    /// Per-client override of the nolong-excluded keyword set.
    pub nolong_override: NolongOverride,
    /// Whether this client is currently inside its welcome's START window.
    pub waiting_for_start_keywords: bool,
    /// Whether the client's welcome has fully completed.
    pub welcome_sent: bool,
}

/// Evaluate the forwarding rules for one inbound message (spec §4.2).
///
/// `clients` must include every live downstream session (the sender
/// included, for `Source::Client`); the function itself excludes the
/// sender from "all clients" targets per the tie-break rule.
pub fn decide(
    msg: &Message,
    source: Source,
    clients: &[ClientView],
    filters: &FilterFlags,
    catalogue: &Catalogue,
) -> Decision {
    // Rule 1: FRDP lines never forward; they go to the peer-discovery engine.
    if let Message::KeyVal(key, value) = msg {
        if key == "addon" && value.starts_with("FRANKENROUTER:") {
            let sender = match source {
                Source::Client(id) => id,
                Source::Upstream => 0,
            };
            return Decision::default().effect(SideEffect::ToFrdp(sender, value.clone()));
        }
    }

    match source {
        Source::Client(sender_id) => decide_from_client(msg, sender_id, clients, catalogue),
        Source::Upstream => decide_from_upstream(msg, clients, filters, catalogue),
    }
}

fn others(clients: &[ClientView], sender: Option<u64>) -> impl Iterator<Item = &ClientView> {
    clients.iter().filter(move |c| Some(c.id) != sender)
}

fn decide_from_client(
    msg: &Message,
    sender_id: u64,
    clients: &[ClientView],
    catalogue: &Catalogue,
) -> Decision {
    let mut decision = Decision::default();

    match msg {
        Message::KeyVal(key, value) if key == "demand" => {
            decision = decision
                .effect(SideEffect::RecordDemand(sender_id, value.clone()))
                .deliver(Dest::Upstream, msg.clone());
        }
        Message::KeyVal(key, value) if key == "name" => {
            decision = decision.effect(SideEffect::UpdateName(sender_id, value.clone()));
            decision = decision.deliver(Dest::Upstream, msg.clone());
            for c in others(clients, Some(sender_id)) {
                decision = decision.deliver(Dest::Client(c.id), msg.clone());
            }
        }
        Message::KeyVal(_, _) => {
            decision = decision.deliver(Dest::Upstream, msg.clone());
            for c in others(clients, Some(sender_id)) {
                if c.nolong && c.nolong_override.excludes(msg.keyword()) {
                    continue;
                }
                decision = decision.deliver(Dest::Client(c.id), msg.clone());
            }
        }
        Message::Signal(sig) => {
            decision = decide_signal_from_client(sig, sender_id, clients, catalogue);
        }
    }
    decision
}

fn decide_signal_from_client(
    sig: &str,
    sender_id: u64,
    clients: &[ClientView],
    _catalogue: &Catalogue,
) -> Decision {
    let mut decision = Decision::default();
    match sig {
        "bang" => {
            decision.actions.push(Action::BangReplyTo(sender_id));
        }
        "start" => {
            decision = decision
                .deliver(Dest::Upstream, Message::signal("start"))
                .effect(SideEffect::ResetStartSentAt);
        }
        "exit" => {
            decision.actions.push(Action::ExitAndClose(sender_id));
        }
        "again" => {
            decision = decision.deliver(Dest::Upstream, Message::signal("again"));
        }
        "nolong" => {
            decision = decision.effect(SideEffect::ToggleNolong(sender_id));
        }
        // `pleaseBeSoKindAndQuit` default: forward to clients, never upstream
        // (spec §9 open question, safe-default resolution — see DESIGN.md).
        "pleaseBeSoKindAndQuit" => {
            for c in others(clients, Some(sender_id)) {
                decision = decision.deliver(Dest::Client(c.id), Message::signal(sig));
            }
        }
        _ => {
            // Unrecognized/other client signals: no special rule, drop.
        }
    }
    decision
}

fn decide_from_upstream(
    msg: &Message,
    clients: &[ClientView],
    filters: &FilterFlags,
    catalogue: &Catalogue,
) -> Decision {
    match msg {
        Message::KeyVal(key, value) => decide_keyval_from_upstream(key, value, clients, filters, catalogue),
        Message::Signal(sig) => decide_signal_from_upstream(sig, clients),
    }
}

fn decide_keyval_from_upstream(
    key: &str,
    value: &str,
    clients: &[ClientView],
    filters: &FilterFlags,
    catalogue: &Catalogue,
) -> Decision {
    let mut decision = Decision::default();

    // Rule 3, bullet 1: welcome-only keywords (id/version/layout/metar/lexicon).
    if WELCOME_ONLY_KEYWORDS.contains(&key) {
        return decision.effect(SideEffect::UpdateCache(key.to_string(), value.to_string()));
    }

    let mode = catalogue.mode_of(key);

    // Rule 3, bullet 2: pure-START keyword.
    if mode.is_pure_start() {
        for c in clients {
            if c.is_peer || c.waiting_for_start_keywords {
                decision = decision
                    .deliver(Dest::Client(c.id), Message::kv(key, value))
                    .effect(SideEffect::MarkWelcomeKeywordSent(c.id, key.to_string()));
            }
        }
        return decision;
    }

    // Rule 3, bullet 3: filtered keyword — dropped, counted, cache untouched
    // (tie-break: filter wins over caching).
    if filters.filters_out(key) {
        return decision.effect(SideEffect::CountFiltered);
    }

    // Rule 3, bullet 4: otherwise — cache (if cacheable) and forward,
    // respecting each destination's nolong exclusion set.
    if mode.is_cacheable() {
        decision = decision.effect(SideEffect::UpdateCache(key.to_string(), value.to_string()));
    }
    for c in clients {
        if c.nolong && c.nolong_override.excludes(key) {
            continue;
        }
        decision = decision.deliver(Dest::Client(c.id), Message::kv(key, value));
    }
    decision
}

fn decide_signal_from_upstream(sig: &str, clients: &[ClientView]) -> Decision {
    let mut decision = Decision::default();
    match sig {
        "load1" | "load2" | "load3" => {
            for c in clients {
                decision = decision.deliver(Dest::Client(c.id), Message::signal(sig));
            }
        }
        _ => {}
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::NetworkMode;
    use std::io::Write;

    fn test_catalogue() -> Catalogue {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(
            b"id START\nversion START\nlayout START+ECON\nQi198 DELTA\nQs121 ECON\nMcpMomVar BIGMOM\n",
        )
        .unwrap();
        Catalogue::load(f.path()).unwrap()
    }

    fn view(id: u64) -> ClientView {
        ClientView {
            id,
            is_peer: false,
            nolong: false,
            nolong_override: NolongOverride::default(),
            waiting_for_start_keywords: false,
            welcome_sent: true,
        }
    }

    #[test]
    fn frdp_line_never_forwarded() {
        let cat = test_catalogue();
        let msg = Message::kv("addon", "FRANKENROUTER:1:PING:abc");
        let d = decide(&msg, Source::Client(1), &[], &FilterFlags::default(), &cat);
        assert!(d.actions.is_empty());
        assert_eq!(d.side_effects, vec![SideEffect::ToFrdp(1, "FRANKENROUTER:1:PING:abc".into())]);
    }

    #[test]
    fn demand_forwards_only_to_upstream_and_records() {
        let cat = test_catalogue();
        let msg = Message::kv("demand", "SomeVar");
        let clients = vec![view(1), view(2)];
        let d = decide(&msg, Source::Client(1), &clients, &FilterFlags::default(), &cat);
        assert_eq!(d.actions, vec![Action::Deliver(Dest::Upstream, msg.clone())]);
        assert_eq!(d.side_effects, vec![SideEffect::RecordDemand(1, "SomeVar".into())]);
    }

    #[test]
    fn name_update_propagates_to_all_peers_and_upstream() {
        let cat = test_catalogue();
        let msg = Message::kv("name", "7:Copilot");
        let clients = vec![view(1), view(2)];
        let d = decide(&msg, Source::Client(1), &clients, &FilterFlags::default(), &cat);
        assert!(d.actions.contains(&Action::Deliver(Dest::Upstream, msg.clone())));
        assert!(d.actions.contains(&Action::Deliver(Dest::Client(2), msg.clone())));
        assert!(!d.actions.contains(&Action::Deliver(Dest::Client(1), msg.clone())));
    }

    #[test]
    fn bang_does_not_forward_and_requests_synthesis() {
        let cat = test_catalogue();
        let d = decide(&Message::signal("bang"), Source::Client(5), &[], &FilterFlags::default(), &cat);
        assert_eq!(d.actions, vec![Action::BangReplyTo(5)]);
    }

    #[test]
    fn exit_triggers_close_action() {
        let cat = test_catalogue();
        let d = decide(&Message::signal("exit"), Source::Client(9), &[], &FilterFlags::default(), &cat);
        assert_eq!(d.actions, vec![Action::ExitAndClose(9)]);
    }

    #[test]
    fn welcome_only_keyword_updates_cache_but_never_forwards() {
        let cat = test_catalogue();
        let clients = vec![view(1)];
        let d = decide(&Message::kv("version", "10.184"), Source::Upstream, &clients, &FilterFlags::default(), &cat);
        assert!(d.actions.is_empty());
        assert_eq!(d.side_effects, vec![SideEffect::UpdateCache("version".into(), "10.184".into())]);
    }

    #[test]
    fn pure_start_keyword_only_reaches_peers_and_waiting_clients() {
        let cat = test_catalogue();
        assert!(cat.mode_of("id").is_pure_start());
        let waiting = ClientView { waiting_for_start_keywords: true, ..view(1) };
        let peer = ClientView { is_peer: true, ..view(2) };
        let bystander = view(3);
        let clients = vec![waiting, peer, bystander];
        let d = decide(&Message::kv("id", "42"), Source::Upstream, &clients, &FilterFlags::default(), &cat);
        let dests: Vec<Dest> = d
            .actions
            .iter()
            .map(|a| match a {
                Action::Deliver(dest, _) => *dest,
                _ => panic!("unexpected action"),
            })
            .collect();
        assert!(dests.contains(&Dest::Client(1)));
        assert!(dests.contains(&Dest::Client(2)));
        assert!(!dests.contains(&Dest::Client(3)));
    }

    #[test]
    fn filter_wins_over_cache_tie_break() {
        let cat = test_catalogue();
        let mut filters = FilterFlags::default();
        filters.elevation = true;
        let d = decide(&Message::kv("Qi198", "123"), Source::Upstream, &[], &filters, &cat);
        assert_eq!(d.actions, vec![]);
        assert_eq!(d.side_effects, vec![SideEffect::CountFiltered]);
    }

    #[test]
    fn pure_delta_never_cached_when_forwarded() {
        let cat = test_catalogue();
        let clients = vec![view(1)];
        let d = decide(&Message::kv("Qi198", "5"), Source::Upstream, &clients, &FilterFlags::default(), &cat);
        assert!(!d.side_effects.iter().any(|e| matches!(e, SideEffect::UpdateCache(..))));
        assert!(d.actions.contains(&Action::Deliver(Dest::Client(1), Message::kv("Qi198", "5"))));
    }

    #[test]
    fn load1_from_upstream_reaches_all_clients() {
        let cat = test_catalogue();
        let clients = vec![view(1), view(2)];
        let d = decide(&Message::signal("load1"), Source::Upstream, &clients, &FilterFlags::default(), &cat);
        assert_eq!(d.actions.len(), 2);
    }

    #[test]
    fn nolong_excludes_default_keyword_set_for_that_client_only() {
        let cat = test_catalogue();
        let excluded = ClientView { nolong: true, ..view(1) };
        let normal = view(2);
        let clients = vec![excluded, normal];
        let d = decide(&Message::kv("Qs121", "x"), Source::Upstream, &clients, &FilterFlags::default(), &cat);
        let dests: Vec<Dest> = d
            .actions
            .iter()
            .map(|a| match a {
                Action::Deliver(dest, _) => *dest,
                _ => panic!(),
            })
            .collect();
        assert!(!dests.contains(&Dest::Client(1)));
        assert!(dests.contains(&Dest::Client(2)));
    }

    #[test]
    fn referentially_transparent() {
        let cat = test_catalogue();
        let clients = vec![view(1), view(2)];
        let msg = Message::kv("Qs121", "v");
        let a = decide(&msg, Source::Upstream, &clients, &FilterFlags::default(), &cat);
        let b = decide(&msg, Source::Upstream, &clients, &FilterFlags::default(), &cat);
        assert_eq!(a, b);
    }
}
