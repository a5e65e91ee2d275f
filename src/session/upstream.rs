//! Upstream session state (spec §3, §4.4): the single outbound-initiated
//! connection to the authoritative server or a peer router.

use std::time::{Duration, Instant};

use rand::Rng;

use super::OutboundHandle;

/// States of the upstream reconnect loop (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    /// No connection attempt in flight.
    Disconnected,
    /// TCP dial in progress.
    Connecting,
    /// TCP connected, waiting for the upstream's welcome to complete.
    Authing,
    /// Welcome received; normal routing applies.
    Live,
}

/// Dial target for the upstream connection (spec §4.4 switchover).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Upstream hostname or address.
    pub host: String,
    /// Upstream TCP port.
    pub port: u16,
    /// Shared-secret password sent in the FRDP `AUTH` line, if any.
    pub password: String,
}

/// Exponential backoff for the reconnect loop: starts at 1s, doubles to a
/// 30s cap, resets to 1s on a successful `Live` entry (spec §4.4).
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Backoff {
        Backoff {
            current: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    const CAP: Duration = Duration::from_secs(30);

    /// Duration to wait before the next dial attempt, then double it.
    ///
    /// A small jitter (+/-20%) is mixed into the returned wait so that
    /// several routers losing the same upstream at once don't all redial
    /// in lockstep.
    pub fn next(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(Self::CAP);
        let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered_millis = (base.as_millis() as f64) * (1.0 + jitter_frac);
        Duration::from_millis(jittered_millis.max(0.0) as u64)
    }

    /// Reset to the initial 1s value after a successful connection.
    pub fn reset(&mut self) {
        self.current = Duration::from_secs(1);
    }
}

/// Singleton upstream session state.
#[derive(Debug)]
pub struct UpstreamSession {
    /// Current reconnect-loop state.
    pub state: UpstreamState,
    /// Current dial target; replaced atomically on switchover.
    pub target: UpstreamTarget,
    /// Reconnect backoff, reset on each successful `Live` entry.
    pub backoff: Backoff,
    /// When the most recent `start` signal was sent upstream.
    pub start_sent_at: Option<Instant>,
    /// Outbound handle to the upstream writer task, once connected.
    pub outbound: Option<OutboundHandle>,
    /// Lines sent to upstream.
    pub lines_out: u64,
    /// Lines received from upstream.
    pub lines_in: u64,
    /// Bytes sent to upstream.
    pub bytes_out: u64,
    /// Bytes received from upstream.
    pub bytes_in: u64,
}

impl UpstreamSession {
    /// Construct a session in `Disconnected` state targeting `target`.
    pub fn new(target: UpstreamTarget) -> UpstreamSession {
        UpstreamSession {
            state: UpstreamState::Disconnected,
            target,
            backoff: Backoff::default(),
            start_sent_at: None,
            outbound: None,
            lines_out: 0,
            lines_in: 0,
            bytes_out: 0,
            bytes_in: 0,
        }
    }

    /// Whether the upstream is fully live (welcome received).
    pub fn is_live(&self) -> bool {
        self.state == UpstreamState::Live
    }

    /// Replace the dial target (operator switchover). Does not touch the
    /// live connection; the caller is responsible for tearing down the
    /// current one so the reconnect loop picks up the new target.
    pub fn switch_target(&mut self, target: UpstreamTarget) {
        self.target = target;
    }

    /// Transition into `Live`: reset backoff (spec §4.4).
    pub fn mark_live(&mut self, outbound: OutboundHandle) {
        self.state = UpstreamState::Live;
        self.outbound = Some(outbound);
        self.backoff.reset();
    }

    /// Transition into `Disconnected` after an EOF/error while `Live`
    /// (caller fans `load1` out to all clients before calling this, per
    /// spec §5's ordering guarantee).
    pub fn mark_disconnected(&mut self) {
        self.state = UpstreamState::Disconnected;
        self.outbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> UpstreamTarget {
        UpstreamTarget {
            host: "localhost".into(),
            port: 20747,
            password: String::new(),
        }
    }

    fn assert_near(actual: Duration, expected: Duration) {
        let lo = expected.mul_f64(0.8);
        let hi = expected.mul_f64(1.2);
        assert!(
            actual >= lo && actual <= hi,
            "{actual:?} not within +/-20% of {expected:?}"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::default();
        assert_near(b.next(), Duration::from_secs(1));
        assert_near(b.next(), Duration::from_secs(2));
        assert_near(b.next(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next();
        }
        assert_near(b.next(), Duration::from_secs(30));
    }

    #[test]
    fn backoff_resets_after_live() {
        let mut session = UpstreamSession::new(target());
        session.backoff.next();
        session.backoff.next();
        session.backoff.reset();
        assert_near(session.backoff.next(), Duration::from_secs(1));
    }

    #[test]
    fn switchover_replaces_target_without_touching_state() {
        let mut session = UpstreamSession::new(target());
        session.state = UpstreamState::Live;
        session.switch_target(UpstreamTarget {
            host: "localhost".into(),
            port: 20748,
            password: String::new(),
        });
        assert_eq!(session.target.port, 20748);
        assert_eq!(session.state, UpstreamState::Live);
    }
}
