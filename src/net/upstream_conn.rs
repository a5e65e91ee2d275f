//! Upstream reader/writer tasks plus the dial/backoff supervisor loop
//! (spec §4.4, §5).
//!
//! Grounded on the teacher's `socket::client_conn` read/write split, run
//! here from inside a supervisor that also owns the reconnect loop —
//! the teacher's broker reconnects its single upstream link the same way
//! it accepts downstream ones, just with a dial step and backoff in front.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::events::RouterEvent;
use crate::message::{LineCodec, Message};
use crate::session::upstream::{Backoff, UpstreamTarget};
use crate::session::OutboundHandle;

const DIAL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Runs forever, dialing `initial` and then whatever target arrives on
/// `switch_rx`, reconnecting with backoff whenever the link drops.
///
/// Every connect/line/disconnect is reported to the core over
/// `router_events`; the only state this task owns privately is the dial
/// target and the backoff counter, neither of which the core needs to see.
pub async fn run(
    initial: UpstreamTarget,
    mut switch_rx: UnboundedReceiver<UpstreamTarget>,
    router_events: UnboundedSender<RouterEvent>,
) {
    let mut target = initial;
    let mut backoff = Backoff::default();

    loop {
        tokio::select! {
            biased;
            Some(new_target) = switch_rx.recv() => {
                log::info!(
                    "[net] upstream switch requested: {}:{}",
                    new_target.host, new_target.port
                );
                target = new_target;
                backoff.reset();
                continue;
            }
            result = connect_and_run(&target, &router_events, &mut switch_rx) => {
                match result {
                    RunOutcome::SwitchRequested(new_target) => {
                        target = new_target;
                        backoff.reset();
                    }
                    RunOutcome::Disconnected => {
                        let wait = backoff.next();
                        log::warn!(
                            "[net] upstream {}:{} unavailable, retrying in {:?}",
                            target.host, target.port, wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }
    }
}

enum RunOutcome {
    /// The read loop ended because an operator switch arrived mid-session.
    SwitchRequested(UpstreamTarget),
    /// The read loop ended because the connection dropped or never dialed.
    Disconnected,
}

async fn connect_and_run(
    target: &UpstreamTarget,
    router_events: &UnboundedSender<RouterEvent>,
    switch_rx: &mut UnboundedReceiver<UpstreamTarget>,
) -> RunOutcome {
    let stream = match timeout(DIAL_TIMEOUT, TcpStream::connect((target.host.as_str(), target.port)))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            log::warn!("[net] upstream dial {}:{} failed: {e}", target.host, target.port);
            return RunOutcome::Disconnected;
        }
        Err(_) => {
            log::warn!("[net] upstream dial {}:{} timed out", target.host, target.port);
            return RunOutcome::Disconnected;
        }
    };
    log::info!("[net] upstream connected to {}:{}", target.host, target.port);

    let framed = Framed::new(stream, LineCodec::new());
    let (mut sink, mut stream) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let queued_bytes = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));
    let outbound = OutboundHandle::new(tx, queued_bytes.clone());

    if router_events
        .send(RouterEvent::UpstreamConnected { outbound })
        .is_err()
    {
        return RunOutcome::Disconnected;
    }

    let write_events = router_events.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let approx_len = msg.to_line().len() as i64 + 2;
            let started = std::time::Instant::now();
            if sink.send(msg).await.is_err() {
                break;
            }
            queued_bytes.fetch_sub(approx_len, std::sync::atomic::Ordering::Relaxed);
            let _ = write_events.send(RouterEvent::WriteLatencySample {
                peer_id: 0,
                latency: started.elapsed(),
            });
        }
    });

    let outcome = loop {
        tokio::select! {
            biased;
            Some(new_target) = switch_rx.recv() => {
                break RunOutcome::SwitchRequested(new_target);
            }
            next = stream.next() => {
                match next {
                    Some(Ok(msg)) => {
                        if router_events.send(RouterEvent::UpstreamLine { msg }).is_err() {
                            break RunOutcome::Disconnected;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("[net] upstream read error: {e}");
                        break RunOutcome::Disconnected;
                    }
                    None => break RunOutcome::Disconnected,
                }
            }
        }
    };

    write_handle.abort();
    let _ = router_events.send(RouterEvent::UpstreamDisconnected);
    outcome
}
