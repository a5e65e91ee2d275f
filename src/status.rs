//! Operator status-display ticker (spec §4.7, §5: "1 status-display
//! ticker").
//!
//! This task owns no state — it only wakes the core up at a fixed cadence
//! by sending [`RouterEvent::StatusTick`]; the core does the actual
//! snapshotting and printing, since only it may touch the client table.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::events::RouterEvent;

/// Default status-display cadence (spec §4.7).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the ticker task.
pub fn spawn(interval: Duration, router_events: UnboundedSender<RouterEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if router_events.send(RouterEvent::StatusTick).is_err() {
                break;
            }
        }
    })
}
