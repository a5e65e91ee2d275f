//! Per-connection session state (spec §3, §4.3, §4.4).

pub mod client;
pub mod upstream;

pub use client::{ClientSession, ClientState};
pub use upstream::{UpstreamSession, UpstreamState};

/// Outbound-queue backpressure warning threshold in bytes (spec §5).
pub const QUEUE_HIGH_WATER_BYTES: i64 = 1024 * 1024;

/// A handle a session holds to push outbound bytes without blocking the
/// core routing task (spec §9: "break the cyclic router ↔ session reference
/// by keying sessions by numeric id; sessions hold only their id plus a
/// handle for enqueueing outbound messages — a channel, not a back-pointer").
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: tokio::sync::mpsc::UnboundedSender<crate::message::Message>,
    queued_bytes: std::sync::Arc<std::sync::atomic::AtomicI64>,
}

impl OutboundHandle {
    /// Wrap a channel sender with a shared byte-depth counter.
    pub fn new(
        tx: tokio::sync::mpsc::UnboundedSender<crate::message::Message>,
        queued_bytes: std::sync::Arc<std::sync::atomic::AtomicI64>,
    ) -> OutboundHandle {
        OutboundHandle { tx, queued_bytes }
    }

    /// Enqueue a message for delivery. Returns `false` if the writer task
    /// (and therefore the connection) is already gone.
    pub fn send(&self, msg: crate::message::Message) -> bool {
        let approx_len = msg.to_line().len() as i64 + 2;
        if self.tx.send(msg).is_ok() {
            self.queued_bytes
                .fetch_add(approx_len, std::sync::atomic::Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Current approximate outbound-queue depth in bytes.
    pub fn queue_depth(&self) -> i64 {
        self.queued_bytes.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Whether the queue is over the backpressure warning threshold.
    pub fn over_high_water(&self) -> bool {
        self.queue_depth() > QUEUE_HIGH_WATER_BYTES
    }
}
