//! Append-only traffic log with size-based rotation.
//!
//! A bounded `mpsc::channel(N)` feeds a dedicated drain task: the hot path
//! only ever does a non-blocking `try_send`; if the channel is full the
//! entry is dropped and a counter bumped rather than ever blocking the
//! forwarding path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::message::Message;

/// Capacity of the traffic-log channel; entries beyond this are dropped.
const CHANNEL_CAPACITY: usize = 4096;

/// Direction a logged line travelled, for the `>`/`<` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Router → peer.
    Out,
    /// Peer → router.
    In,
}

impl Direction {
    fn glyph(self) -> char {
        match self {
            Direction::Out => '>',
            Direction::In => '<',
        }
    }
}

/// One traffic-log entry queued for the writer task.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Direction of travel.
    pub direction: Direction,
    /// Session id, or 0 for the upstream connection.
    pub peer_id: u64,
    /// The line itself, without its terminator.
    pub line: String,
}

impl Entry {
    /// Build an entry from a decoded [`Message`].
    pub fn from_message(direction: Direction, peer_id: u64, msg: &Message) -> Entry {
        Entry {
            direction,
            peer_id,
            line: msg.to_line(),
        }
    }
}

/// Handle held by the router core to submit entries without blocking.
#[derive(Debug, Clone)]
pub struct TrafficLogHandle {
    tx: Option<mpsc::Sender<Entry>>,
    dropped: Arc<AtomicU64>,
}

impl TrafficLogHandle {
    /// A handle that discards everything (traffic logging disabled).
    pub fn disabled() -> TrafficLogHandle {
        TrafficLogHandle {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an entry; drops it and bumps the counter if the channel is full
    /// or logging is disabled.
    pub fn log(&self, entry: Entry) {
        let Some(tx) = &self.tx else { return };
        if tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total entries dropped due to a full channel, for `/api/stats`.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawn the writer task. Returns the handle the core uses to submit
/// entries, and the task's `JoinHandle` for graceful-shutdown joining.
pub fn spawn(
    directory: PathBuf,
    max_size: u64,
    keep_versions: u32,
) -> (TrafficLogHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = TrafficLogHandle {
        tx: Some(tx),
        dropped,
    };
    let join = tokio::spawn(run(directory, max_size, keep_versions, rx));
    (handle, join)
}

async fn run(directory: PathBuf, max_size: u64, keep_versions: u32, mut rx: mpsc::Receiver<Entry>) {
    if let Err(e) = std::fs::create_dir_all(&directory) {
        log::error!("[trafficlog] could not create log directory {}: {e}", directory.display());
        return;
    }
    let path = directory.join("traffic.log");
    let mut file = match open_for_append(&path) {
        Ok(f) => f,
        Err(e) => {
            log::error!("[trafficlog] could not open {}: {e}", path.display());
            return;
        }
    };
    let mut written: u64 = file.metadata().map(|m| m.len()).unwrap_or(0);

    while let Some(entry) = rx.recv().await {
        let line = format!(
            "{} {} {} {}\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            entry.direction.glyph(),
            entry.peer_id,
            entry.line
        );
        if let Err(e) = file.write_all(line.as_bytes()) {
            log::error!("[trafficlog] write failed: {e}");
            continue;
        }
        written += line.len() as u64;

        if max_size > 0 && written >= max_size {
            if let Err(e) = rotate(&directory, &path, keep_versions) {
                log::error!("[trafficlog] rotation failed: {e}");
            }
            file = match open_for_append(&path) {
                Ok(f) => f,
                Err(e) => {
                    log::error!("[trafficlog] could not reopen {}: {e}", path.display());
                    return;
                }
            };
            written = 0;
        }
    }
}

fn open_for_append(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Shift `traffic.log.N` → `traffic.log.N+1` up to `keep_versions`, then
/// move the live file to `traffic.log.1`.
fn rotate(directory: &Path, path: &Path, keep_versions: u32) -> std::io::Result<()> {
    if keep_versions == 0 {
        std::fs::remove_file(path).ok();
        return Ok(());
    }
    for n in (1..keep_versions).rev() {
        let from = directory.join(format!("traffic.log.{n}"));
        let to = directory.join(format!("traffic.log.{}", n + 1));
        if from.exists() {
            std::fs::rename(from, to)?;
        }
    }
    std::fs::rename(path, directory.join("traffic.log.1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_handle_never_touches_disk() {
        let handle = TrafficLogHandle::disabled();
        handle.log(Entry {
            direction: Direction::Out,
            peer_id: 1,
            line: "bang".into(),
        });
        assert_eq!(handle.dropped_count(), 0);
    }

    #[tokio::test]
    async fn writes_and_reads_back_a_line() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn(dir.path().to_path_buf(), 0, 0);
        handle.log(Entry {
            direction: Direction::In,
            peer_id: 7,
            line: "Qs121=hello".into(),
        });
        drop(handle);
        join.await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("traffic.log")).unwrap();
        assert!(contents.contains("Qs121=hello"));
        assert!(contents.contains(" < 7 "));
    }
}
