//! Periodic keepalive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skiff_proto::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Connection;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Handle for controlling the heartbeat task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    running: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Check if the heartbeat task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of heartbeats sent so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    /// Stop the heartbeat task.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start sending a heartbeat command every `interval`.
///
/// The first heartbeat goes out one interval after the call. The task ends
/// on its own once the connection is closed.
pub fn start_heartbeat_task(conn: Connection, interval: Duration) -> HeartbeatHandle {
    let running = Arc::new(AtomicBool::new(true));
    let sent = Arc::new(AtomicU64::new(0));

    let task = {
        let running = Arc::clone(&running);
        let sent = Arc::clone(&sent);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);

            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if conn.send_cmd(Command::Heartbeat).is_err() {
                    debug!("connection closed, heartbeat stopping");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                sent.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    HeartbeatHandle { running, sent, task }
}
