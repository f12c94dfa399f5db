//! Heartbeat liveness supervision.
//!
//! Each connection is a two-state machine driven by the tick:
//! `Alive` → probe sent, flag cleared → `AwaitingReply` → echo received → `Alive`,
//! or no echo before the next tick → terminated.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use presence_core::Message;
use presence_core::time::now_millis;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connections::ConnectionSet;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Connections that received a probe.
    pub probed: usize,
    /// Connections terminated for missing the previous probe.
    pub terminated: usize,
}

/// Run one heartbeat tick over every open connection.
pub fn tick(connections: &ConnectionSet) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    for conn in connections.snapshot() {
        if !conn.is_open() {
            continue;
        }
        if !conn.is_alive() {
            info!(conn_id = %conn.id, "missed heartbeat, terminating connection");
            conn.terminate();
            outcome.terminated += 1;
            continue;
        }
        conn.mark_awaiting_reply();
        if conn.send(&Message::heartbeat(now_millis())) {
            outcome.probed += 1;
        }
    }
    outcome
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic prober. Disabled when constructed without an interval.
pub struct HeartbeatSupervisor {
    interval: Option<Duration>,
    running: Mutex<Option<Running>>,
}

impl HeartbeatSupervisor {
    /// Create a supervisor; `None` disables heartbeating.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            running: Mutex::new(None),
        }
    }

    /// Configured period.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Start the free-running timer. The first tick fires one interval from now.
    ///
    /// Returns `false` when heartbeating is disabled or already running.
    pub fn start(&self, connections: Arc<ConnectionSet>) -> bool {
        let Some(interval) = self.interval else {
            warn!("heartbeating is disabled");
            return false;
        };

        let mut running = self.running.lock();
        if running.is_some() {
            warn!("heartbeating was already started");
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(connections, interval, cancel.clone()));
        *running = Some(Running { cancel, task });

        info!(interval_ms = interval.as_millis(), "heartbeating has been started");
        true
    }

    /// Cancel the timer. No probes are sent afterwards. Idempotent.
    ///
    /// Returns `true` only for the call that actually stopped it.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(Running { cancel, task }) => {
                cancel.cancel();
                task.abort();
                debug!("heartbeating stopped");
                true
            }
            None => false,
        }
    }

    /// Whether the timer is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for HeartbeatSupervisor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

async fn run(connections: Arc<ConnectionSet>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = tick(&connections);
                if outcome.terminated > 0 {
                    info!(terminated = outcome.terminated, "evicted unresponsive connections");
                }
                debug!(probed = outcome.probed, "heartbeat tick");
            }
            () = cancel.cancelled() => return,
        }
    }
}
