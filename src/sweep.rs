//! Periodic staleness sweep. Market-data blocks whose backfill never
//! terminated are cancelled on a timer from outside the callback handlers,
//! so a silent gateway cannot pin a block open forever.

use crate::session::TerminalSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawn the sweep for `session`. The task runs until the session shuts
/// down; ticks skipped under load are dropped, not replayed.
pub fn spawn_stale_request_sweep(session: Arc<TerminalSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(session.config.sweep_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("stale-request sweep started");
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let swept = session.sweep_stale_requests();
                    if !swept.is_empty() {
                        info!(bases = ?swept, "cancelled stale backfill blocks");
                    }
                }
            }
        }
        debug!("stale-request sweep exited");
    })
}
