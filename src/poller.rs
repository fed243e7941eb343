//! Connection health poller
//!
//! Repeatedly probes the daemon status over RPC with an adaptive wait: a
//! healthy connection is polled at the longest interval (only periodic
//! refresh is needed), a fresh drop retries fast, and a never-connected
//! supervisor ramps up slowly to the cap. Failures are absorbed here and only
//! ever show up as connectivity state.

use crate::rpc::{self, RpcClient};
use crate::state::SupervisorState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Backoff increment and fast-retry wait
pub const MIN_INCREMENT: Duration = Duration::from_secs(1);

/// Longest wait between attempts
pub const MAX_WAIT: Duration = Duration::from_secs(10);

/// Next wait duration given the attempt outcome and prior state
///
/// The asymmetry is deliberate: a failure right after a success retries at
/// the minimum, while a never-connected supervisor ramps one increment per
/// failure up to the cap.
fn next_wait(success: bool, was_connected: bool, wait: Duration) -> Duration {
    if success {
        MAX_WAIT
    } else if was_connected {
        MIN_INCREMENT
    } else if wait < MAX_WAIT {
        (wait + MIN_INCREMENT).min(MAX_WAIT)
    } else {
        MAX_WAIT
    }
}

/// Handle to the background poll task
pub struct Poller {
    kick: Arc<Notify>,
    live: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Spawn the poll loop. `kick` wakes it for an immediate attempt when
    /// auto-connect is toggled.
    pub fn spawn(
        rpc: Arc<dyn RpcClient>,
        state: Arc<SupervisorState>,
        kick: Arc<Notify>,
    ) -> Self {
        let live = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run(rpc, state, kick.clone(), live.clone()));
        Self { kick, live, handle }
    }

    /// Stop the loop; idempotent, and an in-flight attempt will not reschedule
    pub fn shutdown(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.kick.notify_one();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
        self.handle.abort();
    }
}

async fn run(
    rpc: Arc<dyn RpcClient>,
    state: Arc<SupervisorState>,
    kick: Arc<Notify>,
    live: Arc<AtomicBool>,
) {
    let mut wait = Duration::ZERO;
    let mut connected = false;

    loop {
        if !live.load(Ordering::SeqCst) {
            break;
        }
        // Park until auto-connect is enabled
        if !state.auto_connect() {
            kick.notified().await;
            continue;
        }

        let result = rpc::fetch_status(&*rpc).await;
        wait = next_wait(result.is_ok(), connected, wait);
        connected = result.is_ok();
        match result {
            Ok(status) => {
                log::debug!("Daemon status: {} blocks, {} peers", status.blocks, status.connections);
                state.publish_status(Some(status));
            }
            Err(e) => {
                log::debug!("Status fetch failed: {}", e);
                state.publish_status(None);
            }
        }

        // Liveness and auto-connect are re-read at fire time: both may have
        // changed during the awaited call
        if !live.load(Ordering::SeqCst) {
            break;
        }
        if !state.auto_connect() {
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = kick.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_always_yields_max_wait() {
        assert_eq!(next_wait(true, false, Duration::ZERO), MAX_WAIT);
        assert_eq!(next_wait(true, true, MIN_INCREMENT), MAX_WAIT);
        assert_eq!(next_wait(true, false, MAX_WAIT), MAX_WAIT);
    }

    #[test]
    fn failure_after_success_retries_fast() {
        assert_eq!(next_wait(false, true, MAX_WAIT), MIN_INCREMENT);
    }

    #[test]
    fn never_connected_ramps_to_cap() {
        let mut wait = Duration::ZERO;
        for n in 1..=15u32 {
            wait = next_wait(false, false, wait);
            let expected = (MIN_INCREMENT * n).min(MAX_WAIT);
            assert_eq!(wait, expected, "after {} failures", n);
        }
        assert_eq!(wait, MAX_WAIT);
    }
}
