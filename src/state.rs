//! Shared runtime state for one supervisor instance
//!
//! Everything that was ambient module state in earlier designs (connected
//! flag, cached status, auto-connect toggle) lives here as explicit fields so
//! several independent supervisors can coexist and tests stay deterministic.

use crate::config::ConnectionConfig;
use crate::process::ProcessState;
use crate::rpc::DaemonStatus;
use crate::settings::Settings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Shared state owned by a supervisor
#[derive(Debug)]
pub struct SupervisorState {
    /// Daemon process lifecycle state
    process: Mutex<ProcessState>,

    /// Connection config resolved for the current session
    config: Mutex<Option<ConnectionConfig>>,

    /// User settings snapshot
    settings: Mutex<Settings>,

    /// Whether the poller should keep scheduling attempts.
    /// Read at timer fire time, not schedule time.
    auto_connect: AtomicBool,

    /// Whether the last status fetch succeeded
    connected: AtomicBool,

    /// Last status reported by the daemon, None while disconnected
    status: Mutex<Option<DaemonStatus>>,

    /// Block-height change feed; None means no block information (disconnected)
    blocks_tx: watch::Sender<Option<u64>>,
}

impl SupervisorState {
    pub fn new(settings: Settings) -> Arc<Self> {
        let (blocks_tx, _) = watch::channel(None);
        Arc::new(Self {
            process: Mutex::new(ProcessState::Stopped),
            config: Mutex::new(None),
            settings: Mutex::new(settings),
            auto_connect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            status: Mutex::new(None),
            blocks_tx,
        })
    }

    pub fn process_state(&self) -> ProcessState {
        *self.process.lock().unwrap()
    }

    pub fn set_process_state(&self, next: ProcessState) {
        let mut state = self.process.lock().unwrap();
        if *state != next {
            log::info!("Daemon process state: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    pub fn config(&self) -> Option<ConnectionConfig> {
        self.config.lock().unwrap().clone()
    }

    pub fn set_config(&self, config: ConnectionConfig) {
        *self.config.lock().unwrap() = Some(config);
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().unwrap().clone()
    }

    /// Mutate the settings snapshot in place
    pub fn update_settings<F>(&self, f: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.lock().unwrap();
        f(&mut settings);
        settings.clone()
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect.load(Ordering::SeqCst)
    }

    pub fn set_auto_connect(&self, enabled: bool) {
        self.auto_connect.store(enabled, Ordering::SeqCst);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Option<DaemonStatus> {
        self.status.lock().unwrap().clone()
    }

    /// Record the outcome of a status fetch and publish a block event when the
    /// height actually changed (or block information was lost)
    pub fn publish_status(&self, status: Option<DaemonStatus>) {
        self.connected.store(status.is_some(), Ordering::SeqCst);
        let height = status.as_ref().map(|s| s.blocks);
        *self.status.lock().unwrap() = status;
        self.blocks_tx.send_if_modified(|current| {
            if *current != height {
                *current = height;
                true
            } else {
                false
            }
        });
    }

    /// Forget the cached status, e.g. when the daemon is being stopped
    pub fn clear_status(&self) {
        self.publish_status(None);
    }

    /// Subscribe to block-height change events
    pub fn subscribe_blocks(&self) -> watch::Receiver<Option<u64>> {
        self.blocks_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_events_only_on_height_change() {
        let state = SupervisorState::new(Settings::default());
        let mut rx = state.subscribe_blocks();

        state.publish_status(Some(DaemonStatus {
            blocks: 10,
            ..Default::default()
        }));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        // Same height, different peer count: no event
        state.publish_status(Some(DaemonStatus {
            blocks: 10,
            connections: 5,
            ..Default::default()
        }));
        assert!(!rx.has_changed().unwrap());

        state.publish_status(Some(DaemonStatus {
            blocks: 11,
            ..Default::default()
        }));
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        // Disconnect clears block information
        state.publish_status(None);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), None);
        assert!(!state.connected());
    }
}
