//! nodewarden - supervisor for an external node daemon
//!
//! Supervises a long-running node process: starts and stops it, keeps
//! connectivity state synchronized through an adaptive-backoff poller, tails
//! its log output, and reconciles transaction confirmations against
//! block-height changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Supervisor                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  settings.rs - user settings with JSON persistence        │
//! │  config.rs   - conf-file resolver, connection parameters  │
//! │  process.rs  - process lifecycle (start/stop/restart)     │
//! │  poller.rs   - adaptive-backoff connection health poller  │
//! │  tail.rs     - rotation-tolerant log tail watcher         │
//! │  txwatch.rs  - confirmation reconciliation, balance deltas│
//! │  rpc.rs      - JSON-RPC client                            │
//! │  state.rs    - shared runtime state, block event feed     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Process and RPC mechanics are injected through the `ProcessHost` and
//! `RpcClient` traits so multiple independent supervisors can coexist and
//! tests run against scripted collaborators.

pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod process;
pub mod rpc;
pub mod settings;
pub mod state;
pub mod tail;
pub mod txwatch;

pub use config::ConnectionConfig;
pub use error::{Error, Result, RpcError};
pub use process::{DaemonController, ProcessHost, ProcessState, SystemProcessHost};
pub use rpc::{DaemonStatus, HttpRpcClient, RpcClient};
pub use settings::{DaemonMode, Settings, SettingsStore};
pub use state::SupervisorState;
pub use tail::{TailEvent, TailOptions, TailState, TailWatcher};
pub use txwatch::{BalanceChange, Contract, ContractOp, Transaction, TxEvent, TxWatcher};

use poller::Poller;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// One daemon supervisor instance
///
/// Owns all supervision state explicitly; must be constructed inside a tokio
/// runtime since it spawns the poll and reconciliation tasks.
pub struct Supervisor {
    state: Arc<SupervisorState>,
    controller: DaemonController,
    poller: Poller,
    txwatch: TxWatcher,
    tx_events: Mutex<Option<mpsc::UnboundedReceiver<TxEvent>>>,
    tail: Mutex<Option<TailWatcher>>,
}

impl Supervisor {
    /// Build a supervisor from its collaborators
    pub fn new(
        host: Arc<dyn ProcessHost>,
        rpc: Arc<dyn RpcClient>,
        store: SettingsStore,
    ) -> Self {
        let settings = store.load();
        let state = SupervisorState::new(settings);
        let kick = Arc::new(Notify::new());
        let controller =
            DaemonController::new(host, rpc.clone(), state.clone(), store, kick.clone());
        let poller = Poller::spawn(rpc.clone(), state.clone(), kick);
        let (txwatch, tx_events) = TxWatcher::spawn(rpc, state.subscribe_blocks());
        Self {
            state,
            controller,
            poller,
            txwatch,
            tx_events: Mutex::new(Some(tx_events)),
            tail: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &Arc<SupervisorState> {
        &self.state
    }

    pub fn controller(&self) -> &DaemonController {
        &self.controller
    }

    /// Confirmation tracking and the transaction cache
    pub fn transactions(&self) -> &TxWatcher {
        &self.txwatch
    }

    /// Take the reconciliation event receiver; available once
    pub fn take_tx_events(&self) -> Option<mpsc::UnboundedReceiver<TxEvent>> {
        self.tx_events.lock().unwrap().take()
    }

    /// Start the managed daemon (see `DaemonController::start`)
    pub async fn start_daemon(&self) -> Result<()> {
        self.controller.start().await
    }

    /// Stop the managed daemon, disabling auto-connect
    pub async fn stop_daemon(&self) -> Result<()> {
        self.controller.stop(false).await
    }

    /// Restart the managed daemon, keeping auto-connect enabled
    pub async fn restart_daemon(&self) -> Result<()> {
        self.controller.restart().await
    }

    /// Start tailing the daemon log; any previous watch is released first
    pub fn watch_log(
        &self,
        path: PathBuf,
        options: TailOptions,
    ) -> mpsc::UnboundedReceiver<TailEvent> {
        let (watcher, rx) = TailWatcher::spawn(path, options);
        if let Some(old) = self.tail.lock().unwrap().replace(watcher) {
            old.unwatch();
        }
        rx
    }

    /// Stop tailing the daemon log; idempotent
    pub fn unwatch_log(&self) {
        if let Some(watcher) = self.tail.lock().unwrap().take() {
            watcher.unwatch();
        }
    }

    /// Tear down all background tasks; idempotent
    pub fn shutdown(&self) {
        self.controller.disable_auto_connect();
        self.poller.shutdown();
        self.txwatch.shutdown();
        self.unwatch_log();
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
