//! Daemon process lifecycle
//!
//! Handles starting, stopping, and restarting the managed daemon, with a
//! graceful-then-forced shutdown path. Process mechanics go through the
//! `ProcessHost` trait so tests can run against a scripted host.

use crate::config::{self, ConnectionConfig};
use crate::error::{Error, Result};
use crate::rpc::{self, RpcClient};
use crate::settings::{DaemonMode, Settings, SettingsStore};
use crate::state::SupervisorState;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::Notify;

/// Graceful shutdown window before the process is force-killed
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Existence probe cadence while waiting for graceful shutdown
const STOP_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Peer seeds passed on mainnet only
const MAINNET_SEEDS: &[&str] = &["node1.nodewarden.io", "node4.nodewarden.io"];

/// Daemon process lifecycle state
///
/// One instance per supervisor; transitions are sequential, never skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Spawn/probe/kill mechanics for the daemon process
pub trait ProcessHost: Send + Sync {
    /// Path to the daemon binary
    fn binary_path(&self) -> PathBuf;

    /// Whether the daemon binary exists on disk
    fn binary_exists(&self) -> bool {
        self.binary_path().exists()
    }

    /// Spawn the daemon with the given arguments, returning its PID
    fn spawn(&self, args: &[String]) -> std::io::Result<u32>;

    /// Whether a daemon process is currently running
    fn exists(&self) -> bool;

    /// Force-terminate the daemon process
    fn kill(&self);
}

/// `ProcessHost` backed by the real system
pub struct SystemProcessHost {
    binary: PathBuf,
    process_name: String,
    child: Mutex<Option<Child>>,
}

impl SystemProcessHost {
    pub fn new(binary: PathBuf) -> Self {
        let process_name = binary
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            binary,
            process_name,
            child: Mutex::new(None),
        }
    }

    fn find_pid(&self) -> Option<u32> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
        for (pid, process) in sys.processes() {
            if process.name().to_string_lossy().to_lowercase() == self.process_name {
                return Some(pid.as_u32());
            }
        }
        None
    }
}

impl ProcessHost for SystemProcessHost {
    fn binary_path(&self) -> PathBuf {
        self.binary.clone()
    }

    fn spawn(&self, args: &[String]) -> std::io::Result<u32> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);

        // Redirect stdio to null to prevent blocking; output is read from the
        // daemon's own log file instead
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.stdin(Stdio::null());

        // On Windows, prevent a console window from appearing
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        log::info!("Spawning daemon: {:?}", cmd);
        let child = cmd.spawn()?;
        let pid = child.id();
        *self.child.lock().unwrap() = Some(child);
        Ok(pid)
    }

    fn exists(&self) -> bool {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
        sys.processes()
            .values()
            .any(|p| p.name().to_string_lossy().to_lowercase() == self.process_name)
    }

    fn kill(&self) {
        // Prefer the child handle if we spawned the process ourselves
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();
            let _ = child.wait();
            return;
        }
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
        for process in sys.processes().values() {
            if process.name().to_string_lossy().to_lowercase() == self.process_name {
                process.kill();
            }
        }
    }
}

/// Build the daemon argument list from settings and resolved config
///
/// Deterministic mapping; one-shot flags (`fork_blocks`, `wallet_clean`) are
/// included here but cleared from settings by the controller right after.
pub fn build_args(settings: &Settings, config: &ConnectionConfig) -> Vec<String> {
    let mut args = vec![
        "-daemon".to_string(),
        "-server".to_string(),
        "-rpcthreads=4".to_string(),
        "-fastsync".to_string(),
        format!("-datadir={}", settings.data_dir.display()),
        format!("-rpcport={}", config.rpc_port),
        format!("-verbose={}", settings.verbose_level),
    ];
    if settings.testnet_iteration > 0 {
        args.push(format!("-testnet={}", settings.testnet_iteration));
    } else {
        // Only seed peers on mainnet
        for seed in MAINNET_SEEDS {
            args.push(format!("-connect={}", seed));
        }
    }
    if settings.fork_blocks > 0 {
        args.push(format!("-forkblocks={}", settings.fork_blocks));
    }
    if settings.wallet_clean {
        args.push("-walletclean".to_string());
    }
    // Avatar is the daemon default, only pass it when turned off
    if !settings.avatar_mode {
        args.push("-avatar=0".to_string());
    }
    if settings.enable_mining {
        args.push("-mining=1".to_string());
        if !settings.ip_mine_whitelist.is_empty() {
            for ip in settings.ip_mine_whitelist.split(';') {
                args.push(format!("-llpallowip={}", ip));
            }
        }
    }
    if settings.enable_staking {
        args.push("-stake=1".to_string());
    }
    args
}

/// Start/stop/restart control for the managed daemon
pub struct DaemonController {
    host: Arc<dyn ProcessHost>,
    rpc: Arc<dyn RpcClient>,
    state: Arc<SupervisorState>,
    store: SettingsStore,
    /// Wakes the poller when auto-connect toggles
    poll_kick: Arc<Notify>,
}

impl DaemonController {
    pub fn new(
        host: Arc<dyn ProcessHost>,
        rpc: Arc<dyn RpcClient>,
        state: Arc<SupervisorState>,
        store: SettingsStore,
        poll_kick: Arc<Notify>,
    ) -> Self {
        Self {
            host,
            rpc,
            state,
            store,
            poll_kick,
        }
    }

    /// Turn on auto-connect and trigger an immediate poll attempt
    pub fn enable_auto_connect(&self) {
        self.state.set_auto_connect(true);
        self.poll_kick.notify_one();
    }

    /// Turn off auto-connect; the pending poll timer is cancelled
    pub fn disable_auto_connect(&self) {
        self.state.set_auto_connect(false);
        self.poll_kick.notify_one();
    }

    /// Start the managed daemon
    ///
    /// No-op in external mode. Adopts an already-running daemon without
    /// re-spawning. Fails with `BinaryNotFound` when the binary is missing.
    pub async fn start(&self) -> Result<()> {
        let settings = self.state.settings();
        if settings.mode == DaemonMode::External {
            log::info!("External daemon mode, skipping daemon start");
            return Ok(());
        }

        self.state.set_process_state(ProcessState::Starting);

        if self.host.exists() {
            log::info!("Daemon process already running, skipping spawn");
            let config = config::resolve(&settings.data_dir)?;
            self.state.set_config(config);
            self.state.set_process_state(ProcessState::Running);
            self.enable_auto_connect();
            return Ok(());
        }

        if !self.host.binary_exists() {
            self.state.set_process_state(ProcessState::Stopped);
            return Err(Error::BinaryNotFound(self.host.binary_path()));
        }

        let config = config::resolve(&settings.data_dir)?;
        let args = build_args(&settings, &config);

        // One-shot flags fire at most once: clear them before the daemon has a
        // chance to come up
        if settings.fork_blocks > 0 || settings.wallet_clean {
            let updated = self.state.update_settings(|s| {
                s.fork_blocks = 0;
                s.wallet_clean = false;
            });
            if let Err(e) = self.store.save(&updated) {
                log::error!("Failed to persist cleared one-shot flags: {}", e);
            }
        }

        let pid = match self.host.spawn(&args) {
            Ok(pid) => pid,
            Err(e) => {
                self.state.set_process_state(ProcessState::Stopped);
                return Err(Error::Spawn(e));
            }
        };
        log::info!("Daemon started with PID {}", pid);

        self.state.set_config(config);
        self.state.set_process_state(ProcessState::Running);
        self.enable_auto_connect();
        Ok(())
    }

    /// Stop the daemon with the default 30 second graceful window
    pub async fn stop(&self, for_restart: bool) -> Result<()> {
        self.stop_with_timeout(DEFAULT_STOP_TIMEOUT, for_restart).await
    }

    /// Stop the daemon, force-killing it if it outlives `timeout`
    ///
    /// A stop timeout escalates to a forced kill but is not an error.
    pub async fn stop_with_timeout(&self, timeout: Duration, for_restart: bool) -> Result<()> {
        log::info!("Stopping daemon...");
        self.state.set_process_state(ProcessState::Stopping);
        self.state.clear_status();

        // Best-effort graceful stop; failure just means the daemon is likely
        // already gone
        rpc::request_stop(&*self.rpc).await;

        let probes = (timeout.as_secs().max(1)) as u32;
        let mut stopped = false;
        for i in 0..probes {
            if !self.host.exists() {
                log::info!("Daemon stopped gracefully");
                stopped = true;
                break;
            }
            log::info!("Daemon still running {}s after stop command", i);
            tokio::time::sleep(STOP_PROBE_INTERVAL).await;
        }
        if !stopped && self.host.exists() {
            log::warn!("Daemon did not stop within {:?}, killing it", timeout);
            self.host.kill();
        }

        self.state.set_process_state(ProcessState::Stopped);
        if !for_restart {
            self.disable_auto_connect();
        }
        Ok(())
    }

    /// Restart the daemon, keeping auto-connect enabled across the gap
    pub async fn restart(&self) -> Result<()> {
        log::info!("Restarting daemon...");
        self.stop(true).await?;
        self.start().await?;
        self.enable_auto_connect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.data_dir = PathBuf::from("/tmp/warden-data");
        settings.verbose_level = 2;
        settings
    }

    fn test_config(settings: &Settings) -> ConnectionConfig {
        let mut config = ConnectionConfig::from_settings(settings);
        config.rpc_port = 9336;
        config
    }

    #[test]
    fn args_mainnet_defaults() {
        let settings = test_settings();
        let args = build_args(&settings, &test_config(&settings));
        assert_eq!(args[0], "-daemon");
        assert!(args.contains(&"-datadir=/tmp/warden-data".to_string()));
        assert!(args.contains(&"-rpcport=9336".to_string()));
        assert!(args.contains(&"-verbose=2".to_string()));
        assert!(args.iter().any(|a| a.starts_with("-connect=")));
        assert!(!args.iter().any(|a| a.starts_with("-testnet")));
        assert!(!args.contains(&"-avatar=0".to_string()));
        assert!(!args.contains(&"-stake=1".to_string()));
    }

    #[test]
    fn args_testnet_has_no_seeds() {
        let mut settings = test_settings();
        settings.testnet_iteration = 3;
        let args = build_args(&settings, &test_config(&settings));
        assert!(args.contains(&"-testnet=3".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-connect=")));
    }

    #[test]
    fn args_one_shot_and_toggles() {
        let mut settings = test_settings();
        settings.fork_blocks = 123;
        settings.wallet_clean = true;
        settings.avatar_mode = false;
        settings.enable_mining = true;
        settings.ip_mine_whitelist = "10.0.0.1;10.0.0.2".to_string();
        settings.enable_staking = true;
        let args = build_args(&settings, &test_config(&settings));
        assert!(args.contains(&"-forkblocks=123".to_string()));
        assert!(args.contains(&"-walletclean".to_string()));
        assert!(args.contains(&"-avatar=0".to_string()));
        assert!(args.contains(&"-mining=1".to_string()));
        assert!(args.contains(&"-llpallowip=10.0.0.1".to_string()));
        assert!(args.contains(&"-llpallowip=10.0.0.2".to_string()));
        assert!(args.contains(&"-stake=1".to_string()));
    }
}
