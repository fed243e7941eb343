//! User settings with JSON persistence
//!
//! Settings drive the daemon launch parameters. The one-shot flags
//! (`fork_blocks`, `wallet_clean`) are cleared by the controller immediately
//! after being turned into arguments so they fire at most once.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Who is responsible for running the daemon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DaemonMode {
    /// The supervisor spawns and stops the daemon itself
    #[default]
    Managed,
    /// The user runs their own daemon; the supervisor only connects to it
    External,
}

/// Settings stored in settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Daemon mode (managed or external)
    pub mode: DaemonMode,

    /// Daemon data directory (conf file, logs, chain state)
    pub data_dir: PathBuf,

    /// Daemon log verbosity (-verbose=<n>)
    pub verbose_level: u32,

    /// Testnet iteration; 0 means mainnet
    pub testnet_iteration: u32,

    /// One-shot: fork block override, cleared after use; 0 means unset
    pub fork_blocks: u64,

    /// One-shot: pass -walletclean on next start, cleared after use
    pub wallet_clean: bool,

    /// Avatar mode is the daemon default, so it is only passed when off
    pub avatar_mode: bool,

    /// Enable mining (-mining=1)
    pub enable_mining: bool,

    /// Semicolon-separated IPs allowed to mine, only used when mining is on
    pub ip_mine_whitelist: String,

    /// Enable staking (-stake=1)
    pub enable_staking: bool,

    /// External mode: daemon IP
    pub external_ip: String,

    /// External mode: use SSL for RPC
    pub external_rpc_ssl: bool,

    /// External mode: RPC ports (0 means default)
    pub external_rpc_port: u16,
    pub external_rpc_port_ssl: u16,

    /// External mode: use SSL for the API
    pub external_api_ssl: bool,

    /// External mode: API ports (0 means default)
    pub external_api_port: u16,
    pub external_api_port_ssl: u16,

    /// External mode: RPC credentials
    pub external_user: Option<String>,
    pub external_password: Option<String>,

    /// External mode: API credentials
    pub external_api_user: Option<String>,
    pub external_api_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: DaemonMode::Managed,
            data_dir: default_data_dir(),
            verbose_level: 0,
            testnet_iteration: 0,
            fork_blocks: 0,
            wallet_clean: false,
            avatar_mode: true,
            enable_mining: false,
            ip_mine_whitelist: String::new(),
            enable_staking: false,
            external_ip: "127.0.0.1".to_string(),
            external_rpc_ssl: true,
            external_rpc_port: 0,
            external_rpc_port_ssl: 0,
            external_api_ssl: true,
            external_api_port: 0,
            external_api_port_ssl: 0,
            external_user: None,
            external_password: None,
            external_api_user: None,
            external_api_password: None,
        }
    }
}

/// Default daemon data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nodewarden")
        .join("core")
}

/// Default path to settings.json
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nodewarden")
        .join("settings.json")
}

/// Loads and saves settings at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load settings from disk, or return defaults if missing or unreadable
    pub fn load(&self) -> Settings {
        match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Settings::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(Error::Config)?;
        }
        let contents = serde_json::to_string_pretty(settings)
            .map_err(|e| Error::Config(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(&self.path, contents).map_err(Error::Config)?;
        log::info!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(default_settings_path())
    }
}
