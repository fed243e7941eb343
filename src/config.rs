//! Connection configuration and conf-file resolution
//!
//! The daemon reads credentials from a flat `daemon.conf` file in its data
//! directory, one `key=value` per line. The resolver fills absent keys with
//! generated defaults without ever overwriting present values, and rewrites
//! the file only when a fill actually occurred.

use crate::error::{Error, Result};
use crate::settings::{DaemonMode, Settings};
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};

/// Conf file name inside the data directory
pub const DAEMON_CONF_FILE: &str = "daemon.conf";

/// Default connection parameters
pub const DEFAULT_IP: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9336;
pub const DEFAULT_RPC_PORT_SSL: u16 = 7336;
pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_API_PORT_SSL: u16 = 7080;
pub const DEFAULT_USER: &str = "rpcserver";
pub const DEFAULT_API_USER: &str = "apiserver";

/// Connection parameters resolved for one daemon session
///
/// Immutable once resolved; a restart resolves a fresh one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub ip: String,
    pub rpc_ssl: bool,
    pub rpc_port: u16,
    pub rpc_port_ssl: u16,
    pub api_ssl: bool,
    pub api_port: u16,
    pub api_port_ssl: u16,
    pub user: String,
    pub password: String,
    pub api_user: String,
    pub api_password: String,
    pub mode: DaemonMode,
}

impl ConnectionConfig {
    /// RPC endpoint URL, honoring the SSL flag
    pub fn rpc_url(&self) -> String {
        if self.rpc_ssl {
            format!("https://{}:{}", self.ip, self.rpc_port_ssl)
        } else {
            format!("http://{}:{}", self.ip, self.rpc_port)
        }
    }

    /// API endpoint URL, honoring the SSL flag
    pub fn api_url(&self) -> String {
        if self.api_ssl {
            format!("https://{}:{}", self.ip, self.api_port_ssl)
        } else {
            format!("http://{}:{}", self.ip, self.api_port)
        }
    }

    /// Build an external-mode config from the user's manual daemon settings
    pub fn from_settings(settings: &Settings) -> Self {
        let or_default = |port: u16, default: u16| if port > 0 { port } else { default };
        Self {
            ip: settings.external_ip.clone(),
            rpc_ssl: settings.external_rpc_ssl,
            rpc_port: or_default(settings.external_rpc_port, DEFAULT_RPC_PORT),
            rpc_port_ssl: or_default(settings.external_rpc_port_ssl, DEFAULT_RPC_PORT_SSL),
            api_ssl: settings.external_api_ssl,
            api_port: or_default(settings.external_api_port, DEFAULT_API_PORT),
            api_port_ssl: or_default(settings.external_api_port_ssl, DEFAULT_API_PORT_SSL),
            user: settings
                .external_user
                .clone()
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: settings.external_password.clone().unwrap_or_default(),
            api_user: settings
                .external_api_user
                .clone()
                .unwrap_or_else(|| DEFAULT_API_USER.to_string()),
            api_password: settings.external_api_password.clone().unwrap_or_default(),
            mode: DaemonMode::External,
        }
    }
}

/// Generate a random default password (hex of 64 random bytes)
fn generate_password() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Parse `key=value` lines preserving file order
///
/// `=` is the first-occurrence separator, no escaping. Lines without `=` or
/// with an empty key are ignored.
fn parse_key_values(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let eq = line.find('=')?;
            let key = &line[..eq];
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), line[eq + 1..].to_string()))
        })
        .collect()
}

fn to_key_values(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Resolve the managed-mode connection config from the daemon's conf file
///
/// Creates the data directory when missing. Only the four credential keys are
/// filled when absent; present values are never touched, and the file is only
/// rewritten when at least one fill occurred.
pub fn resolve(data_dir: &Path) -> Result<ConnectionConfig> {
    if !data_dir.exists() {
        log::info!(
            "Data directory not found, creating {}",
            data_dir.display()
        );
        fs::create_dir_all(data_dir).map_err(Error::Config)?;
    }

    let conf_path = data_dir.join(DAEMON_CONF_FILE);
    let raw = if conf_path.exists() {
        log::info!("Importing RPC and API credentials from {}", conf_path.display());
        fs::read_to_string(&conf_path).map_err(Error::Config)?
    } else {
        String::new()
    };
    let mut pairs = parse_key_values(&raw);

    let fallback = [
        ("rpcuser", DEFAULT_USER.to_string()),
        ("rpcpassword", generate_password()),
        ("apiuser", DEFAULT_API_USER.to_string()),
        ("apipassword", generate_password()),
    ];
    let mut filled = false;
    for (key, value) in fallback {
        if lookup(&pairs, key).is_none() {
            pairs.push((key.to_string(), value));
            filled = true;
        }
    }

    if filled {
        log::info!("Filling missing credentials in {}", DAEMON_CONF_FILE);
        fs::write(&conf_path, to_key_values(&pairs)).map_err(Error::Config)?;
    }

    // The fills above guarantee all four keys are present
    Ok(ConnectionConfig {
        ip: DEFAULT_IP.to_string(),
        rpc_ssl: true,
        rpc_port: DEFAULT_RPC_PORT,
        rpc_port_ssl: DEFAULT_RPC_PORT_SSL,
        api_ssl: true,
        api_port: DEFAULT_API_PORT,
        api_port_ssl: DEFAULT_API_PORT_SSL,
        user: lookup(&pairs, "rpcuser").unwrap_or(DEFAULT_USER).to_string(),
        password: lookup(&pairs, "rpcpassword").unwrap_or_default().to_string(),
        api_user: lookup(&pairs, "apiuser")
            .unwrap_or(DEFAULT_API_USER)
            .to_string(),
        api_password: lookup(&pairs, "apipassword")
            .unwrap_or_default()
            .to_string(),
        mode: DaemonMode::Managed,
    })
}

/// Path to the conf file for a given data directory
pub fn conf_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DAEMON_CONF_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_first_equals() {
        let pairs = parse_key_values("rpcuser=alice\nrpcpassword=a=b=c\n\nnovalue\n=empty");
        assert_eq!(pairs.len(), 2);
        assert_eq!(lookup(&pairs, "rpcuser"), Some("alice"));
        assert_eq!(lookup(&pairs, "rpcpassword"), Some("a=b=c"));
    }

    #[test]
    fn fills_only_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let conf = conf_path(dir.path());
        fs::write(&conf, "rpcuser=alice\nrpcpassword=secret").unwrap();

        let config = resolve(dir.path()).unwrap();
        assert_eq!(config.user, "alice");
        assert_eq!(config.password, "secret");
        assert_eq!(config.api_user, DEFAULT_API_USER);
        assert_eq!(config.api_password.len(), 128);

        let rewritten = fs::read_to_string(&conf).unwrap();
        assert!(rewritten.contains("rpcuser=alice"));
        assert!(rewritten.contains("rpcpassword=secret"));
        assert!(rewritten.contains("apiuser="));
        assert!(rewritten.contains("apipassword="));
    }

    #[test]
    fn complete_file_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let conf = conf_path(dir.path());
        let original = "rpcuser=a\nrpcpassword=b\napiuser=c\napipassword=d";
        fs::write(&conf, original).unwrap();
        let before = fs::metadata(&conf).unwrap().modified().unwrap();

        let config = resolve(dir.path()).unwrap();
        assert_eq!(config.password, "b");
        assert_eq!(config.api_password, "d");

        assert_eq!(fs::read_to_string(&conf).unwrap(), original);
        assert_eq!(fs::metadata(&conf).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn creates_data_dir_and_conf() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("core");
        let config = resolve(&data_dir).unwrap();
        assert!(data_dir.exists());
        assert!(conf_path(&data_dir).exists());
        assert_eq!(config.user, DEFAULT_USER);
        assert_eq!(config.mode, DaemonMode::Managed);
    }

    #[test]
    fn urls_follow_ssl_flags() {
        let mut config = resolve(tempfile::tempdir().unwrap().path()).unwrap();
        assert_eq!(config.rpc_url(), format!("https://127.0.0.1:{}", DEFAULT_RPC_PORT_SSL));
        config.rpc_ssl = false;
        config.api_ssl = false;
        assert_eq!(config.rpc_url(), format!("http://127.0.0.1:{}", DEFAULT_RPC_PORT));
        assert_eq!(config.api_url(), format!("http://127.0.0.1:{}", DEFAULT_API_PORT));
    }

    #[test]
    fn external_config_from_settings() {
        let mut settings = Settings::default();
        settings.external_ip = "10.0.0.5".to_string();
        settings.external_rpc_ssl = false;
        settings.external_rpc_port = 19336;
        settings.external_user = Some("bob".to_string());
        let config = ConnectionConfig::from_settings(&settings);
        assert_eq!(config.mode, DaemonMode::External);
        assert_eq!(config.rpc_url(), "http://10.0.0.5:19336");
        assert_eq!(config.user, "bob");
        // Unset ports fall back to defaults
        assert_eq!(config.api_port, DEFAULT_API_PORT);
    }
}
