//! RPC client for the daemon
//!
//! A thin JSON-RPC 1.0 client over HTTP. The supervisor only depends on the
//! `RpcClient` trait so tests can substitute a scripted client; the wire
//! protocol beyond the request/response envelope is out of scope here.

use crate::config::ConnectionConfig;
use crate::error::RpcError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Per-request timeout
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// RPC request structure
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: Vec<serde_json::Value>,
}

/// RPC response structure
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i32,
    message: String,
}

/// Opaque request/response call against the daemon
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError>;
}

/// Call and deserialize the result into a typed value
pub async fn call_as<T: DeserializeOwned>(
    client: &dyn RpcClient,
    method: &str,
    params: Vec<serde_json::Value>,
) -> Result<T, RpcError> {
    let value = client.call(method, params).await?;
    serde_json::from_value(value).map_err(|e| RpcError::Malformed(e.to_string()))
}

/// HTTP JSON-RPC client
pub struct HttpRpcClient {
    url: String,
    user: String,
    password: String,
}

impl HttpRpcClient {
    /// Create a client from a resolved connection config
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            url: config.rpc_url(),
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: 1,
            method,
            params,
        };

        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let response = client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(RpcError::Server {
                code: error.code,
                message: error.message,
            });
        }
        body.result.ok_or(RpcError::MissingResult)
    }
}

/// Status snapshot reported by the daemon's info call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonStatus {
    /// Current block height
    pub blocks: u64,
    /// Connected peer count
    pub connections: u32,
    /// Daemon version string
    pub version: Option<String>,
    /// Sync completion percentage reported by the daemon
    pub synccomplete: Option<i64>,
}

/// Fetch the daemon status snapshot
pub async fn fetch_status(client: &dyn RpcClient) -> Result<DaemonStatus, RpcError> {
    call_as(client, "getinfo", vec![]).await
}

/// Best-effort graceful shutdown request; connection errors are expected when
/// the daemon is already gone
pub async fn request_stop(client: &dyn RpcClient) {
    match client.call("stop", vec![]).await {
        Ok(_) => log::info!("Daemon acknowledged stop command"),
        Err(e) => log::warn!("Stop command failed ({}), daemon may already be down", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_from_info_payload() {
        let value = serde_json::json!({
            "blocks": 4_200_000u64,
            "connections": 12,
            "version": "5.1.2",
            "synccomplete": 100,
            "stakeweight": 0.0
        });
        let status: DaemonStatus = serde_json::from_value(value).unwrap();
        assert_eq!(status.blocks, 4_200_000);
        assert_eq!(status.connections, 12);
        assert_eq!(status.version.as_deref(), Some("5.1.2"));
    }

    #[test]
    fn status_tolerates_missing_fields() {
        let status: DaemonStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(status.blocks, 0);
        assert!(status.version.is_none());
    }
}
