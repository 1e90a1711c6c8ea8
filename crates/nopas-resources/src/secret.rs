//! Secret-store access for backend credentials.
//!
//! Tokens are fetched on demand and never cached: every Nomad write
//! asks the store again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a fresh token stored at `path`.
    async fn get_token(&self, path: &str) -> ResourceResult<String>;

    /// Token attached to job registrations as `VaultToken`.
    async fn vault_token(&self) -> ResourceResult<String>;
}

/// Vault over HTTP. Reads `data.secret_id` (Nomad secrets engine) and
/// falls back to `data.token` for plain KV entries.
pub struct VaultClient {
    client: Client,
    address: String,
    token: String,
}

impl VaultClient {
    pub fn new(address: &str, token: String, timeout: Duration) -> ResourceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResourceError::Credential {
                path: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn get_token(&self, path: &str) -> ResourceResult<String> {
        let credential = |reason: String| ResourceError::Credential {
            path: path.to_string(),
            reason,
        };

        let url = format!("{}/v1/{}", self.address, path.trim_start_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| credential(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(credential(format!("vault returned {}", resp.status())));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| credential(e.to_string()))?;
        let data = &body["data"];
        let token = data["secret_id"]
            .as_str()
            .or_else(|| data["token"].as_str())
            .ok_or_else(|| credential("no token in secret".to_string()))?;

        debug!(%path, "token fetched from vault");
        Ok(token.to_string())
    }

    async fn vault_token(&self) -> ResourceResult<String> {
        Ok(self.token.clone())
    }
}
