//! Failover client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use chainwatch_core::error::TransportError;

/// Environment variable holding the primary WebSocket endpoint.
pub const ENV_PRIMARY_URL: &str = "CHAINWATCH_PRIMARY_URL";
/// Environment variable holding the backup WebSocket endpoint.
pub const ENV_BACKUP_URL: &str = "CHAINWATCH_BACKUP_URL";

/// Endpoints and subscription protocol for a [`FailoverClient`](crate::FailoverClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Preferred endpoint, e.g. "wss://api.mainnet-beta.solana.com"
    pub primary_url: String,
    /// Endpoint used once the primary is lost. `None` = no failover.
    #[serde(default)]
    pub backup_url: Option<String>,
    /// Registration method
    #[serde(default = "default_subscribe_method")]
    pub subscribe_method: String,
    /// Deregistration method
    #[serde(default = "default_unsubscribe_method")]
    pub unsubscribe_method: String,
    /// Commitment level sent with each registration
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

fn default_subscribe_method() -> String { "signatureSubscribe".into() }
fn default_unsubscribe_method() -> String { "signatureUnsubscribe".into() }
fn default_commitment() -> String { "confirmed".into() }

impl ClientConfig {
    /// Config with the default signature-subscription protocol.
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self {
            primary_url: primary_url.into(),
            backup_url: None,
            subscribe_method: default_subscribe_method(),
            unsubscribe_method: default_unsubscribe_method(),
            commitment: default_commitment(),
        }
    }

    pub fn with_backup(mut self, backup_url: impl Into<String>) -> Self {
        self.backup_url = Some(backup_url.into());
        self
    }

    pub fn with_commitment(mut self, commitment: impl Into<String>) -> Self {
        self.commitment = commitment.into();
        self
    }

    /// Read `CHAINWATCH_PRIMARY_URL` (required) and `CHAINWATCH_BACKUP_URL`.
    pub fn from_env() -> Result<Self, TransportError> {
        let primary = std::env::var(ENV_PRIMARY_URL)
            .map_err(|_| TransportError::InvalidConfig(format!("{ENV_PRIMARY_URL} is not set")))?;
        let mut config = Self::new(primary);
        config.backup_url = std::env::var(ENV_BACKUP_URL).ok().filter(|s| !s.is_empty());
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TransportError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Endpoint URLs must be `ws://` or `wss://`.
    pub fn validate(&self) -> Result<(), TransportError> {
        check_ws_url(&self.primary_url)?;
        if let Some(backup) = &self.backup_url {
            check_ws_url(backup)?;
        }
        Ok(())
    }
}

fn check_ws_url(url: &str) -> Result<(), TransportError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(TransportError::InvalidConfig(format!(
            "expected a ws:// or wss:// endpoint, got {url:?}"
        )))
    }
}
