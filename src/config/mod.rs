//! Configuration module for the team sync daemon.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::SyncError;
use crate::models::{Identity, Role};
use crate::scheduler::PollConfig;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the dashboard's REST backend
    pub api_url: String,
    /// Bearer token for the remote backend
    pub api_token: Option<String>,
    /// Static identity; when unset the profile endpoint is asked
    pub identity: Option<Identity>,
    /// Path to the SQLite snapshot database (in-memory when unset)
    pub snapshot_db: Option<PathBuf>,
    /// Address to bind the local API to
    pub bind_addr: SocketAddr,
    /// Pre-shared key for the local API
    pub api_psk: Option<String>,
    pub poll: PollConfig,
    pub cache_ttl: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_url = var("CRM_SYNC_API_URL")
            .ok_or_else(|| SyncError::Config("CRM_SYNC_API_URL is required".to_string()))?;

        let identity = match var("CRM_SYNC_USER_ID") {
            Some(id) => {
                let role = var("CRM_SYNC_ROLE")
                    .map(|role| role.parse::<Role>())
                    .transpose()
                    .map_err(|e| SyncError::Config(format!("Invalid CRM_SYNC_ROLE: {}", e.message())))?
                    .unwrap_or_default();
                let team_id = var("CRM_SYNC_TEAM_ID").ok_or_else(|| {
                    SyncError::Config("CRM_SYNC_TEAM_ID is required with CRM_SYNC_USER_ID".to_string())
                })?;
                Some(Identity::new(id, role, team_id))
            }
            None => None,
        };

        let bind_addr = var("CRM_SYNC_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8787".to_string())
            .parse()
            .map_err(|e| SyncError::Config(format!("Invalid CRM_SYNC_BIND_ADDR: {}", e)))?;

        let interval = millis(var("CRM_SYNC_POLL_INTERVAL_MS"), "CRM_SYNC_POLL_INTERVAL_MS", 5000)?;
        let enabled = match var("CRM_SYNC_REALTIME") {
            None => true,
            Some(value) => parse_bool(&value).ok_or_else(|| {
                SyncError::Config(format!("Invalid CRM_SYNC_REALTIME: {}", value))
            })?,
        };
        let cache_ttl = millis(var("CRM_SYNC_CACHE_TTL_MS"), "CRM_SYNC_CACHE_TTL_MS", 5000)?;

        Ok(Self {
            api_url,
            api_token: var("CRM_SYNC_API_TOKEN"),
            identity,
            snapshot_db: var("CRM_SYNC_SNAPSHOT_DB").map(PathBuf::from),
            bind_addr,
            api_psk: var("CRM_SYNC_API_PSK"),
            poll: PollConfig { enabled, interval },
            cache_ttl,
            log_level: var("CRM_SYNC_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn millis(value: Option<String>, key: &str, default: u64) -> Result<Duration, SyncError> {
    let ms = match value {
        None => default,
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| SyncError::Config(format!("Invalid {}: {}", key, e)))?,
    };
    if ms == 0 {
        return Err(SyncError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_millis(ms))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, SyncError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[("CRM_SYNC_API_URL", "https://crm.example.com/api")]).unwrap();

        assert_eq!(config.api_url, "https://crm.example.com/api");
        assert!(config.api_token.is_none());
        assert!(config.identity.is_none());
        assert!(config.snapshot_db.is_none());
        assert!(config.api_psk.is_none());
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8787");
        assert_eq!(config.poll, PollConfig::default());
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_static_identity() {
        let config = load(&[
            ("CRM_SYNC_API_URL", "http://localhost:3000"),
            ("CRM_SYNC_USER_ID", "admin-1"),
            ("CRM_SYNC_ROLE", "Admin"),
            ("CRM_SYNC_TEAM_ID", "team-1"),
            ("CRM_SYNC_REALTIME", "off"),
            ("CRM_SYNC_POLL_INTERVAL_MS", "15000"),
        ])
        .unwrap();

        let identity = config.identity.unwrap();
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.team_id, "team-1");
        assert!(!config.poll.enabled);
        assert_eq!(config.poll.interval, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(load(&[]), Err(SyncError::Config(_))));
        assert!(matches!(
            load(&[("CRM_SYNC_API_URL", "http://x"), ("CRM_SYNC_POLL_INTERVAL_MS", "0")]),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            load(&[("CRM_SYNC_API_URL", "http://x"), ("CRM_SYNC_BIND_ADDR", "nowhere")]),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            load(&[
                ("CRM_SYNC_API_URL", "http://x"),
                ("CRM_SYNC_USER_ID", "u-1"),
                ("CRM_SYNC_ROLE", "owner"),
                ("CRM_SYNC_TEAM_ID", "t")
            ]),
            Err(SyncError::Config(_))
        ));
    }
}
