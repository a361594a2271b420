//! Configuration schema for rollgate
//!
//! Configuration is stored at `~/.config/rollgate/config.toml`, optionally
//! overlaid by a project-local `.rollgate.toml`.

use crate::credentials::Action;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build cache settings
    pub cache: CacheConfig,

    /// Credential broker settings
    pub credentials: CredentialsConfig,

    /// Rollout defaults
    pub rollout: RolloutConfig,

    /// Run coordinator settings
    pub runs: RunsConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable build caching (default: true)
    pub enabled: bool,

    /// Cache root directory (defaults to `<state>/cache`)
    pub root: Option<PathBuf>,

    /// Maximum total cache size in MB before LRU eviction
    pub max_total_mb: u64,

    /// How long a lookup waits on another producer's in-flight build
    pub lookup_wait_secs: u64,

    /// Evict entries not accessed for N days during gc (0 = disabled)
    pub gc_days: u32,
}

impl CacheConfig {
    /// Size bound in bytes
    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_mb.saturating_mul(1024 * 1024)
    }

    /// Lookup wait bound
    pub fn lookup_wait(&self) -> Duration {
        Duration::from_secs(self.lookup_wait_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            max_total_mb: 2048,
            lookup_wait_secs: 300,
            gc_days: 30,
        }
    }
}

/// Credential broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Issuer name embedded in run identity tokens
    pub issuer: String,

    /// Shared secret for run identity tokens (falls back to ROLLGATE_TRUST_SECRET)
    pub trust_secret: Option<String>,

    /// Lifetime of issued credentials in seconds
    pub lifetime_secs: u64,

    /// Upper bound on credential lifetime in seconds
    pub max_lifetime_secs: u64,

    /// How long the controller waits for an issuance
    pub issue_timeout_secs: u64,

    /// Lifetime of the run identity token minted for each run
    pub identity_ttl_secs: u64,

    /// Allowed actions per environment; environments absent here are denied
    pub policies: BTreeMap<String, BTreeSet<Action>>,
}

impl CredentialsConfig {
    /// Environment variable consulted when no secret is configured
    pub const TRUST_SECRET_ENV: &'static str = "ROLLGATE_TRUST_SECRET";

    /// Resolve the trust secret from config or environment
    pub fn resolve_trust_secret(&self) -> Option<String> {
        self.trust_secret
            .clone()
            .or_else(|| std::env::var(Self::TRUST_SECRET_ENV).ok())
            .filter(|s| !s.is_empty())
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            issuer: "rollgate".to_string(),
            trust_secret: None,
            lifetime_secs: 600,
            max_lifetime_secs: 900,
            issue_timeout_secs: 10,
            identity_ttl_secs: 86400,
            policies: BTreeMap::new(),
        }
    }
}

/// Rollout defaults applied to stages that don't override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Health-check timeout in seconds
    pub health_timeout_secs: u64,

    /// Delay between health probes in seconds
    pub health_interval_secs: u64,

    /// How long an approval stage waits for a signal
    pub approval_timeout_secs: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            health_timeout_secs: 120,
            health_interval_secs: 5,
            approval_timeout_secs: 3600,
        }
    }
}

/// Run coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    /// Build step timeout in seconds
    pub build_timeout_secs: u64,

    /// Number of finished runs kept in memory
    pub retain: usize,

    /// Persist finished runs under the state directory
    pub persist: bool,

    /// Remove persisted runs older than N hours (0 = disabled)
    pub auto_cleanup_hours: u32,

    /// Append run notifications to this JSON-lines file
    pub notify_file: Option<PathBuf>,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            build_timeout_secs: 1800,
            retain: 100,
            persist: true,
            auto_cleanup_hours: 168,
            notify_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[credentials]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.credentials.issuer, "rollgate");
        assert!(config.credentials.policies.is_empty());
    }

    #[test]
    fn config_deserializes_policies() {
        let toml = r#"
            [credentials.policies]
            staging = ["deploy", "rollback", "read"]
            production = ["deploy"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let staging = &config.credentials.policies["staging"];
        assert!(staging.contains(&Action::Rollback));
        assert_eq!(config.credentials.policies["production"].len(), 1);
        assert_eq!(config.cache.max_total_mb, 2048); // default preserved
    }

    #[test]
    fn cache_bounds_convert() {
        let cache = CacheConfig {
            max_total_mb: 2,
            lookup_wait_secs: 7,
            ..CacheConfig::default()
        };
        assert_eq!(cache.max_total_bytes(), 2 * 1024 * 1024);
        assert_eq!(cache.lookup_wait(), Duration::from_secs(7));
    }
}
