//! Agent Configuration

use hostwall_common::{HostwallError, HostwallResult};
use hostwall_dataplane::{AdapterConfig, PoolConfig, QueueConfig};
use hostwall_policy::{CacheConfig, DefaultPolicy, RawRule};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "HOSTWALL_CONFIG";

/// Config file used when neither the environment nor argv names one
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostwall/hostwall.json";

/// Agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Kernel queue binding
    pub queue: QueueConfig,
    /// Worker pool sizing and overflow policy
    pub pool: PoolConfig,
    /// Adapter polling, fallback verdict and drain
    pub adapter: AdapterConfig,
    /// Classification cache tiers
    pub cache: CacheConfig,
    /// Per-direction default policy
    pub defaults: DefaultPolicy,
    /// Ordered rule table
    pub rules: Vec<RawRule>,
    /// Authoritative deny list
    pub deny_list: ListSource,
    /// Authoritative allow list
    pub allow_list: ListSource,
    /// Local address discovery
    pub local: LocalConfig,
}

/// Where a list's entries live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSource {
    /// Resident list seeded with these addresses
    Addresses(Vec<String>),
    /// JSON array file, rewritten on every change
    File(PathBuf),
}

impl Default for ListSource {
    fn default() -> Self {
        ListSource::Addresses(Vec::new())
    }
}

/// Local address settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Enumerate the host's interfaces at startup
    pub discover: bool,
    /// Extra addresses treated as local
    pub addresses: Vec<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            discover: true,
            addresses: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> HostwallResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HostwallError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    /// Parse JSON text
    pub fn from_json(content: &str) -> HostwallResult<Self> {
        serde_json::from_str(content).map_err(|e| HostwallError::Config(e.to_string()))
    }

    /// Resolve the config path: `$HOSTWALL_CONFIG`, then the first argument
    pub fn locate(mut args: impl Iterator<Item = String>) -> PathBuf {
        std::env::var(CONFIG_ENV)
            .ok()
            .or_else(|| args.next())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into())
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwall_common::Verdict;
    use hostwall_dataplane::OverflowPolicy;
    use hostwall_policy::PolicyAction;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_json("{}").unwrap();
        assert_eq!(config.queue.queue_num, 0);
        assert_eq!(config.cache.capacity, 65536);
        assert_eq!(config.cache.ttl_secs, Some(300));
        assert_eq!(config.pool.max_idle_secs, 10);
        assert_eq!(config.pool.overflow, OverflowPolicy::Reject);
        assert_eq!(config.adapter.saturation_verdict, Verdict::Drop);
        assert_eq!(config.defaults, DefaultPolicy::default());
        assert_eq!(config.deny_list, ListSource::Addresses(Vec::new()));
        assert!(config.local.discover);
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_full_document() {
        let config = AgentConfig::from_json(
            r#"{
                "queue": { "queue_num": 2, "max_len": 4096, "fail_open": true },
                "pool": { "max_workers": 64, "overflow": { "wait": { "timeout_ms": 20 } } },
                "adapter": { "saturation_verdict": "accept" },
                "cache": { "capacity": 1000, "ttl_secs": null },
                "defaults": { "inbound": "deny", "outbound": "allow" },
                "rules": [
                    {
                        "zone": 1,
                        "from_ip": "any", "from_port": "any",
                        "to_ip": "any", "to_port": "22"
                    }
                ],
                "deny_list": { "file": "/var/lib/hostwall/deny.json" },
                "allow_list": { "addresses": ["192.0.2.10"] },
                "local": { "discover": false, "addresses": ["10.0.0.1"] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.queue.queue_num, 2);
        assert!(config.queue.fail_open);
        assert_eq!(config.pool.max_workers, 64);
        assert_eq!(config.pool.overflow, OverflowPolicy::Wait { timeout_ms: 20 });
        assert_eq!(config.adapter.saturation_verdict, Verdict::Accept);
        assert_eq!(config.cache.ttl_secs, None);
        assert_eq!(config.defaults.inbound, PolicyAction::Deny);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.deny_list, ListSource::File("/var/lib/hostwall/deny.json".into()));
        assert_eq!(config.allow_list, ListSource::Addresses(vec!["192.0.2.10".into()]));
        assert_eq!(config.local.addresses, vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn test_bad_documents() {
        assert!(matches!(AgentConfig::from_json("{"), Err(HostwallError::Config(_))));
        assert!(matches!(
            AgentConfig::from_json(r#"{"defaults": {"inbound": "block", "outbound": "allow"}}"#),
            Err(HostwallError::Config(_))
        ));
        assert!(matches!(
            AgentConfig::load("/nonexistent/hostwall.json"),
            Err(HostwallError::Config(_))
        ));
    }

    #[test]
    fn test_locate_from_args() {
        if std::env::var(CONFIG_ENV).is_err() {
            let path = AgentConfig::locate(vec!["/tmp/hw.json".to_string()].into_iter());
            assert_eq!(path, PathBuf::from("/tmp/hw.json"));
            assert_eq!(AgentConfig::locate(std::iter::empty()), PathBuf::from(DEFAULT_CONFIG_PATH));
        }
    }
}
