//! hostwall Agent - host firewall on an NFQUEUE
//!
//! Wires configuration into a [`Firewall`] and a [`QueueAdapter`]. Anything
//! wrong with the rules, lists or default policy fails [`Agent::new`];
//! no partial firewall ever runs.

#![warn(missing_docs)]

pub mod config;

pub use config::{AgentConfig, ListSource, LocalConfig};

use hostwall_common::{HostwallError, HostwallResult};
use hostwall_dataplane::{Clock, CoarseClock, KernelQueue, QueueAdapter};
use hostwall_policy::{
    AddressList, CacheTiers, CachedList, FileList, Firewall, LocalAddrs, MemoryList, RuleEngine,
    Tier,
};
use std::sync::Arc;

/// Assembled firewall, ready to be attached to a queue
pub struct Agent {
    config: AgentConfig,
    firewall: Arc<Firewall>,
    clock: Arc<CoarseClock>,
}

impl Agent {
    /// Build every component, failing on any invalid input
    pub fn new(config: AgentConfig) -> HostwallResult<Self> {
        let local = Arc::new(local_addrs(&config)?);
        let tiers = Arc::new(CacheTiers::new(&config.cache));

        let deny_list = open_list(&config.deny_list, &tiers, Tier::Deny)?;
        let allow_list = open_list(&config.allow_list, &tiers, Tier::Allow)?;
        let engine = RuleEngine::from_raw(&config.rules, config.defaults, local.clone())?;

        tracing::info!(
            rules = engine.rules().len(),
            local_addrs = local.len(),
            inbound = ?config.defaults.inbound,
            outbound = ?config.defaults.outbound,
            "firewall assembled"
        );

        let firewall = Arc::new(Firewall::new(tiers, deny_list, allow_list, engine));
        let clock = Arc::new(CoarseClock::start()?);

        Ok(Self { config, firewall, clock })
    }

    /// The assembled firewall
    pub fn firewall(&self) -> &Arc<Firewall> {
        &self.firewall
    }

    /// Loaded configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Attach the firewall to a kernel queue
    pub fn adapter<Q: KernelQueue>(&self, queue: Q) -> HostwallResult<QueueAdapter<Q>> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        QueueAdapter::new(
            queue,
            self.firewall.clone(),
            self.config.pool.clone(),
            self.config.adapter.clone(),
            clock,
        )
    }

    /// Bind the configured NFQUEUE
    #[cfg(target_os = "linux")]
    pub fn open_queue(&self) -> HostwallResult<hostwall_dataplane::NfQueue> {
        hostwall_dataplane::NfQueue::open(&self.config.queue)
    }

    /// Log final statistics
    pub fn report(&self) {
        let fw = self.firewall.stats();
        let engine = self.firewall.engine().stats();
        tracing::info!(
            accepted = fw.accepted,
            dropped = fw.dropped,
            fast_drops = fw.fast_drops,
            fast_accepts = fw.fast_accepts,
            list_drops = fw.list_drops,
            list_accepts = fw.list_accepts,
            rule_evaluations = engine.evaluations,
            rule_exceptions = engine.exceptions,
            "firewall statistics"
        );
    }
}

fn local_addrs(config: &AgentConfig) -> HostwallResult<LocalAddrs> {
    let mut local = if config.local.discover {
        LocalAddrs::discover()?
    } else {
        LocalAddrs::new()
    };
    for addr in &config.local.addresses {
        if !local.insert(addr) {
            return Err(HostwallError::Config(format!(
                "local address {addr:?} is not an IP address"
            )));
        }
    }
    Ok(local)
}

fn open_list(
    source: &ListSource,
    tiers: &Arc<CacheTiers>,
    tier: Tier,
) -> HostwallResult<Arc<dyn AddressList>> {
    let list: Arc<dyn AddressList> = match source {
        ListSource::Addresses(addrs) => {
            let list = MemoryList::parse(addrs)
                .map_err(|e| HostwallError::Config(format!("{tier:?} list: {e}")))?;
            Arc::new(CachedList::new(list, tiers.clone(), tier))
        }
        ListSource::File(path) => {
            let list = FileList::open(path)?;
            tracing::info!(path = %path.display(), entries = list.len(), ?tier, "list file loaded");
            Arc::new(CachedList::new(list, tiers.clone(), tier))
        }
    };
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwall_policy::{PacketRecord, RawRule, Verdict};

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.local = LocalConfig {
            discover: false,
            addresses: vec!["10.0.0.1".into()],
        };
        config.rules = vec![RawRule::new(0, "192.168.1.5", "any", "any", "22")];
        config.deny_list = ListSource::Addresses(vec!["203.0.113.9".into()]);
        config
    }

    #[test]
    fn test_agent_classifies() {
        let agent = Agent::new(config()).unwrap();
        let fw = agent.firewall();
        let ssh_from = |src| PacketRecord::new(src, 4444, "10.0.0.1", 22);
        assert_eq!(fw.classify(&ssh_from("192.168.1.5")), Verdict::Accept);
        assert_eq!(fw.classify(&ssh_from("192.168.1.6")), Verdict::Drop);
        assert_eq!(fw.classify(&ssh_from("203.0.113.9")), Verdict::Drop);
    }

    #[test]
    fn test_invalid_rule_is_fatal() {
        let mut config = config();
        config.rules.push(RawRule::new(0, "any", "any", "any", "70000"));
        assert!(matches!(Agent::new(config), Err(HostwallError::InvalidRule { index: 1, .. })));
    }

    #[test]
    fn test_invalid_local_address_is_fatal() {
        let mut config = config();
        config.local.addresses.push("eth0".into());
        assert!(matches!(Agent::new(config), Err(HostwallError::Config(_))));
    }

    #[test]
    fn test_invalid_list_entry_is_fatal() {
        let mut config = config();
        config.allow_list = ListSource::Addresses(vec!["192.0.2.1".into(), "eth0".into()]);
        assert!(matches!(Agent::new(config), Err(HostwallError::Config(_))));
    }

    #[test]
    fn test_list_entries_are_canonical() {
        let mut config = config();
        config.deny_list = ListSource::Addresses(vec!["2001:DB8::1".into()]);
        let agent = Agent::new(config).unwrap();

        let pkt = PacketRecord::new("2001:db8::1", 4444, "2001:db8::2", 443);
        assert_eq!(agent.firewall().classify(&pkt), Verdict::Drop);
        assert!(agent.firewall().tiers().exists(Tier::Deny, "2001:db8::1"));
    }

    #[test]
    fn test_list_mutation_reaches_tiers() {
        let agent = Agent::new(config()).unwrap();
        let fw = agent.firewall();
        fw.deny_list().add("198.51.100.1");
        assert!(fw.tiers().exists(Tier::Deny, "198.51.100.1"));
        fw.deny_list().remove("198.51.100.1");
        assert!(!fw.tiers().exists(Tier::Deny, "198.51.100.1"));
    }
}
