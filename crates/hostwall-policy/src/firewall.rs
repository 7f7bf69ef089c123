//! Classification orchestrator
//!
//! Per packet, in strict priority order:
//! 1. source in deny tier: DROP
//! 2. destination in deny tier: DROP
//! 3. source in allow tier: ACCEPT
//! 4. source in undetermined tier: rule engine
//! 5. slow path: deny list (source, then destination), allow list (source),
//!    otherwise cache both addresses as undetermined and ask the rule engine
//!
//! Slow-path cache fills carry the stripe generation read before the list
//! lookups. A list mutation in between refuses the fill and the slow path
//! runs again against the updated list.

use crate::cache::{CacheTiers, Tier};
use crate::engine::RuleEngine;
use crate::list::AddressList;
use hostwall_common::{AtomicCounter, PacketRecord, Verdict};
use std::sync::Arc;

const SLOW_PATH_ATTEMPTS: usize = 4;

/// How a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionPath {
    /// Source found in the deny tier
    CachedDenySource,
    /// Destination found in the deny tier
    CachedDenyDestination,
    /// Source found in the allow tier
    CachedAllow,
    /// Source found in the undetermined tier, rules decided
    CachedRules,
    /// Source found in the deny list
    ListDenySource,
    /// Destination found in the deny list
    ListDenyDestination,
    /// Source found in the allow list
    ListAllow,
    /// No list entry, rules decided
    ListRules,
}

impl DecisionPath {
    /// Resolved from a cache tier without touching the lists
    pub fn is_fast(self) -> bool {
        matches!(
            self,
            DecisionPath::CachedDenySource
                | DecisionPath::CachedDenyDestination
                | DecisionPath::CachedAllow
                | DecisionPath::CachedRules
        )
    }
}

/// Verdict with its path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Final verdict
    pub verdict: Verdict,
    /// Path taken
    pub path: DecisionPath,
}

/// Firewall: cache tiers + authoritative lists + rule engine
pub struct Firewall {
    tiers: Arc<CacheTiers>,
    deny_list: Arc<dyn AddressList>,
    allow_list: Arc<dyn AddressList>,
    engine: RuleEngine,

    // Metrics
    fast_drops: AtomicCounter,
    fast_accepts: AtomicCounter,
    cached_rule_checks: AtomicCounter,
    list_drops: AtomicCounter,
    list_accepts: AtomicCounter,
    list_rule_checks: AtomicCounter,
    accepted: AtomicCounter,
    dropped: AtomicCounter,
}

impl Firewall {
    /// Compose the decision procedure
    pub fn new(
        tiers: Arc<CacheTiers>,
        deny_list: Arc<dyn AddressList>,
        allow_list: Arc<dyn AddressList>,
        engine: RuleEngine,
    ) -> Self {
        Self {
            tiers,
            deny_list,
            allow_list,
            engine,
            fast_drops: AtomicCounter::new(0),
            fast_accepts: AtomicCounter::new(0),
            cached_rule_checks: AtomicCounter::new(0),
            list_drops: AtomicCounter::new(0),
            list_accepts: AtomicCounter::new(0),
            list_rule_checks: AtomicCounter::new(0),
            accepted: AtomicCounter::new(0),
            dropped: AtomicCounter::new(0),
        }
    }

    /// Verdict for a packet
    #[inline]
    pub fn classify(&self, pkt: &PacketRecord) -> Verdict {
        self.decide(pkt).verdict
    }

    /// Verdict and path for a packet
    pub fn decide(&self, pkt: &PacketRecord) -> Decision {
        let decision = self.walk(pkt);
        match decision.verdict {
            Verdict::Accept => self.accepted.inc(),
            Verdict::Drop => self.dropped.inc(),
        };
        decision
    }

    fn walk(&self, pkt: &PacketRecord) -> Decision {
        let tiers = &self.tiers;

        // Fast path
        if tiers.exists(Tier::Deny, &pkt.src_ip) {
            self.fast_drops.inc();
            tracing::debug!(src = %pkt.src_ip, "fast block");
            return Decision { verdict: Verdict::Drop, path: DecisionPath::CachedDenySource };
        }
        if tiers.exists(Tier::Deny, &pkt.dst_ip) {
            self.fast_drops.inc();
            tracing::debug!(dst = %pkt.dst_ip, "fast block");
            return Decision {
                verdict: Verdict::Drop,
                path: DecisionPath::CachedDenyDestination,
            };
        }
        if tiers.exists(Tier::Allow, &pkt.src_ip) {
            self.fast_accepts.inc();
            return Decision { verdict: Verdict::Accept, path: DecisionPath::CachedAllow };
        }
        if tiers.exists(Tier::Undetermined, &pkt.src_ip) {
            self.cached_rule_checks.inc();
            return Decision {
                verdict: self.engine.evaluate(pkt),
                path: DecisionPath::CachedRules,
            };
        }

        // Slow path
        let mut attempt = 1;
        loop {
            match self.slow_path(pkt, attempt == SLOW_PATH_ATTEMPTS) {
                Some(decision) => return decision,
                None => {
                    tracing::trace!(src = %pkt.src_ip, attempt, "list changed during lookup");
                    attempt += 1;
                }
            }
        }
    }

    /// List lookups. None when a cache fill lost a race with a list
    /// mutation; the last attempt decides without caching instead.
    fn slow_path(&self, pkt: &PacketRecord, last: bool) -> Option<Decision> {
        let tiers = &self.tiers;
        let src_generation = tiers.generation(&pkt.src_ip);
        let dst_generation = tiers.generation(&pkt.dst_ip);

        if self.deny_list.contains(&pkt.src_ip) {
            if !tiers.fill(Tier::Deny, &pkt.src_ip, src_generation) && !last {
                return None;
            }
            self.list_drops.inc();
            tracing::debug!(src = %pkt.src_ip, "deny list hit");
            return Some(Decision { verdict: Verdict::Drop, path: DecisionPath::ListDenySource });
        }
        if self.deny_list.contains(&pkt.dst_ip) {
            if !tiers.fill(Tier::Deny, &pkt.dst_ip, dst_generation) && !last {
                return None;
            }
            self.list_drops.inc();
            tracing::debug!(dst = %pkt.dst_ip, "deny list hit");
            return Some(Decision {
                verdict: Verdict::Drop,
                path: DecisionPath::ListDenyDestination,
            });
        }
        if self.allow_list.contains(&pkt.src_ip) {
            if !tiers.fill(Tier::Allow, &pkt.src_ip, src_generation) {
                if !last {
                    return None;
                }
                if tiers.exists(Tier::Deny, &pkt.src_ip) {
                    self.list_drops.inc();
                    return Some(Decision {
                        verdict: Verdict::Drop,
                        path: DecisionPath::ListDenySource,
                    });
                }
            }
            tiers.insert_undetermined(&pkt.dst_ip);
            self.list_accepts.inc();
            tracing::debug!(src = %pkt.src_ip, "allow list hit");
            return Some(Decision { verdict: Verdict::Accept, path: DecisionPath::ListAllow });
        }

        tiers.insert_undetermined(&pkt.src_ip);
        tiers.insert_undetermined(&pkt.dst_ip);
        self.list_rule_checks.inc();
        Some(Decision { verdict: self.engine.evaluate(pkt), path: DecisionPath::ListRules })
    }

    /// Cache tiers
    pub fn tiers(&self) -> &Arc<CacheTiers> {
        &self.tiers
    }

    /// Deny list
    pub fn deny_list(&self) -> &Arc<dyn AddressList> {
        &self.deny_list
    }

    /// Allow list
    pub fn allow_list(&self) -> &Arc<dyn AddressList> {
        &self.allow_list
    }

    /// Rule engine
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Get firewall statistics
    pub fn stats(&self) -> FirewallStats {
        FirewallStats {
            fast_drops: self.fast_drops.get(),
            fast_accepts: self.fast_accepts.get(),
            cached_rule_checks: self.cached_rule_checks.get(),
            list_drops: self.list_drops.get(),
            list_accepts: self.list_accepts.get(),
            list_rule_checks: self.list_rule_checks.get(),
            accepted: self.accepted.get(),
            dropped: self.dropped.get(),
        }
    }
}

/// Firewall statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FirewallStats {
    /// Drops served from the deny tier
    pub fast_drops: u64,
    /// Accepts served from the allow tier
    pub fast_accepts: u64,
    /// Rule evaluations for undetermined sources
    pub cached_rule_checks: u64,
    /// Drops from a deny list lookup
    pub list_drops: u64,
    /// Accepts from an allow list lookup
    pub list_accepts: u64,
    /// Rule evaluations after a list miss
    pub list_rule_checks: u64,
    /// Total accepted
    pub accepted: u64,
    /// Total dropped
    pub dropped: u64,
}
