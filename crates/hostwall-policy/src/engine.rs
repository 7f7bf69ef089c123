//! Rule engine with verdict-by-exception semantics

use crate::local::LocalAddrs;
use crate::policy::{DefaultPolicy, PolicyAction};
use crate::rule::{RawRule, Rule};
use hostwall_common::{
    AtomicCounter, Direction, HostwallError, HostwallResult, PacketRecord, Verdict,
};
use std::sync::Arc;

/// Rule engine
///
/// Holds the ordered rule table and the per-direction default policy. The
/// first rule matching a packet is an exception to the default for the
/// packet's direction: it drops under `Allow` and accepts under `Deny`.
/// With no match the default itself applies.
pub struct RuleEngine {
    rules: Vec<Rule>,
    defaults: DefaultPolicy,
    local: Arc<LocalAddrs>,

    // Metrics
    evaluations: AtomicCounter,
    exceptions: AtomicCounter,
}

/// Full result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Packet direction
    pub direction: Direction,
    /// Default in force for that direction
    pub default: PolicyAction,
    /// Index of the first matching rule
    pub matched: Option<usize>,
    /// Final verdict
    pub verdict: Verdict,
}

impl RuleEngine {
    /// Create engine from compiled rules. Any invalid rule is rejected.
    pub fn new(
        rules: Vec<Rule>,
        defaults: DefaultPolicy,
        local: Arc<LocalAddrs>,
    ) -> HostwallResult<Self> {
        if let Some(index) = rules.iter().position(|r| !r.is_valid()) {
            return Err(HostwallError::InvalidRule {
                index,
                reason: format!("{} is not valid", rules[index]),
            });
        }

        tracing::debug!(
            rules = rules.len(),
            inbound = ?defaults.inbound,
            outbound = ?defaults.outbound,
            "rule engine loaded"
        );

        Ok(Self {
            rules,
            defaults,
            local,
            evaluations: AtomicCounter::new(0),
            exceptions: AtomicCounter::new(0),
        })
    }

    /// Compile raw rule records in order
    pub fn from_raw(
        raw: &[RawRule],
        defaults: DefaultPolicy,
        local: Arc<LocalAddrs>,
    ) -> HostwallResult<Self> {
        let rules = raw
            .iter()
            .enumerate()
            .map(|(index, r)| {
                Rule::from_raw(r, &local).map_err(|e| HostwallError::InvalidRule {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect::<HostwallResult<Vec<_>>>()?;
        Self::new(rules, defaults, local)
    }

    /// Verdict for a packet
    #[inline]
    pub fn evaluate(&self, pkt: &PacketRecord) -> Verdict {
        self.evaluate_detailed(pkt).verdict
    }

    /// Verdict for a packet along with how it was reached
    pub fn evaluate_detailed(&self, pkt: &PacketRecord) -> RuleOutcome {
        self.evaluations.inc();

        let direction = self.local.direction(pkt);
        let default = self.defaults.for_direction(direction);

        // First match wins
        let matched = self.rules.iter().position(|rule| rule.validate(pkt));

        let verdict = match matched {
            Some(index) => {
                self.exceptions.inc();
                let verdict = default.exception();
                tracing::trace!(
                    rule = index,
                    src = %pkt.src_ip,
                    dst = %pkt.dst_ip,
                    %verdict,
                    "rule exception matched"
                );
                verdict
            }
            None => default.verdict(),
        };

        RuleOutcome { direction, default, matched, verdict }
    }

    /// Loaded rules in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Default policy
    pub fn defaults(&self) -> DefaultPolicy {
        self.defaults
    }

    /// Local address set used for direction
    pub fn local(&self) -> &Arc<LocalAddrs> {
        &self.local
    }

    /// Get engine statistics
    pub fn stats(&self) -> RuleEngineStats {
        RuleEngineStats {
            evaluations: self.evaluations.get(),
            exceptions: self.exceptions.get(),
            rules_loaded: self.rules.len(),
        }
    }
}

/// Engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RuleEngineStats {
    /// Packets evaluated
    pub evaluations: u64,
    /// Evaluations that matched a rule
    pub exceptions: u64,
    /// Rule table size
    pub rules_loaded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{AddrValidator, PortValidator, Zone, ZoneValidator};

    fn local() -> Arc<LocalAddrs> {
        let mut local = LocalAddrs::new();
        local.insert("10.0.0.1");
        Arc::new(local)
    }

    fn ssh_rule() -> RawRule {
        RawRule::new(0, "any", "any", "any", "22")
    }

    fn inbound_ssh() -> PacketRecord {
        PacketRecord::new("192.168.1.5", 4444, "10.0.0.1", 22)
    }

    fn inbound_http() -> PacketRecord {
        PacketRecord::new("192.168.1.5", 4444, "10.0.0.1", 80)
    }

    fn engine(inbound: PolicyAction) -> RuleEngine {
        RuleEngine::from_raw(
            &[ssh_rule()],
            DefaultPolicy::new(inbound, PolicyAction::Allow),
            local(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_deny_rule_match_accepts() {
        assert_eq!(engine(PolicyAction::Deny).evaluate(&inbound_ssh()), Verdict::Accept);
    }

    #[test]
    fn test_default_deny_no_match_drops() {
        assert_eq!(engine(PolicyAction::Deny).evaluate(&inbound_http()), Verdict::Drop);
    }

    #[test]
    fn test_default_allow_rule_match_drops() {
        assert_eq!(engine(PolicyAction::Allow).evaluate(&inbound_ssh()), Verdict::Drop);
    }

    #[test]
    fn test_default_allow_no_match_accepts() {
        assert_eq!(engine(PolicyAction::Allow).evaluate(&inbound_http()), Verdict::Accept);
    }

    #[test]
    fn test_outbound_uses_outbound_default() {
        let engine = RuleEngine::from_raw(
            &[],
            DefaultPolicy::new(PolicyAction::Deny, PolicyAction::Allow),
            local(),
        )
        .unwrap();
        let outcome = engine.evaluate_detailed(&PacketRecord::new("10.0.0.1", 5000, "8.8.8.8", 53));
        assert_eq!(outcome.direction, Direction::Outbound);
        assert_eq!(outcome.default, PolicyAction::Allow);
        assert_eq!(outcome.verdict, Verdict::Accept);
    }

    #[test]
    fn test_first_match_wins() {
        let engine = RuleEngine::from_raw(
            &[
                RawRule::new(0, "192.168.1.5", "any", "any", "any"),
                RawRule::new(0, "any", "any", "any", "22"),
            ],
            DefaultPolicy::new(PolicyAction::Deny, PolicyAction::Deny),
            local(),
        )
        .unwrap();

        let outcome = engine.evaluate_detailed(&inbound_ssh());
        assert_eq!(outcome.matched, Some(0));
        assert_eq!(outcome.verdict, Verdict::Accept);

        let other =
            engine.evaluate_detailed(&PacketRecord::new("192.168.1.9", 4444, "10.0.0.1", 22));
        assert_eq!(other.matched, Some(1));
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let err = RuleEngine::from_raw(
            &[ssh_rule(), RawRule::new(0, "any", "9000-100", "any", "any")],
            DefaultPolicy::default(),
            local(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, HostwallError::InvalidRule { index: 1, .. }));

        // Programmatically built rules are checked too
        let bad = Rule {
            zone: ZoneValidator::new(Zone::Any, local()),
            src_ip: AddrValidator::Invalid("bogus".into()),
            src_port: PortValidator::Any,
            dst_ip: AddrValidator::Any,
            dst_port: PortValidator::Any,
        };
        assert!(RuleEngine::new(vec![bad], DefaultPolicy::default(), local()).is_err());
    }

    #[test]
    fn test_stats() {
        let engine = engine(PolicyAction::Deny);
        engine.evaluate(&inbound_ssh());
        engine.evaluate(&inbound_http());

        let stats = engine.stats();
        assert_eq!(stats.evaluations, 2);
        assert_eq!(stats.exceptions, 1);
        assert_eq!(stats.rules_loaded, 1);
    }
}
