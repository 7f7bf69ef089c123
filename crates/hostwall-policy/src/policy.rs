//! Per-direction default policy

use hostwall_common::{Direction, HostwallError, HostwallResult, Verdict};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Fallback action for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Accept unless a rule matches
    Allow,
    /// Drop unless a rule matches
    Deny,
}

impl PolicyAction {
    /// Verdict when no rule matches
    #[inline(always)]
    pub fn verdict(self) -> Verdict {
        match self {
            PolicyAction::Allow => Verdict::Accept,
            PolicyAction::Deny => Verdict::Drop,
        }
    }

    /// Verdict when a rule matches (the inverse of the default)
    #[inline(always)]
    pub fn exception(self) -> Verdict {
        match self {
            PolicyAction::Allow => Verdict::Drop,
            PolicyAction::Deny => Verdict::Accept,
        }
    }
}

impl FromStr for PolicyAction {
    type Err = HostwallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(PolicyAction::Allow),
            "deny" => Ok(PolicyAction::Deny),
            other => Err(HostwallError::InvalidPolicy(format!(
                "expected \"allow\" or \"deny\", got {other:?}"
            ))),
        }
    }
}

/// Default policy record, fixed for the lifetime of a firewall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultPolicy {
    /// Applied to inbound packets
    pub inbound: PolicyAction,
    /// Applied to outbound packets
    pub outbound: PolicyAction,
}

impl DefaultPolicy {
    /// Build from explicit actions
    pub const fn new(inbound: PolicyAction, outbound: PolicyAction) -> Self {
        Self { inbound, outbound }
    }

    /// Parse the textual `{Inbound, Outbound}` record
    pub fn parse(inbound: &str, outbound: &str) -> HostwallResult<Self> {
        Ok(Self {
            inbound: inbound.parse()?,
            outbound: outbound.parse()?,
        })
    }

    /// Action for a direction
    #[inline(always)]
    pub fn for_direction(&self, direction: Direction) -> PolicyAction {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }
}

impl Default for DefaultPolicy {
    /// Block unsolicited inbound traffic, let the host talk out
    fn default() -> Self {
        Self::new(PolicyAction::Deny, PolicyAction::Allow)
    }
}
