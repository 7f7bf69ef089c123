//! Firewall rules
//!
//! A [`Rule`] is the conjunction of a zone and four field validators. It is
//! immutable once loaded.

use crate::local::LocalAddrs;
use crate::validator::{AddrValidator, PortValidator, Validator, Zone, ZoneValidator};
use hostwall_common::PacketRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Rule record as delivered by the rule source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRule {
    /// 0=Any, 1=Inbound, 2=Outbound
    #[serde(default)]
    pub zone: u8,
    /// `"any"`, literal address or CIDR
    pub from_ip: String,
    /// `"any"`, literal port or `"lo-hi"`
    pub from_port: String,
    /// `"any"`, literal address or CIDR
    pub to_ip: String,
    /// `"any"`, literal port or `"lo-hi"`
    pub to_port: String,
}

impl RawRule {
    /// Build a raw record from its five fields
    pub fn new(zone: u8, from_ip: &str, from_port: &str, to_ip: &str, to_port: &str) -> Self {
        Self {
            zone,
            from_ip: from_ip.into(),
            from_port: from_port.into(),
            to_ip: to_ip.into(),
            to_port: to_port.into(),
        }
    }
}

/// Why a raw rule could not be compiled
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// Zone outside 0..=2
    #[error("unknown zone {0}")]
    UnknownZone(u8),

    /// A field validator is not syntactically valid
    #[error("invalid {field}: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw value
        value: String,
    },
}

/// Compiled firewall rule
#[derive(Debug, Clone)]
pub struct Rule {
    /// Direction filter, tested against the source address
    pub zone: ZoneValidator,
    /// Source address
    pub src_ip: AddrValidator,
    /// Source port
    pub src_port: PortValidator,
    /// Destination address
    pub dst_ip: AddrValidator,
    /// Destination port
    pub dst_port: PortValidator,
}

impl Rule {
    /// Compile a raw record, rejecting it if any component is invalid
    pub fn from_raw(raw: &RawRule, local: &Arc<LocalAddrs>) -> Result<Self, RuleError> {
        let zone = Zone::from_index(raw.zone).ok_or(RuleError::UnknownZone(raw.zone))?;
        let rule = Self {
            zone: ZoneValidator::new(zone, local.clone()),
            src_ip: AddrValidator::parse(&raw.from_ip),
            src_port: PortValidator::parse(&raw.from_port),
            dst_ip: AddrValidator::parse(&raw.to_ip),
            dst_port: PortValidator::parse(&raw.to_port),
        };

        let checks = [
            ("from_ip", rule.src_ip.is_valid(), &raw.from_ip),
            ("from_port", rule.src_port.is_valid(), &raw.from_port),
            ("to_ip", rule.dst_ip.is_valid(), &raw.to_ip),
            ("to_port", rule.dst_port.is_valid(), &raw.to_port),
        ];
        if let Some((field, _, value)) = checks.into_iter().find(|(_, ok, _)| !ok) {
            return Err(RuleError::InvalidField { field, value: value.clone() });
        }
        Ok(rule)
    }

    /// Logical AND of every component's validity
    pub fn is_valid(&self) -> bool {
        self.zone.is_valid()
            && self.src_ip.is_valid()
            && self.src_port.is_valid()
            && self.dst_ip.is_valid()
            && self.dst_port.is_valid()
    }

    /// Match against a packet, stopping at the first failing component
    #[inline]
    pub fn validate(&self, pkt: &PacketRecord) -> bool {
        self.zone.validate(&pkt.src_ip)
            && self.src_ip.validate(&pkt.src_ip)
            && self.src_port.validate(&pkt.src_port)
            && self.dst_ip.validate(&pkt.dst_ip)
            && self.dst_port.validate(&pkt.dst_port)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{} -> {}:{}",
            self.zone.zone(),
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port
        )
    }
}
