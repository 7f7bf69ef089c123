//! Rule field validators
//!
//! Each rule field is one of a closed set of validator variants. All of them
//! share the [`Validator`] capability set: a syntactic validity check and a
//! match test against one packet field.

use crate::local::LocalAddrs;
use hostwall_common::Direction;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Upper bound (exclusive) for both ends of a port range
pub const PORT_RANGE_LIMIT: u16 = 65525;

/// Wildcard keyword accepted for addresses and ports
pub const WILDCARD: &str = "any";

/// Capability set shared by every rule field validator
pub trait Validator<T: ?Sized> {
    /// Whether the validator was built from well-formed input
    fn is_valid(&self) -> bool;

    /// Whether `value` satisfies the validator
    fn validate(&self, value: &T) -> bool;
}

/// Packet-direction classifier of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Either direction
    Any = 0,
    /// Packets not originating on this host
    Inbound = 1,
    /// Packets originating on this host
    Outbound = 2,
}

impl Zone {
    /// Decode the numeric zone used by the rule source (0=Any, 1=Inbound, 2=Outbound)
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Zone::Any),
            1 => Some(Zone::Inbound),
            2 => Some(Zone::Outbound),
            _ => None,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Zone::Any => f.write_str("any"),
            Zone::Inbound => f.write_str("inbound"),
            Zone::Outbound => f.write_str("outbound"),
        }
    }
}

/// Zone validator, applied to the packet's source address
#[derive(Debug, Clone)]
pub struct ZoneValidator {
    zone: Zone,
    local: Arc<LocalAddrs>,
}

impl ZoneValidator {
    /// Bind a zone to the host's local address set
    pub fn new(zone: Zone, local: Arc<LocalAddrs>) -> Self {
        Self { zone, local }
    }

    /// Configured zone
    pub fn zone(&self) -> Zone {
        self.zone
    }
}

impl Validator<str> for ZoneValidator {
    fn is_valid(&self) -> bool {
        true
    }

    #[inline]
    fn validate(&self, src_ip: &str) -> bool {
        match self.zone {
            Zone::Any => true,
            Zone::Inbound => self.local.direction_of(src_ip) == Direction::Inbound,
            Zone::Outbound => self.local.direction_of(src_ip) == Direction::Outbound,
        }
    }
}

/// Address validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrValidator {
    /// Matches every address
    Any,
    /// Matches one literal address
    Exact(IpAddr),
    /// Matches addresses inside a CIDR block
    Range(IpNetwork),
    /// Unparsable input, kept so the rule can report itself invalid
    Invalid(String),
}

impl AddrValidator {
    /// Parse `"any"`, a literal address or a CIDR block
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(WILDCARD) {
            return AddrValidator::Any;
        }
        if raw.contains('/') {
            return match raw.parse::<IpNetwork>() {
                Ok(net) => AddrValidator::Range(net),
                Err(_) => AddrValidator::Invalid(raw.to_string()),
            };
        }
        match raw.parse::<IpAddr>() {
            Ok(ip) => AddrValidator::Exact(ip),
            Err(_) => AddrValidator::Invalid(raw.to_string()),
        }
    }
}

impl Validator<str> for AddrValidator {
    fn is_valid(&self) -> bool {
        !matches!(self, AddrValidator::Invalid(_))
    }

    #[inline]
    fn validate(&self, ip: &str) -> bool {
        match self {
            AddrValidator::Any => true,
            AddrValidator::Exact(want) => ip.parse::<IpAddr>().map_or(false, |got| got == *want),
            AddrValidator::Range(net) => {
                ip.parse::<IpAddr>().map_or(false, |got| net.contains(got))
            }
            AddrValidator::Invalid(_) => false,
        }
    }
}

impl fmt::Display for AddrValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrValidator::Any => f.write_str(WILDCARD),
            AddrValidator::Exact(ip) => write!(f, "{ip}"),
            AddrValidator::Range(net) => write!(f, "{net}"),
            AddrValidator::Invalid(raw) => write!(f, "<invalid {raw:?}>"),
        }
    }
}

/// Port validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortValidator {
    /// Matches every port
    Any,
    /// Matches one port
    Exact(u16),
    /// Matches ports strictly between `head` and `tail`
    Range {
        /// Lower bound (exclusive)
        head: u16,
        /// Upper bound (exclusive)
        tail: u16,
    },
    /// Unparsable input
    Invalid,
}

impl PortValidator {
    /// Parse `"any"`, a single port or `"lo-hi"`
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(WILDCARD) {
            return PortValidator::Any;
        }
        if let Some((head, tail)) = raw.split_once('-') {
            return match (head.trim().parse::<u16>(), tail.trim().parse::<u16>()) {
                (Ok(head), Ok(tail)) => PortValidator::Range { head, tail },
                _ => PortValidator::Invalid,
            };
        }
        raw.parse::<u16>().map_or(PortValidator::Invalid, PortValidator::Exact)
    }
}

impl Validator<u16> for PortValidator {
    fn is_valid(&self) -> bool {
        match *self {
            PortValidator::Any | PortValidator::Exact(_) => true,
            PortValidator::Range { head, tail } => head < tail && tail < PORT_RANGE_LIMIT,
            PortValidator::Invalid => false,
        }
    }

    #[inline]
    fn validate(&self, port: &u16) -> bool {
        let port = *port;
        match *self {
            PortValidator::Any => true,
            PortValidator::Exact(want) => port == want,
            PortValidator::Range { head, tail } => head < port && port < tail,
            PortValidator::Invalid => false,
        }
    }
}

impl fmt::Display for PortValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortValidator::Any => f.write_str(WILDCARD),
            PortValidator::Exact(port) => write!(f, "{port}"),
            PortValidator::Range { head, tail } => write!(f, "{head}-{tail}"),
            PortValidator::Invalid => f.write_str("<invalid>"),
        }
    }
}
