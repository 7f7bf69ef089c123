//! Packet record and verdict types
//!
//! A [`PacketRecord`] is filled once per queued packet, read by exactly one
//! worker while its verdict is computed, then reset and handed back to a
//! reuse pool.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final outcome for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Let the kernel continue processing the packet
    Accept,
    /// Discard the packet
    Drop,
}

impl Verdict {
    /// True for [`Verdict::Accept`]
    #[inline(always)]
    pub fn is_accept(self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => f.write_str("ACCEPT"),
            Verdict::Drop => f.write_str("DROP"),
        }
    }
}

/// Packet orientation relative to this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Traffic arriving from elsewhere
    Inbound,
    /// Traffic originating on this host
    Outbound,
}

/// Fields extracted from one raw packet
///
/// Parse failures leave fields at their empty/zero defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketRecord {
    /// Source address, textual form
    pub src_ip: String,
    /// Destination address, textual form
    pub dst_ip: String,
    /// Source port (0 when the transport has no ports)
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Protocol name ("TCP", "UDP", "ICMPv4", ...)
    pub protocol: String,
}

impl PacketRecord {
    /// Build a record directly (tests and synthetic traffic)
    pub fn new(
        src_ip: impl Into<String>,
        src_port: u16,
        dst_ip: impl Into<String>,
        dst_port: u16,
    ) -> Self {
        Self {
            src_ip: src_ip.into(),
            dst_ip: dst_ip.into(),
            src_port,
            dst_port,
            protocol: String::new(),
        }
    }

    /// Set the protocol name
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Clear every field, keeping string capacity for reuse
    #[inline]
    pub fn reset(&mut self) {
        self.src_ip.clear();
        self.dst_ip.clear();
        self.src_port = 0;
        self.dst_port = 0;
        self.protocol.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_capacity() {
        let mut rec = PacketRecord::new("192.168.1.5", 4444, "10.0.0.1", 22).with_protocol("TCP");
        let cap = rec.src_ip.capacity();
        rec.reset();
        assert_eq!(rec, PacketRecord::default());
        assert_eq!(rec.src_ip.capacity(), cap);
    }

    #[test]
    fn test_verdict_serde() {
        let v: Verdict = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(v, Verdict::Drop);
        assert_eq!(Verdict::Accept.to_string(), "ACCEPT");
        assert!(Verdict::Accept.is_accept());
    }
}
