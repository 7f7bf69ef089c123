//! L2-L4 header extraction
//!
//! Fills a [`PacketRecord`] from raw bytes. NFQUEUE hands over the network
//! layer directly ([`parse_ip_packet`]); captures that include the link
//! layer go through [`parse_ethernet_frame`]. A failed parse leaves the
//! record empty, and the packet still flows through classification.
//!
//! [`header_span`] tells the queue thread how many leading bytes the parser
//! reads, so workers can be handed a copy that parses identically to the
//! full packet whatever the extension header chain.

use hostwall_common::PacketRecord;
use std::fmt::Write;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPPROTO_HOPOPTS: u8 = 0;
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ROUTING: u8 = 43;
const IPPROTO_FRAGMENT: u8 = 44;
const IPPROTO_ICMPV6: u8 = 58;
const IPPROTO_DSTOPTS: u8 = 60;

/// Why a packet could not be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Fewer bytes than the header needs
    #[error("truncated header: need {needed} bytes, have {available}")]
    Truncated {
        /// Minimum length
        needed: usize,
        /// Actual length
        available: usize,
    },

    /// IP version nibble is neither 4 nor 6
    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),

    /// Link layer carries something other than IP
    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEthertype(u16),
}

/// IANA protocol number to record name
pub fn protocol_name(proto: u8, out: &mut String) {
    match proto {
        IPPROTO_TCP => out.push_str("TCP"),
        IPPROTO_UDP => out.push_str("UDP"),
        IPPROTO_ICMP => out.push_str("ICMPv4"),
        IPPROTO_ICMPV6 => out.push_str("ICMPv6"),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

#[inline(always)]
fn need(data: &[u8], needed: usize) -> Result<(), ParseError> {
    if data.len() < needed {
        Err(ParseError::Truncated { needed, available: data.len() })
    } else {
        Ok(())
    }
}

/// Parse an IPv4 or IPv6 packet into `rec`
pub fn parse_ip_packet(data: &[u8], rec: &mut PacketRecord) -> Result<(), ParseError> {
    rec.reset();
    need(data, 1)?;
    let result = match data[0] >> 4 {
        4 => parse_ipv4(data, rec),
        6 => parse_ipv6(data, rec),
        v => Err(ParseError::UnsupportedVersion(v)),
    };
    if result.is_err() {
        rec.reset();
    }
    result
}

/// Leading bytes of an IP packet that [`parse_ip_packet`] reads
///
/// Parsing `&data[..header_span(data)]` yields the same record as parsing
/// `data`. Never more than `data.len()`.
pub fn header_span(data: &[u8]) -> usize {
    let len = data.len();
    let end = match data.first().map(|b| b >> 4) {
        None => 0,
        Some(4) if len >= 20 => {
            let l4 = ((data[0] & 0x0F) as usize * 4).max(20);
            let frag_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1FFF;
            if frag_offset == 0 && has_ports(data[9]) {
                l4 + 4
            } else {
                l4
            }
        }
        Some(6) if len >= 40 => match walk_ipv6(data) {
            // Stopped for lack of bytes: the outcome depends on the length
            Transport { complete: false, .. } => len,
            Transport { protocol, offset, first_fragment: true, .. } if has_ports(protocol) => {
                offset + 4
            }
            Transport { offset, .. } => offset,
        },
        Some(4 | 6) => len,
        Some(_) => 1,
    };
    end.min(len)
}

/// Parse an Ethernet II frame (at most one 802.1Q tag) into `rec`
pub fn parse_ethernet_frame(data: &[u8], rec: &mut PacketRecord) -> Result<(), ParseError> {
    rec.reset();
    need(data, 14)?;

    let mut ethertype = u16::from_be_bytes([data[12], data[13]]);
    let mut l3 = 14;
    if ethertype == ETHERTYPE_VLAN {
        need(data, 18)?;
        ethertype = u16::from_be_bytes([data[16], data[17]]);
        l3 = 18;
    }

    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => parse_ip_packet(&data[l3..], rec),
        other => Err(ParseError::UnsupportedEthertype(other)),
    }
}

fn parse_ipv4(data: &[u8], rec: &mut PacketRecord) -> Result<(), ParseError> {
    need(data, 20)?;
    let ihl = ((data[0] & 0x0F) as usize) * 4;
    need(data, ihl.max(20))?;

    let protocol = data[9];
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

    let _ = write!(rec.src_ip, "{src}");
    let _ = write!(rec.dst_ip, "{dst}");
    protocol_name(protocol, &mut rec.protocol);

    // Only the first fragment carries the transport header
    let frag_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1FFF;
    if frag_offset == 0 {
        read_ports(protocol, &data[ihl.max(20)..], rec);
    }
    Ok(())
}

fn parse_ipv6(data: &[u8], rec: &mut PacketRecord) -> Result<(), ParseError> {
    need(data, 40)?;

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    dst.copy_from_slice(&data[24..40]);
    let _ = write!(rec.src_ip, "{}", Ipv6Addr::from(src));
    let _ = write!(rec.dst_ip, "{}", Ipv6Addr::from(dst));

    let Transport { protocol, offset, first_fragment, .. } = walk_ipv6(data);
    protocol_name(protocol, &mut rec.protocol);
    if first_fragment && offset <= data.len() {
        read_ports(protocol, &data[offset..], rec);
    }
    Ok(())
}

/// End of an IPv6 extension header chain
struct Transport {
    // Next-header value where the walk stopped
    protocol: u8,
    offset: usize,
    first_fragment: bool,
    // False if an extension header ran past the data
    complete: bool,
}

// Caller guarantees the 40-byte fixed header
fn walk_ipv6(data: &[u8]) -> Transport {
    let mut next = data[6];
    let mut offset = 40;
    let mut first_fragment = true;
    loop {
        match next {
            IPPROTO_HOPOPTS | IPPROTO_ROUTING | IPPROTO_DSTOPTS => {
                if data.len() < offset + 2 {
                    break;
                }
                next = data[offset];
                offset += (data[offset + 1] as usize + 1) * 8;
            }
            IPPROTO_FRAGMENT => {
                if data.len() < offset + 8 {
                    break;
                }
                let frag_offset = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) >> 3;
                first_fragment = frag_offset == 0;
                next = data[offset];
                offset += 8;
            }
            protocol => {
                return Transport { protocol, offset, first_fragment, complete: true };
            }
        }
    }
    Transport { protocol: next, offset, first_fragment, complete: false }
}

#[inline(always)]
fn has_ports(protocol: u8) -> bool {
    matches!(protocol, IPPROTO_TCP | IPPROTO_UDP)
}

#[inline(always)]
fn read_ports(protocol: u8, l4: &[u8], rec: &mut PacketRecord) {
    if has_ports(protocol) && l4.len() >= 4 {
        rec.src_port = u16::from_be_bytes([l4[0], l4[1]]);
        rec.dst_port = u16::from_be_bytes([l4[2], l4[3]]);
    }
}
