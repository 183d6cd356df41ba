#![forbid(unsafe_code)]

//! Standard-framing packet support: Ethernet II, IPv4 and UDP.
//!
//! The simulated NIC emits frames that any off-the-shelf parser can decode,
//! and re-parses them on its own ingress path. Parsing borrows from the
//! input buffer; building returns owned byte vectors so layers nest by
//! passing the inner serialization as the outer payload.

pub mod checksum;
pub mod ethernet;
pub mod ipv4;
pub mod udp;

pub use ethernet::{EthernetFrame, MacAddr, ETHERTYPE_IPV4};
pub use ipv4::{Ipv4Packet, IPPROTO_UDP};
pub use udp::UdpDatagram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer ends before the layer's header or declared length.
    Truncated,
    /// A header field has an impossible value.
    Invalid(&'static str),
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseError::Truncated => write!(f, "packet truncated"),
            ParseError::Invalid(what) => write!(f, "invalid packet: {what}"),
        }
    }
}

impl std::error::Error for ParseError {}
