#![forbid(unsafe_code)]

use super::ParseError;
use crate::checksum::transport_checksum_ipv4;
use core::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
    pub payload: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    pub const HEADER_LEN: usize = 8;

    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ParseError::Truncated);
        }
        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if length < Self::HEADER_LEN {
            return Err(ParseError::Invalid("UDP length < header length"));
        }
        if buf.len() < length {
            return Err(ParseError::Truncated);
        }
        Ok(Self {
            src_port: u16::from_be_bytes([buf[0], buf[1]]),
            dst_port: u16::from_be_bytes([buf[2], buf[3]]),
            length: length as u16,
            checksum: u16::from_be_bytes([buf[6], buf[7]]),
            payload: &buf[Self::HEADER_LEN..length],
        })
    }

    /// A zero checksum means "not computed" and is always accepted.
    pub fn checksum_valid(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr, raw: &[u8]) -> bool {
        if self.checksum == 0 {
            return true;
        }
        transport_checksum_ipv4(src_ip, dst_ip, super::IPPROTO_UDP, &raw[..self.length as usize])
            == 0
    }

    pub fn serialize(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let len = Self::HEADER_LEN + payload.len();
        debug_assert!(len <= u16::MAX as usize);
        let mut out = vec![0u8; Self::HEADER_LEN];
        out[0..2].copy_from_slice(&src_port.to_be_bytes());
        out[2..4].copy_from_slice(&dst_port.to_be_bytes());
        out[4..6].copy_from_slice(&(len as u16).to_be_bytes());
        out.extend_from_slice(payload);
        let mut csum = transport_checksum_ipv4(src_ip, dst_ip, super::IPPROTO_UDP, &out);
        if csum == 0 {
            csum = 0xffff;
        }
        out[6..8].copy_from_slice(&csum.to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse_datagram() {
        let src_ip = Ipv4Addr::new(10, 0, 0, 1);
        let dst_ip = Ipv4Addr::new(10, 0, 0, 2);
        let bytes = UdpDatagram::serialize(src_ip, dst_ip, 2222, 1111, b"hello");

        let dgram = UdpDatagram::parse(&bytes).unwrap();
        assert_eq!(dgram.src_port, 2222);
        assert_eq!(dgram.dst_port, 1111);
        assert_eq!(dgram.payload, b"hello");
        assert_eq!(dgram.length as usize, bytes.len());
        assert!(dgram.checksum_valid(src_ip, dst_ip, &bytes));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let src_ip = Ipv4Addr::new(10, 0, 0, 1);
        let dst_ip = Ipv4Addr::new(10, 0, 0, 2);
        let mut bytes = UdpDatagram::serialize(src_ip, dst_ip, 1, 2, b"hello");
        bytes[9] ^= 0xff;

        let dgram = UdpDatagram::parse(&bytes).unwrap();
        assert!(!dgram.checksum_valid(src_ip, dst_ip, &bytes));
    }

    #[test]
    fn declared_length_is_honored_over_buffer_length() {
        // 8-byte header + 2-byte payload, but 3 trailing bytes of link padding.
        let mut bytes = UdpDatagram::serialize(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            5,
            6,
            b"ab",
        );
        bytes.extend_from_slice(&[0, 0, 0]);
        let dgram = UdpDatagram::parse(&bytes).unwrap();
        assert_eq!(dgram.payload, b"ab");
    }

    #[test]
    fn bad_length_field_is_rejected() {
        let mut bytes =
            UdpDatagram::serialize(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2), 5, 6, b"");
        bytes[5] = 4; // < header length
        assert!(matches!(
            UdpDatagram::parse(&bytes),
            Err(ParseError::Invalid(_))
        ));
    }
}
