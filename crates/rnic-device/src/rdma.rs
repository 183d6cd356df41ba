//! RoCEv2 transport headers for reliable-connected traffic.
//!
//! Frames on an RC queue pair carry a base transport header (BTH) after the
//! UDP header, an RDMA extended transport header (RETH) on the first frame
//! of a write, and 4 bytes of immediate data on the last frame of a
//! write-with-immediate. Raw-packet queue pairs carry none of these; the
//! client payload passes through verbatim.
//!
//! All fields are big-endian per the InfiniBand wire format; opcode values
//! are the real RC ones so third-party tooling decodes the frames.

use crate::types::PacketPos;

/// RoCEv2 UDP destination port.
pub const ROCE_UDP_PORT: u16 = 4791;

pub const RC_RDMA_WRITE_FIRST: u8 = 0x06;
pub const RC_RDMA_WRITE_MIDDLE: u8 = 0x07;
pub const RC_RDMA_WRITE_LAST: u8 = 0x08;
pub const RC_RDMA_WRITE_LAST_WITH_IMM: u8 = 0x09;
pub const RC_RDMA_WRITE_ONLY: u8 = 0x0a;
pub const RC_RDMA_WRITE_ONLY_WITH_IMM: u8 = 0x0b;

/// BTH opcode for one frame of an RDMA write.
pub fn write_opcode(pos: PacketPos, with_imm: bool) -> u8 {
    match (pos, with_imm) {
        (PacketPos::First, _) => RC_RDMA_WRITE_FIRST,
        (PacketPos::Middle, _) => RC_RDMA_WRITE_MIDDLE,
        (PacketPos::Last, false) => RC_RDMA_WRITE_LAST,
        (PacketPos::Last, true) => RC_RDMA_WRITE_LAST_WITH_IMM,
        (PacketPos::Only, false) => RC_RDMA_WRITE_ONLY,
        (PacketPos::Only, true) => RC_RDMA_WRITE_ONLY_WITH_IMM,
    }
}

/// Base transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bth {
    pub opcode: u8,
    pub dqpn: u32,
    pub psn: u32,
    pub ack_req: bool,
}

impl Bth {
    pub const LEN: usize = 12;

    /// Default partition key (the full-membership key).
    const PKEY: u16 = 0xffff;

    pub fn serialize(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.opcode;
        out[1] = 0; // SE/M/Pad/TVer
        out[2..4].copy_from_slice(&Self::PKEY.to_be_bytes());
        out[5..8].copy_from_slice(&self.dqpn.to_be_bytes()[1..4]);
        out[8] = if self.ack_req { 0x80 } else { 0 };
        out[9..12].copy_from_slice(&self.psn.to_be_bytes()[1..4]);
        out
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(Self {
            opcode: buf[0],
            dqpn: u32::from_be_bytes([0, buf[5], buf[6], buf[7]]),
            psn: u32::from_be_bytes([0, buf[9], buf[10], buf[11]]),
            ack_req: buf[8] & 0x80 != 0,
        })
    }
}

/// RDMA extended transport header: where the write lands on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reth {
    pub raddr: u64,
    pub rkey: u32,
    pub dma_len: u32,
}

impl Reth {
    pub const LEN: usize = 16;

    pub fn serialize(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..8].copy_from_slice(&self.raddr.to_be_bytes());
        out[8..12].copy_from_slice(&self.rkey.to_be_bytes());
        out[12..16].copy_from_slice(&self.dma_len.to_be_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(Self {
            raddr: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            rkey: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            dma_len: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

pub const IMMDT_LEN: usize = 4;
