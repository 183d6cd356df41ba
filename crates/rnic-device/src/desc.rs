//! Fixed-size binary descriptor layouts.
//!
//! Every queue carries one descriptor family; slots are fixed-size records
//! at fixed byte offsets, little-endian, so an unmodified host stack can
//! assemble them with plain pointer arithmetic. Offsets are spelled out per
//! family below; reserved bytes encode as zero and are ignored on decode.
//!
//! Command request (64 bytes):
//! - `[0]`      opcode (0 = UpdateMrTable, 1 = UpdatePgt, 2 = UpdateQp)
//! - `[4..8]`   user_data (echoed in the response)
//! - UpdateMrTable: `[8..16]` base_va, `[16..24]` length, `[24..28]` key,
//!   `[28..32]` pd_handle, `[32..36]` acc_flags, `[36..40]` pgt_offset
//! - UpdatePgt: `[8..16]` dma_addr, `[16..20]` dma_length,
//!   `[20..24]` start_index
//! - UpdateQp: `[8..12]` qpn, `[12..16]` pd_handle, `[16]` qp_type,
//!   `[17]` pmtu, `[20..24]` acc_flags
//!
//! Command response (16 bytes):
//! - `[0]` opcode echo, `[1]` status, `[4..8]` user_data echo
//!
//! Send queue entry (128 bytes):
//! - `[0]` opcode, `[1]` flags (bit 0 first, bit 1 last), `[2]` qp_type,
//!   `[3]` pmtu, `[4]` sge_count, `[8..12]` psn, `[12..16]` imm,
//!   `[16..24]` raddr, `[24..28]` rkey, `[28..32]` dqpn,
//!   `[32..36]` dst_ip (network order), `[36..42]` dst_mac,
//!   `[64..128]` up to 4 SGEs of 16 bytes each:
//!   `[0..4]` lkey, `[4..8]` len, `[8..16]` laddr
//!
//! Meta report (32 bytes):
//! - `[0]` kind (0 = send completion, 1 = write delivered), `[1]` status,
//!   `[4..8]` dqpn, `[8..12]` psn, `[12..16]` imm, `[16..24]` raddr,
//!   `[24..28]` total_len

use core::net::Ipv4Addr;

use crate::error::DescError;
use crate::types::{AccessFlags, CompletionStatus, Pmtu, QpType, WorkReqOpcode};
use rnic_packet::MacAddr;

/// A fixed-size record that can live in a ring slot.
pub trait RingDescriptor: Sized {
    const SIZE: usize;

    /// Encodes into `out`, which is exactly `SIZE` bytes.
    fn encode(&self, out: &mut [u8]);

    /// Decodes a slot. Malformed bytes are an error, never a panic.
    fn decode(buf: &[u8]) -> Result<Self, DescError>;
}

pub const CMD_OPCODE_UPDATE_MR_TABLE: u8 = 0;
pub const CMD_OPCODE_UPDATE_PGT: u8 = 1;
pub const CMD_OPCODE_UPDATE_QP: u8 = 2;

/// Opcode echoed in a response to a slot that failed to decode.
pub const CMD_OPCODE_INVALID: u8 = 0xff;

fn decode_acc_flags(raw: u32) -> Result<AccessFlags, DescError> {
    AccessFlags::from_bits(raw).ok_or(DescError::UnknownAccessFlags(raw))
}

/// Registers a memory region and binds its protection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateMrTable {
    pub base_va: u64,
    pub length: u64,
    pub key: u32,
    pub pd_handle: u32,
    pub acc_flags: AccessFlags,
    pub pgt_offset: u32,
}

/// Loads `dma_length / 8` page-table entries from a physical staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePgt {
    pub dma_addr: u64,
    pub dma_length: u32,
    pub start_index: u32,
}

/// Creates or reconfigures a queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateQp {
    pub qpn: u32,
    pub pd_handle: u32,
    pub qp_type: QpType,
    pub pmtu: Pmtu,
    pub acc_flags: AccessFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdRequest {
    UpdateMrTable(UpdateMrTable),
    UpdatePgt(UpdatePgt),
    UpdateQp(UpdateQp),
}

impl CmdRequest {
    pub fn opcode(&self) -> u8 {
        match self {
            CmdRequest::UpdateMrTable(_) => CMD_OPCODE_UPDATE_MR_TABLE,
            CmdRequest::UpdatePgt(_) => CMD_OPCODE_UPDATE_PGT,
            CmdRequest::UpdateQp(_) => CMD_OPCODE_UPDATE_QP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdReqDesc {
    pub user_data: u32,
    pub req: CmdRequest,
}

impl RingDescriptor for CmdReqDesc {
    const SIZE: usize = 64;

    fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), Self::SIZE);
        out.fill(0);
        out[0] = self.req.opcode();
        out[4..8].copy_from_slice(&self.user_data.to_le_bytes());
        match &self.req {
            CmdRequest::UpdateMrTable(mr) => {
                out[8..16].copy_from_slice(&mr.base_va.to_le_bytes());
                out[16..24].copy_from_slice(&mr.length.to_le_bytes());
                out[24..28].copy_from_slice(&mr.key.to_le_bytes());
                out[28..32].copy_from_slice(&mr.pd_handle.to_le_bytes());
                out[32..36].copy_from_slice(&mr.acc_flags.bits().to_le_bytes());
                out[36..40].copy_from_slice(&mr.pgt_offset.to_le_bytes());
            }
            CmdRequest::UpdatePgt(pgt) => {
                out[8..16].copy_from_slice(&pgt.dma_addr.to_le_bytes());
                out[16..20].copy_from_slice(&pgt.dma_length.to_le_bytes());
                out[20..24].copy_from_slice(&pgt.start_index.to_le_bytes());
            }
            CmdRequest::UpdateQp(qp) => {
                out[8..12].copy_from_slice(&qp.qpn.to_le_bytes());
                out[12..16].copy_from_slice(&qp.pd_handle.to_le_bytes());
                out[16] = qp.qp_type as u8;
                out[17] = qp.pmtu as u8;
                out[20..24].copy_from_slice(&qp.acc_flags.bits().to_le_bytes());
            }
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, DescError> {
        debug_assert_eq!(buf.len(), Self::SIZE);
        let user_data = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let req = match buf[0] {
            CMD_OPCODE_UPDATE_MR_TABLE => CmdRequest::UpdateMrTable(UpdateMrTable {
                base_va: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
                length: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
                key: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
                pd_handle: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
                acc_flags: decode_acc_flags(u32::from_le_bytes(buf[32..36].try_into().unwrap()))?,
                pgt_offset: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            }),
            CMD_OPCODE_UPDATE_PGT => CmdRequest::UpdatePgt(UpdatePgt {
                dma_addr: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
                dma_length: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
                start_index: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            }),
            CMD_OPCODE_UPDATE_QP => CmdRequest::UpdateQp(UpdateQp {
                qpn: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
                pd_handle: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
                qp_type: QpType::from_raw(buf[16]).ok_or(DescError::UnknownQpType(buf[16]))?,
                pmtu: Pmtu::from_raw(buf[17]).ok_or(DescError::UnknownPmtu(buf[17]))?,
                acc_flags: decode_acc_flags(u32::from_le_bytes(buf[20..24].try_into().unwrap()))?,
            }),
            other => return Err(DescError::UnknownCommandOpcode(other)),
        };
        Ok(Self { user_data, req })
    }
}

/// Minimal acknowledgment pushed for every consumed command, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdRespDesc {
    pub opcode: u8,
    pub status: CompletionStatus,
    pub user_data: u32,
}

impl RingDescriptor for CmdRespDesc {
    const SIZE: usize = 16;

    fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), Self::SIZE);
        out.fill(0);
        out[0] = self.opcode;
        out[1] = self.status as u8;
        out[4..8].copy_from_slice(&self.user_data.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, DescError> {
        debug_assert_eq!(buf.len(), Self::SIZE);
        Ok(Self {
            opcode: buf[0],
            status: CompletionStatus::from_raw(buf[1]).ok_or(DescError::UnknownStatus(buf[1]))?,
            user_data: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        })
    }
}

/// One contiguous local buffer fragment of a work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sge {
    pub lkey: u32,
    pub len: u32,
    pub laddr: u64,
}

pub const SQ_MAX_INLINE_SGES: usize = 4;

const SQ_FLAG_FIRST: u8 = 1 << 0;
const SQ_FLAG_LAST: u8 = 1 << 1;
const SQ_SGE_BASE: usize = 64;
const SQ_SGE_SIZE: usize = 16;

/// A work queue entry: one unit of requested data-plane work.
///
/// The entry is self-contained: it carries its own path MTU and service type
/// so the engine never has to chase queue-pair state mid-operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendQueueDesc {
    pub opcode: WorkReqOpcode,
    pub is_first: bool,
    pub is_last: bool,
    pub qp_type: QpType,
    pub pmtu: Pmtu,
    pub psn: u32,
    pub imm: u32,
    pub raddr: u64,
    pub rkey: u32,
    pub dqpn: u32,
    pub dst_ip: Ipv4Addr,
    pub dst_mac: MacAddr,
    pub sgl: Vec<Sge>,
}

impl RingDescriptor for SendQueueDesc {
    const SIZE: usize = 128;

    fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), Self::SIZE);
        debug_assert!(self.sgl.len() <= SQ_MAX_INLINE_SGES);
        out.fill(0);
        out[0] = self.opcode as u8;
        let mut flags = 0u8;
        if self.is_first {
            flags |= SQ_FLAG_FIRST;
        }
        if self.is_last {
            flags |= SQ_FLAG_LAST;
        }
        out[1] = flags;
        out[2] = self.qp_type as u8;
        out[3] = self.pmtu as u8;
        out[4] = self.sgl.len() as u8;
        out[8..12].copy_from_slice(&self.psn.to_le_bytes());
        out[12..16].copy_from_slice(&self.imm.to_le_bytes());
        out[16..24].copy_from_slice(&self.raddr.to_le_bytes());
        out[24..28].copy_from_slice(&self.rkey.to_le_bytes());
        out[28..32].copy_from_slice(&self.dqpn.to_le_bytes());
        out[32..36].copy_from_slice(&self.dst_ip.octets());
        out[36..42].copy_from_slice(&self.dst_mac.0);
        for (i, sge) in self.sgl.iter().enumerate() {
            let off = SQ_SGE_BASE + i * SQ_SGE_SIZE;
            out[off..off + 4].copy_from_slice(&sge.lkey.to_le_bytes());
            out[off + 4..off + 8].copy_from_slice(&sge.len.to_le_bytes());
            out[off + 8..off + 16].copy_from_slice(&sge.laddr.to_le_bytes());
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, DescError> {
        debug_assert_eq!(buf.len(), Self::SIZE);
        let opcode =
            WorkReqOpcode::from_raw(buf[0]).ok_or(DescError::UnknownWorkReqOpcode(buf[0]))?;
        let qp_type = QpType::from_raw(buf[2]).ok_or(DescError::UnknownQpType(buf[2]))?;
        let pmtu = Pmtu::from_raw(buf[3]).ok_or(DescError::UnknownPmtu(buf[3]))?;
        let sge_count = buf[4];
        if sge_count as usize > SQ_MAX_INLINE_SGES {
            return Err(DescError::TooManySges(sge_count));
        }
        let mut sgl = Vec::with_capacity(sge_count as usize);
        for i in 0..sge_count as usize {
            let off = SQ_SGE_BASE + i * SQ_SGE_SIZE;
            sgl.push(Sge {
                lkey: u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
                len: u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap()),
                laddr: u64::from_le_bytes(buf[off + 8..off + 16].try_into().unwrap()),
            });
        }
        Ok(Self {
            opcode,
            is_first: buf[1] & SQ_FLAG_FIRST != 0,
            is_last: buf[1] & SQ_FLAG_LAST != 0,
            qp_type,
            pmtu,
            psn: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            imm: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            raddr: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            rkey: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            dqpn: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            dst_ip: Ipv4Addr::new(buf[32], buf[33], buf[34], buf[35]),
            dst_mac: MacAddr(buf[36..42].try_into().unwrap()),
            sgl,
        })
    }
}

/// Side of a data-plane completion.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// The local engine finished transmitting a work request.
    SendComplete = 0,
    /// An RDMA write from the wire was applied to local memory.
    RecvWrite = 1,
}

impl ReportKind {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::SendComplete,
            1 => Self::RecvWrite,
            _ => return None,
        })
    }
}

/// Completion record for one unit of data-plane work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaReportDesc {
    pub kind: ReportKind,
    pub status: CompletionStatus,
    pub dqpn: u32,
    pub psn: u32,
    pub imm: u32,
    pub raddr: u64,
    pub total_len: u32,
}

impl RingDescriptor for MetaReportDesc {
    const SIZE: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), Self::SIZE);
        out.fill(0);
        out[0] = self.kind as u8;
        out[1] = self.status as u8;
        out[4..8].copy_from_slice(&self.dqpn.to_le_bytes());
        out[8..12].copy_from_slice(&self.psn.to_le_bytes());
        out[12..16].copy_from_slice(&self.imm.to_le_bytes());
        out[16..24].copy_from_slice(&self.raddr.to_le_bytes());
        out[24..28].copy_from_slice(&self.total_len.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self, DescError> {
        debug_assert_eq!(buf.len(), Self::SIZE);
        Ok(Self {
            kind: ReportKind::from_raw(buf[0]).ok_or(DescError::UnknownReportKind(buf[0]))?,
            status: CompletionStatus::from_raw(buf[1]).ok_or(DescError::UnknownStatus(buf[1]))?,
            dqpn: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            psn: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            imm: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            raddr: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            total_len: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        })
    }
}
