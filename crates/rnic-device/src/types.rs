//! Closed enum sets shared by the descriptor layouts and the execution
//! pipeline. Raw values follow the verbs/InfiniBand numbering the original
//! host tooling uses, so descriptors written by an unmodified host stack
//! decode unchanged.

use bitflags::bitflags;

/// Work request opcodes. Only the RDMA-write family is executed by the
/// engine today; the remaining variants reserve the opcode space as a closed
/// set so adding them later cannot silently collide.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkReqOpcode {
    RdmaWrite = 0,
    RdmaWriteWithImm = 1,
    RdmaRead = 2,
    Send = 3,
    SendWithImm = 4,
    AtomicCmpAndSwp = 5,
    AtomicFetchAndAdd = 6,
}

impl WorkReqOpcode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::RdmaWrite,
            1 => Self::RdmaWriteWithImm,
            2 => Self::RdmaRead,
            3 => Self::Send,
            4 => Self::SendWithImm,
            5 => Self::AtomicCmpAndSwp,
            6 => Self::AtomicFetchAndAdd,
            _ => return None,
        })
    }

    /// Whether the last frame of this operation carries immediate data.
    pub fn carries_imm(self) -> bool {
        matches!(self, Self::RdmaWriteWithImm | Self::SendWithImm)
    }
}

/// Queue pair service types (`ibv_qp_type` values).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QpType {
    ReliableConnected = 2,
    RawPacket = 8,
}

impl QpType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            2 => Self::ReliableConnected,
            8 => Self::RawPacket,
            _ => return None,
        })
    }
}

/// Path MTU codes (`ibv_mtu` values).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pmtu {
    Mtu256 = 1,
    Mtu512 = 2,
    Mtu1024 = 3,
    Mtu2048 = 4,
    Mtu4096 = 5,
}

impl Pmtu {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::Mtu256,
            2 => Self::Mtu512,
            3 => Self::Mtu1024,
            4 => Self::Mtu2048,
            5 => Self::Mtu4096,
            _ => return None,
        })
    }

    /// Payload bytes per frame for this MTU code.
    pub fn bytes(self) -> u32 {
        128u32 << (self as u32)
    }
}

bitflags! {
    /// Memory region access rights (`ibv_access_flags` values).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const LOCAL_WRITE = 1 << 0;
        const REMOTE_WRITE = 1 << 1;
        const REMOTE_READ = 1 << 2;
        const REMOTE_ATOMIC = 1 << 3;
    }
}

impl AccessFlags {
    /// Remote write/atomic rights are only meaningful if the region is
    /// locally writable; verbs rejects the combination at registration.
    pub fn is_coherent(self) -> bool {
        if self.intersects(Self::REMOTE_WRITE | Self::REMOTE_ATOMIC) {
            self.contains(Self::LOCAL_WRITE)
        } else {
            true
        }
    }
}

/// Completion status carried in command responses and meta reports.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Success = 0,
    InvalidDescriptor = 1,
    InvalidAccessFlags = 2,
    DuplicateKey = 3,
    PgtOutOfRange = 4,
    UnknownPd = 5,
    TranslationFault = 6,
    AccessViolation = 7,
    MtuViolation = 8,
}

impl CompletionStatus {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Success,
            1 => Self::InvalidDescriptor,
            2 => Self::InvalidAccessFlags,
            3 => Self::DuplicateKey,
            4 => Self::PgtOutOfRange,
            5 => Self::UnknownPd,
            6 => Self::TranslationFault,
            7 => Self::AccessViolation,
            8 => Self::MtuViolation,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Position of a frame within a segmented operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketPos {
    Only,
    First,
    Middle,
    Last,
}

impl PacketPos {
    /// Position of frame `index` out of `count` frames.
    pub fn of_frame(index: usize, count: usize) -> Self {
        debug_assert!(index < count);
        if count == 1 {
            Self::Only
        } else if index == 0 {
            Self::First
        } else if index + 1 == count {
            Self::Last
        } else {
            Self::Middle
        }
    }

    /// The last frame of an operation triggers its completion report.
    pub fn is_last(self) -> bool {
        matches!(self, Self::Only | Self::Last)
    }
}
