//! Error taxonomy.
//!
//! Failures on the far side of a queue are never thrown across the host/NIC
//! boundary; they are mapped onto a [`CompletionStatus`] and surfaced through
//! the response or meta-report queue. The `Error` types here exist for the
//! near side of each API: host-side enqueue, device construction, and the
//! internal pipeline stages.

use thiserror::Error;

use crate::types::CompletionStatus;
use rnic_mem::HostMemError;

/// A descriptor slot whose bytes do not decode to a valid descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescError {
    #[error("unknown command opcode {0:#04x}")]
    UnknownCommandOpcode(u8),
    #[error("unknown work request opcode {0:#04x}")]
    UnknownWorkReqOpcode(u8),
    #[error("unknown queue pair type {0:#04x}")]
    UnknownQpType(u8),
    #[error("unknown path MTU code {0:#04x}")]
    UnknownPmtu(u8),
    #[error("unknown report kind {0:#04x}")]
    UnknownReportKind(u8),
    #[error("unknown completion status {0:#04x}")]
    UnknownStatus(u8),
    #[error("undefined access flag bits {0:#x}")]
    UnknownAccessFlags(u32),
    #[error("{0} scatter-gather elements exceed the inline limit")]
    TooManySges(u8),
}

/// Ring queue operation errors.
#[derive(Debug, Error)]
pub enum RingError {
    /// The producer caught up with the consumer; retry after the consumer
    /// drains, or drop.
    #[error("ring full")]
    Full,
    /// The ring was stopped while the call was blocked.
    #[error("ring stopped")]
    Stopped,
    /// The slot was consumed but its bytes are not a valid descriptor.
    #[error("malformed descriptor: {0}")]
    Descriptor(#[from] DescError),
    #[error("ring slot access failed: {0}")]
    Memory(#[from] HostMemError),
}

/// Virtual-to-physical translation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error(
        "virtual range {va:#x}+{len:#x} outside region base {base:#x} length {region_len:#x}"
    )]
    OutOfBounds {
        va: u64,
        len: u64,
        base: u64,
        region_len: u64,
    },
    #[error("page table index {index} beyond table capacity {capacity}")]
    PteOutOfRange { index: u64, capacity: u64 },
}

/// Work request execution failures. Each maps to the completion status the
/// host observes.
#[derive(Debug, Error)]
pub enum WqeError {
    #[error("no memory region bound to key {0:#x}")]
    UnknownKey(u32),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("operation exceeds the region's access rights")]
    Access,
    #[error("indivisible payload of {len} bytes exceeds path MTU {mtu}")]
    MtuViolation { len: usize, mtu: u32 },
    #[error("opcode {0:?} is reserved but not implemented")]
    UnsupportedOpcode(crate::types::WorkReqOpcode),
    #[error("payload access failed: {0}")]
    Memory(#[from] HostMemError),
}

impl WqeError {
    pub fn status(&self) -> CompletionStatus {
        match self {
            WqeError::UnknownKey(_) | WqeError::Translate(_) => CompletionStatus::TranslationFault,
            WqeError::Access => CompletionStatus::AccessViolation,
            WqeError::MtuViolation { .. } => CompletionStatus::MtuViolation,
            WqeError::UnsupportedOpcode(_) => CompletionStatus::InvalidDescriptor,
            // The data path only touches translated spans; a raw memory
            // failure means the page table points outside host memory.
            WqeError::Memory(_) => CompletionStatus::TranslationFault,
        }
    }
}

/// Fatal construction/lifecycle errors. Everything after `start()` degrades
/// to failed completions instead.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("ring capacity {0} is not a nonzero power of two")]
    BadRingCapacity(u32),
    #[error(
        "queue region base {base:#x} len {len:#x} does not fit in host memory of {size:#x} bytes"
    )]
    QueueRegionOutOfRange { base: u64, len: u64, size: u64 },
    #[error("queue regions {a} and {b} overlap")]
    QueueRegionOverlap { a: &'static str, b: &'static str },
    #[error("device already started")]
    AlreadyStarted,
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error(transparent)]
    Memory(#[from] HostMemError),
}
