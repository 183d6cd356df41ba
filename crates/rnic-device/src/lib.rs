#![forbid(unsafe_code)]

//! Software model of an RDMA-capable NIC.
//!
//! The device validates a hardware/firmware command protocol without real
//! silicon: a host and a simulated NIC share one flat memory region
//! ([`rnic_mem::SharedMemory`]); the host posts fixed-layout descriptors
//! into ring buffers and rings doorbells, the NIC's worker threads consume
//! them, translate addresses through a hugepage-granular page table, build
//! standards-compliant Ethernet/IPv4/UDP frames (RoCEv2 transport headers on
//! reliable-connected queue pairs) and deliver completions back through
//! dedicated rings.
//!
//! ```no_run
//! use rnic_device::{NicConfig, SoftNic};
//! use rnic_mem::SharedMemory;
//!
//! let mem = SharedMemory::new(64 * 1024 * 1024)?;
//! let (mut nic, mut host) = SoftNic::new(NicConfig::default(), mem)?;
//! nic.set_self_loopback(true);
//! nic.start()?;
//!
//! // ... post commands / work requests through `host`, drain completions ...
//!
//! nic.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cmd;
pub mod config;
pub mod desc;
pub mod engine;
pub mod error;
pub mod fabric;
pub mod host;
pub mod ingress;
pub mod nic;
pub mod pgt;
pub mod rdma;
pub mod ring;
pub mod state;
pub mod types;

pub use config::NicConfig;
pub use desc::{
    CmdReqDesc, CmdRequest, CmdRespDesc, MetaReportDesc, ReportKind, RingDescriptor,
    SendQueueDesc, Sge, UpdateMrTable, UpdatePgt, UpdateQp, SQ_MAX_INLINE_SGES,
};
pub use error::{DescError, DeviceError, RingError, TranslateError, WqeError};
pub use fabric::{CaptureEgress, DiscardEgress, Frame, FrameMeta, FrameTx, IngressHandle, LoopbackFabric};
pub use host::{CommandReqQueue, CommandRespQueue, HostQueues, MetaReportQueue, SendQueue};
pub use nic::{NicStats, SoftNic};
pub use pgt::{MemoryRegion, PageTable, PhysSpan, HUGEPAGE_SIZE, PGT_ENTRY_SIZE};
pub use state::{NicState, QueuePairContext};
pub use types::{AccessFlags, CompletionStatus, PacketPos, Pmtu, QpType, WorkReqOpcode};
