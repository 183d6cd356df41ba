//! Device configuration.

use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::desc::{CmdReqDesc, CmdRespDesc, MetaReportDesc, RingDescriptor, SendQueueDesc};
use crate::error::DeviceError;

/// Static configuration of one simulated NIC.
///
/// The queue base addresses are physical offsets into the shared host
/// memory; each queue occupies `capacity * slot size` contiguous bytes and
/// the four regions must not overlap. Defaults mirror the host testbench
/// layout (rings in the first four 4 KiB pages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicConfig {
    pub cmd_req_base: u64,
    pub cmd_resp_base: u64,
    pub send_base: u64,
    pub meta_report_base: u64,

    /// Slots per ring; each must be a nonzero power of two.
    pub cmd_req_capacity: u32,
    pub cmd_resp_capacity: u32,
    pub send_capacity: u32,
    pub meta_report_capacity: u32,

    /// Page-table entries available to `UpdatePgt` commands.
    pub pgt_capacity: u32,

    /// Station address used as the Ethernet source of emitted frames.
    pub mac: [u8; 6],
    /// IPv4 source address of emitted frames.
    pub ip: Ipv4Addr,
    /// UDP source port; also the destination port for raw-packet frames
    /// (reliable-connected frames always target the RoCEv2 port).
    pub udp_port: u16,

    /// Route every emitted frame back into this NIC's own ingress path.
    pub self_loopback: bool,
}

impl Default for NicConfig {
    fn default() -> Self {
        Self {
            cmd_req_base: 0x0000,
            cmd_resp_base: 0x1000,
            send_base: 0x2000,
            meta_report_base: 0x3000,
            cmd_req_capacity: 64,
            cmd_resp_capacity: 64,
            send_capacity: 32,
            meta_report_capacity: 128,
            pgt_capacity: 4096,
            mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            ip: Ipv4Addr::new(10, 0, 2, 15),
            udp_port: crate::rdma::ROCE_UDP_PORT,
            self_loopback: false,
        }
    }
}

impl NicConfig {
    fn queue_regions(&self) -> [(&'static str, u64, u64); 4] {
        [
            (
                "cmd-req",
                self.cmd_req_base,
                u64::from(self.cmd_req_capacity) * CmdReqDesc::SIZE as u64,
            ),
            (
                "cmd-resp",
                self.cmd_resp_base,
                u64::from(self.cmd_resp_capacity) * CmdRespDesc::SIZE as u64,
            ),
            (
                "send",
                self.send_base,
                u64::from(self.send_capacity) * SendQueueDesc::SIZE as u64,
            ),
            (
                "meta-report",
                self.meta_report_base,
                u64::from(self.meta_report_capacity) * MetaReportDesc::SIZE as u64,
            ),
        ]
    }

    /// Checks the physical layout against the shared memory region.
    /// Capacity sanity (nonzero power of two) is enforced when each ring is
    /// built; region fit and pairwise disjointness are checked here.
    pub(crate) fn validate(&self, mem_size: u64) -> Result<(), DeviceError> {
        let regions = self.queue_regions();
        for (_name, base, len) in regions {
            let end = base
                .checked_add(len)
                .ok_or(DeviceError::QueueRegionOutOfRange {
                    base,
                    len,
                    size: mem_size,
                })?;
            if end > mem_size {
                return Err(DeviceError::QueueRegionOutOfRange {
                    base,
                    len,
                    size: mem_size,
                });
            }
        }
        for i in 0..regions.len() {
            for j in i + 1..regions.len() {
                let (a_name, a_base, a_len) = regions[i];
                let (b_name, b_base, b_len) = regions[j];
                if a_base < b_base + b_len && b_base < a_base + a_len {
                    return Err(DeviceError::QueueRegionOverlap {
                        a: a_name,
                        b: b_name,
                    });
                }
            }
        }
        Ok(())
    }
}
