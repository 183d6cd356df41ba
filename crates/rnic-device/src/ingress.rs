//! Receive path: framing validation and RDMA write application.
//!
//! Every delivered frame is first checked to be well-formed
//! Ethernet/IPv4/UDP (whatever produced it, the wire format must hold up to
//! an independent parser). Frames addressed as RDMA writes are then applied:
//! the remote key selects a local memory region, the remote virtual address
//! translates through this context's own page table, and the payload bytes
//! are copied into the resulting physical spans. The last frame of an
//! operation yields exactly one receive-side meta report.

use tracing::{trace, warn};

use crate::desc::{MetaReportDesc, ReportKind};
use crate::error::WqeError;
use crate::fabric::Frame;
use crate::pgt::translate;
use crate::state::NicState;
use crate::types::{AccessFlags, CompletionStatus, WorkReqOpcode};
use rnic_mem::SharedMemory;
use rnic_packet::{ethernet::EthernetFrame, ipv4::Ipv4Packet, udp::UdpDatagram};

/// Outcome of one ingress frame.
#[derive(Debug)]
pub enum IngressOutcome {
    /// Frame consumed; no report due (first/middle frame of an operation).
    Applied,
    /// Frame consumed and an operation completed (or failed): report it.
    Report(MetaReportDesc),
    /// Frame was not valid standard framing and was dropped.
    Malformed,
}

fn report(frame: &Frame, status: CompletionStatus) -> MetaReportDesc {
    MetaReportDesc {
        kind: ReportKind::RecvWrite,
        status,
        dqpn: frame.meta.dqpn,
        psn: frame.meta.psn,
        imm: frame.meta.imm,
        raddr: frame.meta.raddr,
        total_len: frame.meta.total_len,
    }
}

/// Copies the frame payload into the destination region.
fn apply_write(state: &NicState, mem: &SharedMemory, frame: &Frame) -> Result<(), WqeError> {
    let region = state
        .region_by_key(frame.meta.rkey)
        .ok_or(WqeError::UnknownKey(frame.meta.rkey))?;
    if !region.acc_flags.contains(AccessFlags::REMOTE_WRITE) {
        return Err(WqeError::Access);
    }
    let payload = frame.payload();
    let spans = translate(region, &state.pgt, frame.meta.raddr, payload.len() as u64)?;
    let mut written = 0usize;
    for span in spans {
        mem.write_from(span.addr, &payload[written..written + span.len as usize])?;
        written += span.len as usize;
    }
    Ok(())
}

pub fn process_ingress_frame(
    state: &NicState,
    mem: &SharedMemory,
    frame: &Frame,
) -> IngressOutcome {
    // Validate the standard framing before touching any state; a frame that
    // an independent parser cannot decode never reaches the write path.
    let framing = EthernetFrame::parse(&frame.data)
        .and_then(|eth| Ipv4Packet::parse(eth.payload))
        .and_then(|ip| UdpDatagram::parse(ip.payload).map(|_| ()));
    if let Err(err) = framing {
        warn!(?err, len = frame.data.len(), "dropping malformed ingress frame");
        return IngressOutcome::Malformed;
    }

    match frame.meta.opcode {
        WorkReqOpcode::RdmaWrite | WorkReqOpcode::RdmaWriteWithImm => {
            match apply_write(state, mem, frame) {
                Ok(()) => {
                    trace!(
                        raddr = frame.meta.raddr,
                        len = frame.payload().len(),
                        psn = frame.meta.psn,
                        "write applied"
                    );
                    if frame.meta.pos.is_last() {
                        IngressOutcome::Report(report(frame, CompletionStatus::Success))
                    } else {
                        IngressOutcome::Applied
                    }
                }
                Err(err) => {
                    warn!(?err, "ingress write failed");
                    IngressOutcome::Report(report(frame, err.status()))
                }
            }
        }
        other => {
            warn!(?other, "unsupported opcode on ingress");
            IngressOutcome::Report(report(frame, CompletionStatus::InvalidDescriptor))
        }
    }
}
