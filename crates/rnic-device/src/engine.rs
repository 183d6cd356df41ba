//! Work request execution: gather, segment, frame, deliver.
//!
//! One call executes one WQE to completion. The scatter-gather list is
//! resolved through the page table of the region owning each local key,
//! fragment contents are concatenated into the logical payload, and the
//! payload is cut into frames of at most the WQE's path MTU. Every frame
//! gets standard Ethernet/IPv4/UDP framing; reliable-connected frames add
//! BTH/RETH/immediate transport headers while raw-packet frames carry the
//! client bytes verbatim after the UDP header.

use tracing::trace;

use crate::config::NicConfig;
use crate::desc::SendQueueDesc;
use crate::error::WqeError;
use crate::fabric::{Frame, FrameMeta};
use crate::pgt::translate;
use crate::rdma::{self, Bth, Reth};
use crate::state::NicState;
use crate::types::{PacketPos, QpType, WorkReqOpcode};
use rnic_mem::SharedMemory;
use rnic_packet::{ethernet::EthernetFrame, ipv4::Ipv4Packet, udp::UdpDatagram, MacAddr};
use rnic_packet::{ETHERTYPE_IPV4, IPPROTO_UDP};

const FRAME_TTL: u8 = 64;

/// Resolves every SGE and concatenates the fragment bytes.
fn gather_payload(
    state: &NicState,
    mem: &SharedMemory,
    wqe: &SendQueueDesc,
) -> Result<Vec<u8>, WqeError> {
    let total: u64 = wqe.sgl.iter().map(|sge| u64::from(sge.len)).sum();
    let mut payload = Vec::with_capacity(total as usize);
    for sge in &wqe.sgl {
        let region = state
            .region_by_key(sge.lkey)
            .ok_or(WqeError::UnknownKey(sge.lkey))?;
        let spans = translate(region, &state.pgt, sge.laddr, u64::from(sge.len))?;
        for span in spans {
            let start = payload.len();
            payload.resize(start + span.len as usize, 0);
            mem.read_into(span.addr, &mut payload[start..])?;
        }
    }
    Ok(payload)
}

/// Cuts the payload into per-frame chunks.
///
/// A raw-packet payload is one indivisible frame (segmenting it would
/// corrupt the client's encapsulated bytes), so exceeding the path MTU is a
/// violation rather than a split. An empty payload still produces a single
/// empty frame so the operation has a "last frame" to complete on (and to
/// carry immediate data when the opcode has some).
fn segment<'a>(payload: &'a [u8], qp_type: QpType, mtu: usize) -> Result<Vec<&'a [u8]>, WqeError> {
    if payload.is_empty() {
        return Ok(vec![payload]);
    }
    match qp_type {
        QpType::RawPacket => {
            if payload.len() > mtu {
                Err(WqeError::MtuViolation {
                    len: payload.len(),
                    mtu: mtu as u32,
                })
            } else {
                Ok(vec![payload])
            }
        }
        QpType::ReliableConnected => Ok(payload.chunks(mtu).collect()),
    }
}

/// Executes one WQE, returning its frames in emission order.
pub fn execute_work_request(
    state: &NicState,
    mem: &SharedMemory,
    cfg: &NicConfig,
    wqe: &SendQueueDesc,
) -> Result<Vec<Frame>, WqeError> {
    match wqe.opcode {
        WorkReqOpcode::RdmaWrite | WorkReqOpcode::RdmaWriteWithImm => {}
        other => return Err(WqeError::UnsupportedOpcode(other)),
    }

    let payload = gather_payload(state, mem, wqe)?;
    let mtu = wqe.pmtu.bytes() as usize;
    let chunks = segment(&payload, wqe.qp_type, mtu)?;
    let count = chunks.len();
    trace!(
        total_len = payload.len(),
        frames = count,
        mtu,
        "work request segmented"
    );

    let mut frames = Vec::with_capacity(count);
    let mut chunk_offset = 0u64;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let pos = PacketPos::of_frame(i, count);
        let psn = wqe.psn.wrapping_add(i as u32);
        let raddr = wqe.raddr + chunk_offset;

        let (udp_payload, dst_port) = match wqe.qp_type {
            QpType::RawPacket => (chunk.to_vec(), cfg.udp_port),
            QpType::ReliableConnected => {
                let mut transport = Vec::with_capacity(Bth::LEN + Reth::LEN + chunk.len());
                transport.extend_from_slice(
                    &Bth {
                        opcode: rdma::write_opcode(pos, wqe.opcode.carries_imm()),
                        dqpn: wqe.dqpn,
                        psn,
                        ack_req: pos.is_last(),
                    }
                    .serialize(),
                );
                if matches!(pos, PacketPos::First | PacketPos::Only) {
                    transport.extend_from_slice(
                        &Reth {
                            raddr: wqe.raddr,
                            rkey: wqe.rkey,
                            dma_len: payload.len() as u32,
                        }
                        .serialize(),
                    );
                }
                if pos.is_last() && wqe.opcode.carries_imm() {
                    transport.extend_from_slice(&wqe.imm.to_be_bytes());
                }
                transport.extend_from_slice(chunk);
                (transport, rdma::ROCE_UDP_PORT)
            }
        };

        let udp = UdpDatagram::serialize(cfg.ip, wqe.dst_ip, cfg.udp_port, dst_port, &udp_payload);
        let ip = Ipv4Packet::serialize(
            cfg.ip,
            wqe.dst_ip,
            IPPROTO_UDP,
            (psn & 0xffff) as u16,
            FRAME_TTL,
            &udp,
        );
        let data = EthernetFrame::serialize(wqe.dst_mac, MacAddr(cfg.mac), ETHERTYPE_IPV4, &ip);

        frames.push(Frame {
            meta: FrameMeta {
                opcode: wqe.opcode,
                qp_type: wqe.qp_type,
                pos,
                raddr,
                rkey: wqe.rkey,
                dqpn: wqe.dqpn,
                psn,
                imm: wqe.imm,
                total_len: payload.len() as u32,
                payload_offset: data.len() - chunk.len(),
            },
            data,
        });
        chunk_offset += chunk.len() as u64;
    }
    Ok(frames)
}
