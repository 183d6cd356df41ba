//! Frame delivery: egress sinks and the loopback path.
//!
//! An emitted frame is the assembled wire bytes plus sideband metadata, the
//! same split a hardware NIC carries on its internal buses, where the packet
//! engine's descriptor fields ride next to the serialized frame. The wire
//! bytes alone are what a capture would show; the sideband is what the
//! receive path needs to apply an RDMA write without re-deriving it from a
//! raw-packet payload that cannot self-describe.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::types::{PacketPos, QpType, WorkReqOpcode};

/// Sideband descriptor accompanying one emitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub opcode: WorkReqOpcode,
    pub qp_type: QpType,
    pub pos: PacketPos,
    /// Remote virtual address this frame's payload lands at.
    pub raddr: u64,
    pub rkey: u32,
    pub dqpn: u32,
    pub psn: u32,
    pub imm: u32,
    /// Total payload bytes across all frames of the operation.
    pub total_len: u32,
    /// Offset of the operation payload within `data` (past all headers).
    pub payload_offset: usize,
}

/// An assembled frame ready for transmission or loopback delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub meta: FrameMeta,
    pub data: Vec<u8>,
}

impl Frame {
    /// The operation payload carried by this frame.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.meta.payload_offset..]
    }
}

/// Egress side of the delivery path.
pub trait FrameTx: Send {
    fn transmit(&mut self, frame: Frame);
}

pub(crate) enum IngressMsg {
    Frame(Frame),
    Stop,
}

/// Handle into a NIC's ingress path. Cloneable, so a peer NIC (or a test)
/// can be wired as this NIC's frame source.
#[derive(Clone)]
pub struct IngressHandle {
    pub(crate) tx: mpsc::Sender<IngressMsg>,
}

impl FrameTx for IngressHandle {
    fn transmit(&mut self, frame: Frame) {
        // A send only fails once the receiving NIC has shut down; frames in
        // flight at teardown are dropped like frames on a dead wire.
        if self.tx.send(IngressMsg::Frame(frame)).is_err() {
            trace!("ingress closed; frame dropped");
        }
    }
}

/// Self-loopback: every emitted frame re-enters the same NIC's ingress
/// path, byte-for-byte and in emission order.
pub struct LoopbackFabric {
    ingress: IngressHandle,
}

impl LoopbackFabric {
    pub fn new(ingress: IngressHandle) -> Self {
        Self { ingress }
    }
}

impl FrameTx for LoopbackFabric {
    fn transmit(&mut self, frame: Frame) {
        self.ingress.transmit(frame);
    }
}

/// Default egress when no wire is attached: count and drop.
#[derive(Default)]
pub struct DiscardEgress {
    dropped: u64,
}

impl DiscardEgress {
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameTx for DiscardEgress {
    fn transmit(&mut self, frame: Frame) {
        self.dropped += 1;
        trace!(len = frame.data.len(), "no egress attached; frame dropped");
    }
}

/// Test egress that records every transmitted frame.
#[derive(Clone, Default)]
pub struct CaptureEgress {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl CaptureEgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl FrameTx for CaptureEgress {
    fn transmit(&mut self, frame: Frame) {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frame);
    }
}
