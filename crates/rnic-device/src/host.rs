//! Host-side queue surface.
//!
//! Thin typed wrappers over the ring endpoints the host owns: it produces
//! command requests and work requests, and drains command responses and
//! meta reports. The usual session is: post a batch, `sync_pointers`, then
//! block-drain one completion per posted descriptor.

use crate::desc::{
    CmdReqDesc, CmdRequest, CmdRespDesc, MetaReportDesc, SendQueueDesc, UpdateMrTable, UpdatePgt,
    UpdateQp, SQ_MAX_INLINE_SGES,
};
use crate::error::{DescError, RingError};
use crate::ring::{Consumer, Producer};

/// Host → device administrative queue.
pub struct CommandReqQueue {
    pub(crate) inner: Producer<CmdReqDesc>,
}

impl CommandReqQueue {
    pub fn post_update_mr_table(
        &mut self,
        user_data: u32,
        mr: UpdateMrTable,
    ) -> Result<(), RingError> {
        self.inner.enqueue(&CmdReqDesc {
            user_data,
            req: CmdRequest::UpdateMrTable(mr),
        })
    }

    pub fn post_update_pgt(&mut self, user_data: u32, pgt: UpdatePgt) -> Result<(), RingError> {
        self.inner.enqueue(&CmdReqDesc {
            user_data,
            req: CmdRequest::UpdatePgt(pgt),
        })
    }

    pub fn post_update_qp(&mut self, user_data: u32, qp: UpdateQp) -> Result<(), RingError> {
        self.inner.enqueue(&CmdReqDesc {
            user_data,
            req: CmdRequest::UpdateQp(qp),
        })
    }

    /// Rings the doorbell: makes every posted command visible to the device.
    pub fn sync_pointers(&self) {
        self.inner.sync_pointers();
    }
}

/// Device → host command completion queue.
pub struct CommandRespQueue {
    pub(crate) inner: Consumer<CmdRespDesc>,
}

impl CommandRespQueue {
    /// Blocks for the next response; `None` once the device is stopped.
    pub fn dequeue_blocking(&mut self) -> Option<Result<CmdRespDesc, RingError>> {
        self.inner.dequeue_blocking()
    }

    pub fn try_dequeue(&mut self) -> Option<Result<CmdRespDesc, RingError>> {
        self.inner.try_dequeue()
    }
}

/// Host → device work request queue.
pub struct SendQueue {
    pub(crate) inner: Producer<SendQueueDesc>,
}

impl SendQueue {
    pub fn post_work_request(&mut self, wqe: SendQueueDesc) -> Result<(), RingError> {
        if wqe.sgl.len() > SQ_MAX_INLINE_SGES {
            return Err(RingError::Descriptor(DescError::TooManySges(
                wqe.sgl.len() as u8,
            )));
        }
        self.inner.enqueue(&wqe)
    }

    /// Rings the doorbell for the send queue.
    pub fn sync_pointers(&self) {
        self.inner.sync_pointers();
    }
}

/// Device → host data-plane completion queue.
pub struct MetaReportQueue {
    pub(crate) inner: Consumer<MetaReportDesc>,
}

impl MetaReportQueue {
    /// Blocks for the next report; `None` once the device is stopped.
    pub fn dequeue_blocking(&mut self) -> Option<Result<MetaReportDesc, RingError>> {
        self.inner.dequeue_blocking()
    }

    pub fn try_dequeue(&mut self) -> Option<Result<MetaReportDesc, RingError>> {
        self.inner.try_dequeue()
    }
}

/// All four host-side queue endpoints of one NIC.
pub struct HostQueues {
    pub cmd_req: CommandReqQueue,
    pub cmd_resp: CommandRespQueue,
    pub send: SendQueue,
    pub meta_report: MetaReportQueue,
}
