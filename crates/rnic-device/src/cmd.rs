//! Administrative command processing.
//!
//! Commands are applied in strict arrival order, one at a time; every
//! consumed command yields exactly one response carrying its echoed opcode
//! and `user_data`. A failed command mutates nothing and reports its status
//! through the response; the worker never dies on bad input.

use tracing::debug;

use crate::desc::{CmdReqDesc, CmdRequest, CmdRespDesc, UpdateMrTable, UpdatePgt, UpdateQp};
use crate::pgt::{MemoryRegion, HUGEPAGE_SIZE, PGT_ENTRY_SIZE};
use crate::state::{NicState, QueuePairContext};
use crate::types::CompletionStatus;
use rnic_mem::SharedMemory;

pub fn process_command(
    state: &mut NicState,
    mem: &SharedMemory,
    desc: &CmdReqDesc,
) -> CmdRespDesc {
    let status = match &desc.req {
        CmdRequest::UpdateMrTable(mr) => update_mr_table(state, mr),
        CmdRequest::UpdatePgt(pgt) => update_pgt(state, mem, pgt),
        CmdRequest::UpdateQp(qp) => update_qp(state, qp),
    };
    debug!(
        opcode = desc.req.opcode(),
        user_data = desc.user_data,
        ?status,
        "command processed"
    );
    CmdRespDesc {
        opcode: desc.req.opcode(),
        status,
        user_data: desc.user_data,
    }
}

fn update_mr_table(state: &mut NicState, mr: &UpdateMrTable) -> CompletionStatus {
    if !mr.acc_flags.is_coherent() {
        return CompletionStatus::InvalidAccessFlags;
    }
    if mr.length == 0 || mr.length % HUGEPAGE_SIZE != 0 {
        // Region lengths are whole hugepages; anything else cannot be
        // described by the page table.
        return CompletionStatus::InvalidDescriptor;
    }
    if state.has_region_key(mr.key) {
        return CompletionStatus::DuplicateKey;
    }
    state.insert_region(MemoryRegion {
        base_va: mr.base_va,
        length: mr.length,
        key: mr.key,
        pd_handle: mr.pd_handle,
        acc_flags: mr.acc_flags,
        pgt_offset: mr.pgt_offset,
    });
    CompletionStatus::Success
}

fn update_pgt(state: &mut NicState, mem: &SharedMemory, pgt: &UpdatePgt) -> CompletionStatus {
    if pgt.dma_length as usize % PGT_ENTRY_SIZE != 0 {
        return CompletionStatus::InvalidDescriptor;
    }
    let staged = match mem.read_vec(pgt.dma_addr, pgt.dma_length as usize) {
        Ok(bytes) => bytes,
        Err(_) => return CompletionStatus::InvalidDescriptor,
    };
    let entries: Vec<u64> = staged
        .chunks_exact(PGT_ENTRY_SIZE)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    match state.pgt.load(pgt.start_index as usize, &entries) {
        Ok(()) => CompletionStatus::Success,
        Err(_) => CompletionStatus::PgtOutOfRange,
    }
}

fn update_qp(state: &mut NicState, qp: &UpdateQp) -> CompletionStatus {
    if !state.knows_pd(qp.pd_handle) {
        return CompletionStatus::UnknownPd;
    }
    state.insert_queue_pair(QueuePairContext {
        qpn: qp.qpn,
        pd_handle: qp.pd_handle,
        qp_type: qp.qp_type,
        acc_flags: qp.acc_flags,
        pmtu: qp.pmtu,
    });
    CompletionStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessFlags, Pmtu, QpType};

    fn mr_cmd(key: u32, acc_flags: AccessFlags) -> CmdReqDesc {
        CmdReqDesc {
            user_data: key,
            req: CmdRequest::UpdateMrTable(UpdateMrTable {
                base_va: 0,
                length: 4 * HUGEPAGE_SIZE,
                key,
                pd_handle: 0x6611,
                acc_flags,
                pgt_offset: 0,
            }),
        }
    }

    fn setup() -> (NicState, SharedMemory) {
        (NicState::new(64), SharedMemory::new(0x10000).unwrap())
    }

    #[test]
    fn register_region_establishes_pd_and_echoes_user_data() {
        let (mut state, mem) = setup();
        let resp = process_command(
            &mut state,
            &mem,
            &mr_cmd(0x6622, AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE),
        );
        assert_eq!(resp.status, CompletionStatus::Success);
        assert_eq!(resp.user_data, 0x6622);
        assert!(state.knows_pd(0x6611));
        assert_eq!(state.region_by_key(0x6622).unwrap().length, 4 * HUGEPAGE_SIZE);
    }

    #[test]
    fn remote_write_without_local_write_is_rejected() {
        let (mut state, mem) = setup();
        let resp = process_command(&mut state, &mem, &mr_cmd(1, AccessFlags::REMOTE_WRITE));
        assert_eq!(resp.status, CompletionStatus::InvalidAccessFlags);
        assert!(state.region_by_key(1).is_none());
        assert!(!state.knows_pd(0x6611));
    }

    #[test]
    fn rebinding_a_key_is_a_duplicate() {
        let (mut state, mem) = setup();
        let cmd = mr_cmd(0x6622, AccessFlags::LOCAL_WRITE);
        assert!(process_command(&mut state, &mem, &cmd).status.is_success());
        assert_eq!(
            process_command(&mut state, &mem, &cmd).status,
            CompletionStatus::DuplicateKey
        );
    }

    #[test]
    fn partial_hugepage_region_is_invalid() {
        let (mut state, mem) = setup();
        let resp = process_command(
            &mut state,
            &mem,
            &CmdReqDesc {
                user_data: 0,
                req: CmdRequest::UpdateMrTable(UpdateMrTable {
                    base_va: 0,
                    length: HUGEPAGE_SIZE + 1,
                    key: 1,
                    pd_handle: 1,
                    acc_flags: AccessFlags::LOCAL_WRITE,
                    pgt_offset: 0,
                }),
            },
        );
        assert_eq!(resp.status, CompletionStatus::InvalidDescriptor);
    }

    #[test]
    fn pgt_load_reads_staging_entries() {
        let (mut state, mem) = setup();
        for (i, frame) in [0x20_0000u64, 0x40_0000, 0x60_0000].iter().enumerate() {
            mem.write_u64_le(0x1000 + (i * PGT_ENTRY_SIZE) as u64, *frame)
                .unwrap();
        }
        let resp = process_command(
            &mut state,
            &mem,
            &CmdReqDesc {
                user_data: 1,
                req: CmdRequest::UpdatePgt(UpdatePgt {
                    dma_addr: 0x1000,
                    dma_length: 3 * PGT_ENTRY_SIZE as u32,
                    start_index: 8,
                }),
            },
        );
        assert_eq!(resp.status, CompletionStatus::Success);

        // Entries landed at the requested start index.
        let region = MemoryRegion {
            base_va: 0,
            length: 3 * HUGEPAGE_SIZE,
            key: 1,
            pd_handle: 1,
            acc_flags: AccessFlags::LOCAL_WRITE,
            pgt_offset: 8,
        };
        let spans = crate::pgt::translate(&region, &state.pgt, HUGEPAGE_SIZE, 4).unwrap();
        assert_eq!(spans[0].addr, 0x40_0000);
    }

    #[test]
    fn pgt_load_beyond_table_capacity_is_out_of_range() {
        let (mut state, mem) = setup(); // 64-entry table
        let resp = process_command(
            &mut state,
            &mem,
            &CmdReqDesc {
                user_data: 0,
                req: CmdRequest::UpdatePgt(UpdatePgt {
                    dma_addr: 0,
                    dma_length: 8 * PGT_ENTRY_SIZE as u32,
                    start_index: 60,
                }),
            },
        );
        assert_eq!(resp.status, CompletionStatus::PgtOutOfRange);
    }

    #[test]
    fn ragged_pgt_dma_length_is_invalid() {
        let (mut state, mem) = setup();
        let resp = process_command(
            &mut state,
            &mem,
            &CmdReqDesc {
                user_data: 0,
                req: CmdRequest::UpdatePgt(UpdatePgt {
                    dma_addr: 0,
                    dma_length: 12,
                    start_index: 0,
                }),
            },
        );
        assert_eq!(resp.status, CompletionStatus::InvalidDescriptor);
    }

    #[test]
    fn queue_pair_requires_an_established_pd() {
        let (mut state, mem) = setup();
        let qp = CmdReqDesc {
            user_data: 2,
            req: CmdRequest::UpdateQp(UpdateQp {
                qpn: 0x6611,
                pd_handle: 0x6611,
                qp_type: QpType::ReliableConnected,
                pmtu: Pmtu::Mtu4096,
                acc_flags: AccessFlags::LOCAL_WRITE,
            }),
        };
        assert_eq!(
            process_command(&mut state, &mem, &qp).status,
            CompletionStatus::UnknownPd
        );

        // Registering a region under the PD makes the same command valid.
        process_command(
            &mut state,
            &mem,
            &mr_cmd(0x6622, AccessFlags::LOCAL_WRITE),
        );
        assert!(process_command(&mut state, &mem, &qp).status.is_success());
        assert_eq!(state.queue_pair(0x6611).unwrap().pmtu, Pmtu::Mtu4096);
    }
}
