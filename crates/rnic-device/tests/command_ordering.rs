//! Completion ordering: K submitted commands yield exactly K responses in
//! submission order, failures included.

use rnic_device::{
    AccessFlags, CompletionStatus, NicConfig, Pmtu, QpType, SoftNic, UpdateMrTable, UpdatePgt,
    UpdateQp, HUGEPAGE_SIZE, PGT_ENTRY_SIZE,
};
use rnic_mem::SharedMemory;

const STAGING: u64 = 0x10000;

fn mr(key: u32, pd_handle: u32, acc_flags: AccessFlags) -> UpdateMrTable {
    UpdateMrTable {
        base_va: 0,
        length: 4 * HUGEPAGE_SIZE,
        key,
        pd_handle,
        acc_flags,
        pgt_offset: 0,
    }
}

#[test]
fn mixed_batch_completes_in_submission_order() {
    let mem = SharedMemory::new(8 * 1024 * 1024).unwrap();
    let cfg = NicConfig {
        pgt_capacity: 64,
        ..NicConfig::default()
    };
    let (mut nic, mut host) = SoftNic::new(cfg, mem.clone()).unwrap();
    nic.start().unwrap();

    for i in 0..4u64 {
        mem.write_u64_le(STAGING + i * PGT_ENTRY_SIZE as u64, i * HUGEPAGE_SIZE)
            .unwrap();
    }

    // Deliberate mix of outcomes, identified by user_data.
    let rw = AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE;
    host.cmd_req.post_update_mr_table(0, mr(0x10, 0x1, rw)).unwrap();
    // Remote write without local write: invalid flags.
    host.cmd_req
        .post_update_mr_table(1, mr(0x11, 0x1, AccessFlags::REMOTE_WRITE))
        .unwrap();
    // Same key again: duplicate.
    host.cmd_req.post_update_mr_table(2, mr(0x10, 0x1, rw)).unwrap();
    // Valid page table load.
    host.cmd_req
        .post_update_pgt(
            3,
            UpdatePgt {
                dma_addr: STAGING,
                dma_length: 4 * PGT_ENTRY_SIZE as u32,
                start_index: 0,
            },
        )
        .unwrap();
    // Overflows the 64-entry table.
    host.cmd_req
        .post_update_pgt(
            4,
            UpdatePgt {
                dma_addr: STAGING,
                dma_length: 4 * PGT_ENTRY_SIZE as u32,
                start_index: 62,
            },
        )
        .unwrap();
    // QP under a PD no registration ever named.
    host.cmd_req
        .post_update_qp(
            5,
            UpdateQp {
                qpn: 7,
                pd_handle: 0xdead,
                qp_type: QpType::ReliableConnected,
                pmtu: Pmtu::Mtu1024,
                acc_flags: rw,
            },
        )
        .unwrap();
    // QP under the PD established by command 0.
    host.cmd_req
        .post_update_qp(
            6,
            UpdateQp {
                qpn: 7,
                pd_handle: 0x1,
                qp_type: QpType::ReliableConnected,
                pmtu: Pmtu::Mtu1024,
                acc_flags: rw,
            },
        )
        .unwrap();
    host.cmd_req.sync_pointers();

    let expected = [
        (0, CompletionStatus::Success),
        (1, CompletionStatus::InvalidAccessFlags),
        (2, CompletionStatus::DuplicateKey),
        (3, CompletionStatus::Success),
        (4, CompletionStatus::PgtOutOfRange),
        (5, CompletionStatus::UnknownPd),
        (6, CompletionStatus::Success),
    ];
    for (user_data, status) in expected {
        let resp = host.cmd_resp.dequeue_blocking().unwrap().unwrap();
        assert_eq!(resp.user_data, user_data);
        assert_eq!(resp.status, status);
    }
    // Exactly K completions: nothing further is pending.
    assert!(host.cmd_resp.try_dequeue().is_none());

    let stats = nic.stats();
    assert_eq!(stats.cmds_processed, 3);
    assert_eq!(stats.cmd_failures, 4);

    nic.stop();
}

#[test]
fn two_batches_with_separate_doorbells_stay_fifo() {
    let mem = SharedMemory::new(8 * 1024 * 1024).unwrap();
    let (mut nic, mut host) = SoftNic::new(NicConfig::default(), mem).unwrap();
    nic.start().unwrap();

    let rw = AccessFlags::LOCAL_WRITE;
    for batch in 0..2u32 {
        for i in 0..3u32 {
            let user_data = batch * 3 + i;
            host.cmd_req
                .post_update_mr_table(user_data, mr(0x100 + user_data, 1, rw))
                .unwrap();
        }
        host.cmd_req.sync_pointers();
        for i in 0..3u32 {
            let resp = host.cmd_resp.dequeue_blocking().unwrap().unwrap();
            assert_eq!(resp.user_data, batch * 3 + i);
            assert!(resp.status.is_success());
        }
    }

    nic.stop();
}
