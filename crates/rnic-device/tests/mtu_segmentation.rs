//! Path-MTU segmentation on a reliable-connected queue pair, observed both
//! at the egress (frame sizes, transport opcodes) and end-to-end through
//! loopback (destination reassembly).

use core::net::Ipv4Addr;

use rnic_device::rdma;
use rnic_device::{
    AccessFlags, CaptureEgress, CompletionStatus, NicConfig, Pmtu, QpType, ReportKind,
    SendQueueDesc, Sge, SoftNic, UpdateMrTable, UpdatePgt, WorkReqOpcode, HUGEPAGE_SIZE,
    PGT_ENTRY_SIZE,
};
use rnic_mem::SharedMemory;
use rnic_packet::{ethernet::EthernetFrame, ethernet::MacAddr, ipv4::Ipv4Packet, udp::UdpDatagram};

const MEM_SIZE: u64 = 16 * 1024 * 1024;
const STAGING: u64 = 0x10000;
const PAGES: usize = 4;
const KEY: u32 = 0x31;
const SRC_VA: u64 = 0x10_0000;
const DST_VA: u64 = 0x50_0000;

/// Registers one region covering the whole memory, hugepage-identity-mapped.
fn configure(host: &mut rnic_device::HostQueues, mem: &SharedMemory) {
    for i in 0..PAGES {
        mem.write_u64_le(
            STAGING + (i * PGT_ENTRY_SIZE) as u64,
            (i as u64) * HUGEPAGE_SIZE,
        )
        .unwrap();
    }
    host.cmd_req
        .post_update_mr_table(
            0,
            UpdateMrTable {
                base_va: 0,
                length: PAGES as u64 * HUGEPAGE_SIZE,
                key: KEY,
                pd_handle: 1,
                acc_flags: AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
                pgt_offset: 0,
            },
        )
        .unwrap();
    host.cmd_req
        .post_update_pgt(
            1,
            UpdatePgt {
                dma_addr: STAGING,
                dma_length: (PAGES * PGT_ENTRY_SIZE) as u32,
                start_index: 0,
            },
        )
        .unwrap();
    host.cmd_req.sync_pointers();
    for _ in 0..2 {
        assert!(host
            .cmd_resp
            .dequeue_blocking()
            .unwrap()
            .unwrap()
            .status
            .is_success());
    }
}

fn write_wqe(payload_len: u32, pmtu: Pmtu) -> SendQueueDesc {
    SendQueueDesc {
        opcode: WorkReqOpcode::RdmaWriteWithImm,
        is_first: true,
        is_last: true,
        qp_type: QpType::ReliableConnected,
        pmtu,
        psn: 100,
        imm: 9,
        raddr: DST_VA,
        rkey: KEY,
        dqpn: 5,
        dst_ip: Ipv4Addr::new(10, 0, 2, 16),
        dst_mac: MacAddr([0x02, 0, 0, 0, 0, 2]),
        sgl: vec![Sge {
            lkey: KEY,
            len: payload_len,
            laddr: SRC_VA,
        }],
    }
}

#[test]
fn payload_is_cut_into_ceil_len_over_mtu_frames() {
    let mem = SharedMemory::new(MEM_SIZE).unwrap();
    let (mut nic, mut host) = SoftNic::new(NicConfig::default(), mem.clone()).unwrap();
    let capture = CaptureEgress::new();
    nic.set_egress(Box::new(capture.clone()));
    nic.start().unwrap();
    configure(&mut host, &mem);

    // 10_000 bytes at MTU 4096: three frames, the last one short.
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 7) as u8).collect();
    mem.write_from(SRC_VA, &payload).unwrap();

    host.send
        .post_work_request(write_wqe(payload.len() as u32, Pmtu::Mtu4096))
        .unwrap();
    host.send.sync_pointers();

    let report = host.meta_report.dequeue_blocking().unwrap().unwrap();
    assert_eq!(report.kind, ReportKind::SendComplete);
    assert_eq!(report.status, CompletionStatus::Success);
    assert_eq!(report.total_len, 10_000);
    // PSN of the last frame: 100 + (frames - 1).
    assert_eq!(report.psn, 102);

    let frames = capture.frames();
    assert_eq!(frames.len(), 3); // ceil(10_000 / 4096)
    assert_eq!(frames[0].payload().len(), 4096);
    assert_eq!(frames[1].payload().len(), 4096);
    assert_eq!(frames[2].payload().len(), 10_000 - 2 * 4096);

    // Concatenating the frame payloads in order reconstructs the source.
    let reassembled: Vec<u8> = frames.iter().flat_map(|f| f.payload().to_vec()).collect();
    assert_eq!(reassembled, payload);

    // Wire framing: each frame parses as Ethernet/IPv4/UDP with a BTH whose
    // opcode matches its position in the message.
    let expected_opcodes = [
        rdma::RC_RDMA_WRITE_FIRST,
        rdma::RC_RDMA_WRITE_MIDDLE,
        rdma::RC_RDMA_WRITE_LAST_WITH_IMM,
    ];
    for (i, frame) in frames.iter().enumerate() {
        let eth = EthernetFrame::parse(&frame.data).unwrap();
        let ip = Ipv4Packet::parse(eth.payload).unwrap();
        assert!(ip.checksum_valid());
        let udp = UdpDatagram::parse(ip.payload).unwrap();
        assert_eq!(udp.dst_port, rdma::ROCE_UDP_PORT);
        let bth = rdma::Bth::parse(udp.payload).unwrap();
        assert_eq!(bth.opcode, expected_opcodes[i]);
        assert_eq!(bth.psn, 100 + i as u32);
    }

    nic.stop();
}

#[test]
fn exact_multiple_of_mtu_has_no_short_tail() {
    let mem = SharedMemory::new(MEM_SIZE).unwrap();
    let (mut nic, mut host) = SoftNic::new(NicConfig::default(), mem.clone()).unwrap();
    let capture = CaptureEgress::new();
    nic.set_egress(Box::new(capture.clone()));
    nic.start().unwrap();
    configure(&mut host, &mem);

    mem.write_from(SRC_VA, &vec![0xa5u8; 2 * 1024]).unwrap();
    host.send
        .post_work_request(write_wqe(2 * 1024, Pmtu::Mtu1024))
        .unwrap();
    host.send.sync_pointers();
    host.meta_report.dequeue_blocking().unwrap().unwrap();

    let frames = capture.frames();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.payload().len() == 1024));

    nic.stop();
}

#[test]
fn segmented_write_reassembles_at_the_loopback_destination() {
    let mem = SharedMemory::new(MEM_SIZE).unwrap();
    let (mut nic, mut host) = SoftNic::new(NicConfig::default(), mem.clone()).unwrap();
    nic.set_self_loopback(true);
    nic.start().unwrap();
    configure(&mut host, &mem);

    // Destination deliberately crosses the page-2/page-3 boundary.
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    mem.write_from(SRC_VA, &payload).unwrap();
    let dst_va = 3 * HUGEPAGE_SIZE - 2500;

    let mut wqe = write_wqe(payload.len() as u32, Pmtu::Mtu2048);
    wqe.raddr = dst_va;
    host.send.post_work_request(wqe).unwrap();
    host.send.sync_pointers();

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let report = host.meta_report.dequeue_blocking().unwrap().unwrap();
        assert_eq!(report.status, CompletionStatus::Success);
        kinds.push(report.kind);
    }
    assert!(kinds.contains(&ReportKind::SendComplete));
    assert!(kinds.contains(&ReportKind::RecvWrite));

    // Identity mapping makes physical == virtual for the destination too.
    assert_eq!(mem.read_vec(dst_va, payload.len()).unwrap(), payload);
    assert_eq!(nic.stats().frames_tx, 3); // ceil(5000 / 2048)

    nic.stop();
}

#[test]
fn oversized_raw_frame_reports_mtu_violation() {
    let mem = SharedMemory::new(MEM_SIZE).unwrap();
    let (mut nic, mut host) = SoftNic::new(NicConfig::default(), mem.clone()).unwrap();
    nic.set_self_loopback(true);
    nic.start().unwrap();
    configure(&mut host, &mem);

    mem.write_from(SRC_VA, &vec![0u8; 600]).unwrap();
    let mut wqe = write_wqe(600, Pmtu::Mtu512);
    wqe.qp_type = QpType::RawPacket;
    host.send.post_work_request(wqe).unwrap();
    host.send.sync_pointers();

    // The operation aborts: one failed send-side completion, nothing
    // delivered, destination untouched.
    let report = host.meta_report.dequeue_blocking().unwrap().unwrap();
    assert_eq!(report.kind, ReportKind::SendComplete);
    assert_eq!(report.status, CompletionStatus::MtuViolation);
    assert!(host.meta_report.try_dequeue().is_none());
    assert_eq!(mem.read_vec(DST_VA, 600).unwrap(), vec![0u8; 600]);
    assert_eq!(nic.stats().frames_tx, 0);

    nic.stop();
}
