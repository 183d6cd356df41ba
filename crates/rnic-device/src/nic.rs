//! The simulated NIC: state ownership, worker threads and lifecycle.
//!
//! A [`SoftNic`] owns its context (memory regions, page table, queue pairs)
//! and runs three workers: the command worker (single writer of the
//! context), the send worker and the ingress worker (readers). The host
//! talks to the device exclusively through the four ring queues handed out
//! at construction; `start`, `stop` and the loopback toggle are the whole
//! lifecycle surface.
//!
//! `stop` cancels the rings, joins the command and send workers (each
//! finishes the descriptor it already dequeued, so no work request is left
//! half-applied), then sends the ingress worker its stop marker. Because
//! the channel is FIFO, every frame emitted before shutdown is applied
//! before the marker is seen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::cmd::process_command;
use crate::config::NicConfig;
use crate::desc::{
    CmdReqDesc, CmdRespDesc, MetaReportDesc, ReportKind, SendQueueDesc, CMD_OPCODE_INVALID,
};
use crate::engine::execute_work_request;
use crate::error::DeviceError;
use crate::fabric::{DiscardEgress, FrameTx, IngressHandle, IngressMsg, LoopbackFabric};
use crate::host::{CommandReqQueue, CommandRespQueue, HostQueues, MetaReportQueue, SendQueue};
use crate::ingress::{process_ingress_frame, IngressOutcome};
use crate::ring::{self, Consumer, Producer, RingCtrl};
use crate::state::NicState;
use crate::types::CompletionStatus;
use rnic_mem::SharedMemory;

#[derive(Debug, Default)]
struct StatsInner {
    cmds_processed: AtomicU64,
    cmd_failures: AtomicU64,
    wqes_processed: AtomicU64,
    wqe_failures: AtomicU64,
    frames_tx: AtomicU64,
    frames_rx: AtomicU64,
    rx_malformed: AtomicU64,
    writes_applied: AtomicU64,
}

/// Point-in-time counters of one NIC instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NicStats {
    pub cmds_processed: u64,
    pub cmd_failures: u64,
    pub wqes_processed: u64,
    pub wqe_failures: u64,
    pub frames_tx: u64,
    pub frames_rx: u64,
    pub rx_malformed: u64,
    pub writes_applied: u64,
}

pub struct SoftNic {
    cfg: NicConfig,
    mem: SharedMemory,
    state: Arc<RwLock<NicState>>,
    stats: Arc<StatsInner>,
    ring_ctrls: Vec<Arc<RingCtrl>>,
    ingress_tx: mpsc::Sender<IngressMsg>,

    // Device-side ring endpoints, consumed when the workers spawn.
    cmd_rx: Option<Consumer<CmdReqDesc>>,
    resp_tx: Option<Producer<CmdRespDesc>>,
    send_rx: Option<Consumer<SendQueueDesc>>,
    report_tx: Option<Producer<MetaReportDesc>>,
    ingress_rx: Option<mpsc::Receiver<IngressMsg>>,
    egress: Option<Box<dyn FrameTx>>,

    cmd_worker: Option<JoinHandle<()>>,
    send_worker: Option<JoinHandle<()>>,
    ingress_worker: Option<JoinHandle<()>>,
}

impl SoftNic {
    /// Builds a NIC over `mem` and returns it together with the host-side
    /// endpoints of its four queues. Layout problems (rings overlapping or
    /// falling outside `mem`) are fatal here; nothing after `start()` is.
    pub fn new(cfg: NicConfig, mem: SharedMemory) -> Result<(Self, HostQueues), DeviceError> {
        cfg.validate(mem.size())?;

        let (cmd_req_tx, cmd_req_rx, cmd_req_ctrl) =
            ring::channel::<CmdReqDesc>(mem.clone(), cfg.cmd_req_base, cfg.cmd_req_capacity)?;
        let (cmd_resp_tx, cmd_resp_rx, cmd_resp_ctrl) =
            ring::channel::<CmdRespDesc>(mem.clone(), cfg.cmd_resp_base, cfg.cmd_resp_capacity)?;
        let (send_tx, send_rx, send_ctrl) =
            ring::channel::<SendQueueDesc>(mem.clone(), cfg.send_base, cfg.send_capacity)?;
        let (report_tx, report_rx, report_ctrl) = ring::channel::<MetaReportDesc>(
            mem.clone(),
            cfg.meta_report_base,
            cfg.meta_report_capacity,
        )?;

        let (ingress_tx, ingress_rx) = mpsc::channel();
        let state = Arc::new(RwLock::new(NicState::new(cfg.pgt_capacity as usize)));

        let nic = Self {
            cfg,
            mem,
            state,
            stats: Arc::new(StatsInner::default()),
            ring_ctrls: vec![cmd_req_ctrl, cmd_resp_ctrl, send_ctrl, report_ctrl],
            ingress_tx,
            cmd_rx: Some(cmd_req_rx),
            resp_tx: Some(cmd_resp_tx),
            send_rx: Some(send_rx),
            report_tx: Some(report_tx),
            ingress_rx: Some(ingress_rx),
            egress: None,
            cmd_worker: None,
            send_worker: None,
            ingress_worker: None,
        };
        let host = HostQueues {
            cmd_req: CommandReqQueue { inner: cmd_req_tx },
            cmd_resp: CommandRespQueue { inner: cmd_resp_rx },
            send: SendQueue { inner: send_tx },
            meta_report: MetaReportQueue { inner: report_rx },
        };
        Ok((nic, host))
    }

    /// Routes emitted frames back into this NIC's own ingress path.
    /// Takes effect at `start()` and overrides any attached egress.
    pub fn set_self_loopback(&mut self, on: bool) {
        self.cfg.self_loopback = on;
    }

    /// Attaches the egress sink frames are handed to (a wire, a peer NIC's
    /// [`IngressHandle`], a capture). Ignored while self-loopback is on.
    pub fn set_egress(&mut self, egress: Box<dyn FrameTx>) {
        self.egress = Some(egress);
    }

    /// Handle a peer (or test) can use to deliver frames into this NIC.
    pub fn ingress_handle(&self) -> IngressHandle {
        IngressHandle {
            tx: self.ingress_tx.clone(),
        }
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.mem
    }

    pub fn config(&self) -> &NicConfig {
        &self.cfg
    }

    pub fn is_running(&self) -> bool {
        self.cmd_worker.is_some()
    }

    pub fn stats(&self) -> NicStats {
        NicStats {
            cmds_processed: self.stats.cmds_processed.load(Ordering::Relaxed),
            cmd_failures: self.stats.cmd_failures.load(Ordering::Relaxed),
            wqes_processed: self.stats.wqes_processed.load(Ordering::Relaxed),
            wqe_failures: self.stats.wqe_failures.load(Ordering::Relaxed),
            frames_tx: self.stats.frames_tx.load(Ordering::Relaxed),
            frames_rx: self.stats.frames_rx.load(Ordering::Relaxed),
            rx_malformed: self.stats.rx_malformed.load(Ordering::Relaxed),
            writes_applied: self.stats.writes_applied.load(Ordering::Relaxed),
        }
    }

    /// Spawns the worker threads. A NIC starts at most once.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        let (cmd_rx, resp_tx, send_rx, report_tx, ingress_rx) = match (
            self.cmd_rx.take(),
            self.resp_tx.take(),
            self.send_rx.take(),
            self.report_tx.take(),
            self.ingress_rx.take(),
        ) {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => return Err(DeviceError::AlreadyStarted),
        };
        let report_tx = Arc::new(Mutex::new(report_tx));

        let egress: Box<dyn FrameTx> = if self.cfg.self_loopback {
            Box::new(LoopbackFabric::new(self.ingress_handle()))
        } else {
            self.egress
                .take()
                .unwrap_or_else(|| Box::<DiscardEgress>::default())
        };

        let cmd = {
            let state = Arc::clone(&self.state);
            let mem = self.mem.clone();
            let stats = Arc::clone(&self.stats);
            std::thread::Builder::new()
                .name("rnic-cmd".into())
                .spawn(move || cmd_worker_loop(cmd_rx, resp_tx, state, mem, stats))?
        };
        let send = {
            let state = Arc::clone(&self.state);
            let mem = self.mem.clone();
            let stats = Arc::clone(&self.stats);
            let report_tx = Arc::clone(&report_tx);
            let cfg = self.cfg.clone();
            std::thread::Builder::new()
                .name("rnic-send".into())
                .spawn(move || send_worker_loop(send_rx, report_tx, egress, state, mem, cfg, stats))?
        };
        let ingress = {
            let state = Arc::clone(&self.state);
            let mem = self.mem.clone();
            let stats = Arc::clone(&self.stats);
            std::thread::Builder::new()
                .name("rnic-ingress".into())
                .spawn(move || ingress_worker_loop(ingress_rx, report_tx, state, mem, stats))?
        };

        self.cmd_worker = Some(cmd);
        self.send_worker = Some(send);
        self.ingress_worker = Some(ingress);
        debug!(loopback = self.cfg.self_loopback, "device started");
        Ok(())
    }

    /// Stops the workers and releases every blocked queue operation.
    pub fn stop(&mut self) {
        for ctrl in &self.ring_ctrls {
            ctrl.stop();
        }
        // Join the producers of ingress traffic first so their final frames
        // are already queued when the stop marker goes in.
        if let Some(worker) = self.cmd_worker.take() {
            let _ = worker.join();
        }
        if let Some(worker) = self.send_worker.take() {
            let _ = worker.join();
        }
        let _ = self.ingress_tx.send(IngressMsg::Stop);
        if let Some(worker) = self.ingress_worker.take() {
            let _ = worker.join();
        }
        debug!("device stopped");
    }
}

impl Drop for SoftNic {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn cmd_worker_loop(
    mut cmd_rx: Consumer<CmdReqDesc>,
    mut resp_tx: Producer<CmdRespDesc>,
    state: Arc<RwLock<NicState>>,
    mem: SharedMemory,
    stats: Arc<StatsInner>,
) {
    while let Some(item) = cmd_rx.dequeue_blocking() {
        let resp = match item {
            Ok(desc) => {
                let mut state = state.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                process_command(&mut state, &mem, &desc)
            }
            Err(err) => {
                warn!(?err, "malformed command slot");
                CmdRespDesc {
                    opcode: CMD_OPCODE_INVALID,
                    status: CompletionStatus::InvalidDescriptor,
                    user_data: 0,
                }
            }
        };
        if resp.status.is_success() {
            stats.cmds_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.cmd_failures.fetch_add(1, Ordering::Relaxed);
        }
        if resp_tx.enqueue_blocking(&resp).is_err() {
            break;
        }
    }
    debug!("command worker exited");
}

fn send_worker_loop(
    mut send_rx: Consumer<SendQueueDesc>,
    report_tx: Arc<Mutex<Producer<MetaReportDesc>>>,
    mut egress: Box<dyn FrameTx>,
    state: Arc<RwLock<NicState>>,
    mem: SharedMemory,
    cfg: NicConfig,
    stats: Arc<StatsInner>,
) {
    while let Some(item) = send_rx.dequeue_blocking() {
        let report = match item {
            Ok(wqe) => {
                let result = {
                    let state = state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                    execute_work_request(&state, &mem, &cfg, &wqe)
                };
                match result {
                    Ok(frames) => {
                        let last = frames.last().expect("engine emits at least one frame");
                        let (last_psn, total_len) = (last.meta.psn, last.meta.total_len);
                        for frame in frames {
                            stats.frames_tx.fetch_add(1, Ordering::Relaxed);
                            egress.transmit(frame);
                        }
                        stats.wqes_processed.fetch_add(1, Ordering::Relaxed);
                        send_report(&wqe, CompletionStatus::Success, last_psn, total_len)
                    }
                    Err(err) => {
                        warn!(?err, "work request failed");
                        stats.wqe_failures.fetch_add(1, Ordering::Relaxed);
                        send_report(&wqe, err.status(), wqe.psn, 0)
                    }
                }
            }
            Err(err) => {
                warn!(?err, "malformed work request slot");
                stats.wqe_failures.fetch_add(1, Ordering::Relaxed);
                MetaReportDesc {
                    kind: ReportKind::SendComplete,
                    status: CompletionStatus::InvalidDescriptor,
                    dqpn: 0,
                    psn: 0,
                    imm: 0,
                    raddr: 0,
                    total_len: 0,
                }
            }
        };
        let pushed = report_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .enqueue_blocking(&report);
        if pushed.is_err() {
            break;
        }
    }
    debug!("send worker exited");
}

fn send_report(
    wqe: &SendQueueDesc,
    status: CompletionStatus,
    psn: u32,
    total_len: u32,
) -> MetaReportDesc {
    MetaReportDesc {
        kind: ReportKind::SendComplete,
        status,
        dqpn: wqe.dqpn,
        psn,
        imm: wqe.imm,
        raddr: wqe.raddr,
        total_len,
    }
}

fn ingress_worker_loop(
    ingress_rx: mpsc::Receiver<IngressMsg>,
    report_tx: Arc<Mutex<Producer<MetaReportDesc>>>,
    state: Arc<RwLock<NicState>>,
    mem: SharedMemory,
    stats: Arc<StatsInner>,
) {
    while let Ok(msg) = ingress_rx.recv() {
        let frame = match msg {
            IngressMsg::Stop => break,
            IngressMsg::Frame(frame) => frame,
        };
        stats.frames_rx.fetch_add(1, Ordering::Relaxed);
        let outcome = {
            let state = state.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            process_ingress_frame(&state, &mem, &frame)
        };
        match outcome {
            IngressOutcome::Applied => {
                stats.writes_applied.fetch_add(1, Ordering::Relaxed);
            }
            IngressOutcome::Report(report) => {
                if report.status.is_success() {
                    stats.writes_applied.fetch_add(1, Ordering::Relaxed);
                }
                let pushed = report_tx
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .enqueue_blocking(&report);
                if pushed.is_err() {
                    break;
                }
            }
            IngressOutcome::Malformed => {
                stats.rx_malformed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("ingress worker exited");
}
