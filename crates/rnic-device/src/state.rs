//! Mutable NIC context: registered regions, the page table and queue pairs.
//!
//! The state is an explicit object owned by one [`crate::nic::SoftNic`]
//! instance (never ambient), so several NICs can coexist in one process for
//! two-sided tests. The command worker is the single writer; the data-path
//! workers read through the same `RwLock`.

use std::collections::{HashMap, HashSet};

use crate::pgt::{MemoryRegion, PageTable};
use crate::types::{AccessFlags, Pmtu, QpType};

/// The addressable execution context for work requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePairContext {
    pub qpn: u32,
    pub pd_handle: u32,
    pub qp_type: QpType,
    pub acc_flags: AccessFlags,
    pub pmtu: Pmtu,
}

#[derive(Debug)]
pub struct NicState {
    /// Registered regions, keyed by protection key.
    mr_table: HashMap<u32, MemoryRegion>,
    pub(crate) pgt: PageTable,
    qp_table: HashMap<u32, QueuePairContext>,
    /// Protection domains are established implicitly by the first region
    /// registered under a handle; queue pairs must reference one of these.
    pd_handles: HashSet<u32>,
}

impl NicState {
    pub fn new(pgt_capacity: usize) -> Self {
        Self {
            mr_table: HashMap::new(),
            pgt: PageTable::new(pgt_capacity),
            qp_table: HashMap::new(),
            pd_handles: HashSet::new(),
        }
    }

    pub fn region_by_key(&self, key: u32) -> Option<&MemoryRegion> {
        self.mr_table.get(&key)
    }

    pub fn queue_pair(&self, qpn: u32) -> Option<&QueuePairContext> {
        self.qp_table.get(&qpn)
    }

    pub fn knows_pd(&self, pd_handle: u32) -> bool {
        self.pd_handles.contains(&pd_handle)
    }

    pub(crate) fn has_region_key(&self, key: u32) -> bool {
        self.mr_table.contains_key(&key)
    }

    pub(crate) fn insert_region(&mut self, region: MemoryRegion) {
        self.pd_handles.insert(region.pd_handle);
        self.mr_table.insert(region.key, region);
    }

    pub(crate) fn insert_queue_pair(&mut self, qp: QueuePairContext) {
        self.qp_table.insert(qp.qpn, qp);
    }
}
