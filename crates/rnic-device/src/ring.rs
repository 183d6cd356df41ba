//! Bounded descriptor ring over shared host memory.
//!
//! Each queue is a fixed-capacity array of fixed-size descriptor slots at
//! `base + (index % capacity) * SIZE` in the shared region, plus a control
//! block holding the producer (head) and consumer (tail) indices. Both
//! indices are free-running `u32`s compared by wrapping difference, so a
//! power-of-two capacity makes wrap-around cheap and unambiguous.
//!
//! Enqueued slots are not observable until the producer publishes its index
//! with [`Producer::sync_pointers`], the software equivalent of a doorbell
//! register write. The consumer side blocks (with cancellation) until the
//! published head moves past its tail.
//!
//! Handles are single-owner: `&mut self` on `enqueue`/`dequeue` enforces one
//! producer and one consumer per ring; wrap a handle in a `Mutex` to share.

use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use rnic_mem::SharedMemory;

use crate::desc::RingDescriptor;
use crate::error::{DeviceError, RingError};

#[derive(Debug)]
struct RingState {
    /// Producer index, as published by the last doorbell.
    head: u32,
    /// Consumer index. Never passes `head`.
    tail: u32,
    stopped: bool,
}

/// Shared control block of one ring.
#[derive(Debug)]
pub struct RingCtrl {
    state: Mutex<RingState>,
    cond: Condvar,
    capacity: u32,
}

impl RingCtrl {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels every blocked producer/consumer. Entries already published
    /// but not yet consumed stay in memory; consumers return `None` instead
    /// of draining them, mirroring a hardware queue disable.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.cond.notify_all();
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Creates a ring of `capacity` slots of `D` at `base`, returning the two
/// endpoint handles and the shared control block.
pub fn channel<D: RingDescriptor>(
    mem: SharedMemory,
    base: u64,
    capacity: u32,
) -> Result<(Producer<D>, Consumer<D>, Arc<RingCtrl>), DeviceError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(DeviceError::BadRingCapacity(capacity));
    }
    let len = capacity as u64 * D::SIZE as u64;
    let end = base
        .checked_add(len)
        .ok_or(DeviceError::QueueRegionOutOfRange {
            base,
            len,
            size: mem.size(),
        })?;
    if end > mem.size() {
        return Err(DeviceError::QueueRegionOutOfRange {
            base,
            len,
            size: mem.size(),
        });
    }

    let ctrl = Arc::new(RingCtrl {
        state: Mutex::new(RingState {
            head: 0,
            tail: 0,
            stopped: false,
        }),
        cond: Condvar::new(),
        capacity,
    });
    let producer = Producer {
        mem: mem.clone(),
        base,
        ctrl: Arc::clone(&ctrl),
        pending: 0,
        _marker: PhantomData,
    };
    let consumer = Consumer {
        mem,
        base,
        ctrl: Arc::clone(&ctrl),
        _marker: PhantomData,
    };
    Ok((producer, consumer, ctrl))
}

/// Producing endpoint of a ring.
#[derive(Debug)]
pub struct Producer<D: RingDescriptor> {
    mem: SharedMemory,
    base: u64,
    ctrl: Arc<RingCtrl>,
    /// Local producer index; runs ahead of the published head between
    /// `enqueue` calls and the next doorbell.
    pending: u32,
    _marker: PhantomData<D>,
}

impl<D: RingDescriptor> Producer<D> {
    fn slot_addr(&self, index: u32) -> u64 {
        self.base + u64::from(index % self.ctrl.capacity) * D::SIZE as u64
    }

    fn write_slot(&self, index: u32, desc: &D) -> Result<(), RingError> {
        let mut buf = vec![0u8; D::SIZE];
        desc.encode(&mut buf);
        self.mem.write_from(self.slot_addr(index), &buf)?;
        Ok(())
    }

    /// Writes `desc` into the next slot without publishing it. Call
    /// [`Self::sync_pointers`] after a batch to make the entries visible.
    pub fn enqueue(&mut self, desc: &D) -> Result<(), RingError> {
        let tail = self.ctrl.lock().tail;
        if self.pending.wrapping_sub(tail) >= self.ctrl.capacity {
            return Err(RingError::Full);
        }
        self.write_slot(self.pending, desc)?;
        self.pending = self.pending.wrapping_add(1);
        Ok(())
    }

    /// The doorbell: publishes every slot written so far and wakes the
    /// consumer.
    pub fn sync_pointers(&self) {
        let mut state = self.ctrl.lock();
        state.head = self.pending;
        self.ctrl.cond.notify_all();
    }

    /// Enqueue-and-publish that waits for a free slot instead of failing.
    ///
    /// Used on the device side of host-bound queues: a completion must not
    /// be dropped just because the host is slow to drain. If there is room,
    /// the entry goes out even while the ring is stopping, so in-flight work
    /// still completes; `Stopped` is only returned when the ring is both
    /// full and stopped.
    pub fn enqueue_blocking(&mut self, desc: &D) -> Result<(), RingError> {
        {
            let mut state = self.ctrl.lock();
            loop {
                if self.pending.wrapping_sub(state.tail) < self.ctrl.capacity {
                    break;
                }
                if state.stopped {
                    return Err(RingError::Stopped);
                }
                state = self
                    .ctrl
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        }
        self.write_slot(self.pending, desc)?;
        self.pending = self.pending.wrapping_add(1);
        self.sync_pointers();
        Ok(())
    }
}

/// Consuming endpoint of a ring.
#[derive(Debug)]
pub struct Consumer<D: RingDescriptor> {
    mem: SharedMemory,
    base: u64,
    ctrl: Arc<RingCtrl>,
    _marker: PhantomData<D>,
}

impl<D: RingDescriptor> Consumer<D> {
    fn slot_addr(&self, index: u32) -> u64 {
        self.base + u64::from(index % self.ctrl.capacity) * D::SIZE as u64
    }

    /// Reads and consumes the slot at `index`, then advances the tail.
    fn take_slot(&mut self, index: u32) -> Result<D, RingError> {
        let mut buf = vec![0u8; D::SIZE];
        let read = self.mem.read_into(self.slot_addr(index), &mut buf);
        let decoded = read
            .map_err(RingError::from)
            .and_then(|()| D::decode(&buf).map_err(RingError::from));

        // The slot is consumed even if it was malformed, so one bad entry
        // cannot wedge the queue.
        let mut state = self.ctrl.lock();
        state.tail = state.tail.wrapping_add(1);
        self.ctrl.cond.notify_all();
        drop(state);

        decoded
    }

    /// Blocks until a published entry is available and consumes it.
    ///
    /// Returns `None` once the ring has been stopped; a malformed slot is
    /// `Some(Err(_))` and has been consumed.
    pub fn dequeue_blocking(&mut self) -> Option<Result<D, RingError>> {
        let index = {
            let mut state = self.ctrl.lock();
            loop {
                if state.stopped {
                    return None;
                }
                if state.tail != state.head {
                    break;
                }
                state = self
                    .ctrl
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            state.tail
        };
        Some(self.take_slot(index))
    }

    /// Non-blocking variant: `None` when no published entry is available.
    pub fn try_dequeue(&mut self) -> Option<Result<D, RingError>> {
        let index = {
            let state = self.ctrl.lock();
            if state.tail == state.head {
                return None;
            }
            state.tail
        };
        Some(self.take_slot(index))
    }
}
