use std::cell::UnsafeCell;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::buffer::AlignedBuffer;
use crate::sector::SECTOR_SIZE;

pub const QUEUE_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Full,
    Dead,
    Eof,
}

/// Image storage failed underneath the worker. Sticky for the session.
#[derive(Debug, Clone, Error)]
#[error("image storage failed near sector {sector}: {detail}")]
pub struct StorageFault {
    pub sector: u64,
    pub detail: String,
}

#[derive(Clone, Copy)]
struct SlotMeta {
    state: SlotState,
    first_sector: u64,
    count: usize,
}

struct Shared {
    slots: Box<[SlotMeta]>,
    produce_idx: usize,
    consume_idx: usize,
    fault: Option<StorageFault>,
    crc_errors: u64,
    dead_written: u64,
    producer_out: bool,
    consumer_out: bool,
}

struct Payload(UnsafeCell<AlignedBuffer>);

// Payloads are handed between the two threads through slot ownership: only
// the side currently granted the slot touches its payload.
unsafe impl Sync for Payload {}

/// Fixed ring of sector buffers between the reading and persisting threads.
/// Slots move Empty -> Full|Dead -> Empty in circular order, which keeps
/// image writes sequential and bounds how far the reader can run ahead.
pub struct HandoffQueue {
    shared: Mutex<Shared>,
    can_produce: Condvar,
    can_consume: Condvar,
    payloads: Box<[Payload]>,
    depth: usize,
}

impl HandoffQueue {
    pub fn new(depth: usize, buffer_sectors: usize) -> Self {
        assert!(depth >= 2, "handoff queue needs at least two slots");
        let slots = vec![
            SlotMeta {
                state: SlotState::Empty,
                first_sector: 0,
                count: 0,
            };
            depth
        ]
        .into_boxed_slice();
        let payloads = (0..depth)
            .map(|_| Payload(UnsafeCell::new(AlignedBuffer::new(buffer_sectors))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        HandoffQueue {
            shared: Mutex::new(Shared {
                slots,
                produce_idx: 0,
                consume_idx: 0,
                fault: None,
                crc_errors: 0,
                dead_written: 0,
                producer_out: false,
                consumer_out: false,
            }),
            can_produce: Condvar::new(),
            can_consume: Condvar::new(),
            payloads,
            depth,
        }
    }

    /// Blocks until the next slot in ring order is free. Returns the sticky
    /// fault instead once the worker has failed, so the producer never waits
    /// on a queue that will no longer drain.
    pub fn acquire_for_write(&self) -> Result<WriteSlot<'_>, StorageFault> {
        let mut shared = self.shared.lock();
        debug_assert!(!shared.producer_out, "producer already holds a slot");
        loop {
            if let Some(fault) = &shared.fault {
                return Err(fault.clone());
            }
            let idx = shared.produce_idx;
            if shared.slots[idx].state == SlotState::Empty {
                shared.producer_out = true;
                return Ok(WriteSlot { queue: self, idx });
            }
            self.can_produce.wait(&mut shared);
        }
    }

    /// Blocks until the next slot is published. An Eof slot stays in place,
    /// every later call observes it again.
    pub fn acquire_for_read(&self) -> ReadSlot<'_> {
        let mut shared = self.shared.lock();
        debug_assert!(!shared.consumer_out, "consumer already holds a slot");
        loop {
            let idx = shared.consume_idx;
            let slot = shared.slots[idx];
            if slot.state != SlotState::Empty {
                if slot.state != SlotState::Eof {
                    shared.consumer_out = true;
                }
                return ReadSlot {
                    queue: self,
                    idx,
                    state: slot.state,
                    first_sector: slot.first_sector,
                    count: slot.count,
                };
            }
            self.can_consume.wait(&mut shared);
        }
    }

    /// Enqueues the terminal marker behind everything already published.
    /// After a fault there is nothing left to drain, so it returns at once.
    pub fn send_eof(&self) {
        let mut shared = self.shared.lock();
        loop {
            if shared.fault.is_some() {
                return;
            }
            let idx = shared.produce_idx;
            if shared.slots[idx].state == SlotState::Empty {
                shared.slots[idx].state = SlotState::Eof;
                shared.produce_idx = (idx + 1) % self.depth;
                self.can_consume.notify_one();
                return;
            }
            self.can_produce.wait(&mut shared);
        }
    }

    /// First fault wins. Wakes both sides so nobody stays blocked.
    pub fn fail(&self, fault: StorageFault) {
        let mut shared = self.shared.lock();
        if shared.fault.is_none() {
            shared.fault = Some(fault);
        }
        self.can_produce.notify_all();
        self.can_consume.notify_all();
    }

    pub fn fault(&self) -> Option<StorageFault> {
        self.shared.lock().fault.clone()
    }

    pub fn add_crc_errors(&self, n: u64) {
        self.shared.lock().crc_errors += n;
    }

    pub fn crc_errors(&self) -> u64 {
        self.shared.lock().crc_errors
    }

    pub fn add_dead_written(&self, n: u64) {
        self.shared.lock().dead_written += n;
    }

    pub fn dead_written(&self) -> u64 {
        self.shared.lock().dead_written
    }
}

/// Exclusive grant on one empty slot. Ends in `publish` or `abandon`.
pub struct WriteSlot<'a> {
    queue: &'a HandoffQueue,
    idx: usize,
}

impl WriteSlot<'_> {
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // the grant guarantees nobody else touches this payload
        unsafe { (*self.queue.payloads[self.idx].0.get()).as_mut_slice() }
    }

    pub fn publish(self, first_sector: u64, count: usize, state: SlotState) {
        debug_assert!(matches!(state, SlotState::Full | SlotState::Dead));
        debug_assert!(count > 0 && count * SECTOR_SIZE <= self.payload_len());
        let mut shared = self.queue.shared.lock();
        shared.slots[self.idx] = SlotMeta {
            state,
            first_sector,
            count,
        };
        shared.produce_idx = (self.idx + 1) % self.queue.depth;
        shared.producer_out = false;
        self.queue.can_consume.notify_one();
    }

    pub fn abandon(self) {
        let mut shared = self.queue.shared.lock();
        shared.producer_out = false;
    }

    fn payload_len(&self) -> usize {
        unsafe { (*self.queue.payloads[self.idx].0.get()).len() }
    }
}

/// Grant on one published slot. Eof grants are terminal and never released.
pub struct ReadSlot<'a> {
    queue: &'a HandoffQueue,
    idx: usize,
    state: SlotState,
    first_sector: u64,
    count: usize,
}

impl ReadSlot<'_> {
    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn first_sector(&self) -> u64 {
        self.first_sector
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn payload(&self) -> &[u8] {
        unsafe { &(*self.queue.payloads[self.idx].0.get()).as_slice()[..self.count * SECTOR_SIZE] }
    }

    pub fn release(self) {
        debug_assert!(self.state != SlotState::Eof);
        let mut shared = self.queue.shared.lock();
        shared.slots[self.idx] = SlotMeta {
            state: SlotState::Empty,
            first_sector: 0,
            count: 0,
        };
        shared.consume_idx = (self.idx + 1) % self.queue.depth;
        shared.consumer_out = false;
        self.queue.can_produce.notify_one();
    }
}
