// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-worker lcore state (§3 "Lcore Context"). Every field here is
// written by exactly one owner: the scheduler under the documented
// publish barriers, or the worker's own forwarding/service loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::{InterfaceIndex, InterfaceKind, Packet, QueueId};
use crate::error::{Result, VrouterError};

/// A bounded inter-lcore packet hand-off queue: the "software ring" of
/// §3/§4.5/§4.6. Unlike the byte-oriented [`crate::ring::Ring`] used for
/// the netlink transport, this one carries already-parsed packets between
/// two lcore workers in the same process, so a short critical section is
/// an acceptable trade for the much simpler ownership story.
pub struct SoftwareRing {
    queue: Mutex<VecDeque<Packet>>,
    capacity: usize,
}

impl SoftwareRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, packet: Packet) -> Result<()> {
        let mut q = self.queue.lock().unwrap();
        if q.len() >= self.capacity {
            return Err(VrouterError::RingFull);
        }
        q.push_back(packet);
        Ok(())
    }

    /// Single-consumer burst dequeue (§4.6 step 3).
    pub fn drain_burst(&self, budget: usize) -> Vec<Packet> {
        let mut q = self.queue.lock().unwrap();
        let take = budget.min(q.len());
        q.drain(..take).collect()
    }
}

/// One `rings_to_push[]` entry: a source software ring plus where its
/// packets go. `source` is `None` once the detach protocol (§4.5) has
/// nulled it; the owning worker's forwarding loop skips such entries
/// without dequeuing.
pub struct RingsToPushEntry {
    source: Mutex<Option<Arc<SoftwareRing>>>,
    pub dest_tx: Option<QueueId>,
    pub source_interface: InterfaceIndex,
}

impl RingsToPushEntry {
    pub fn new(source: Arc<SoftwareRing>, dest_tx: Option<QueueId>, source_interface: InterfaceIndex) -> Self {
        Self {
            source: Mutex::new(Some(source)),
            dest_tx,
            source_interface,
        }
    }

    pub fn source(&self) -> Option<Arc<SoftwareRing>> {
        self.source.lock().unwrap().clone()
    }

    /// Null the source under a write barrier (§4.5 detach protocol step 1).
    /// The `Mutex` here stands in for the write barrier the source
    /// implementation uses: the store and its visibility to the owning
    /// worker's next drain pass are ordered by the same lock acquire the
    /// drain path takes in `source()`.
    pub fn detach(&self) {
        *self.source.lock().unwrap() = None;
    }

    pub fn is_detached(&self) -> bool {
        self.source.lock().unwrap().is_none()
    }
}

#[derive(Clone)]
pub struct TxBinding {
    pub interface_index: InterfaceIndex,
    pub queue: QueueId,
}

/// One `rx_queues[]` entry: the hardware queue itself, the interface's
/// kind, and — for a virtual interface — the software ring its bursts are
/// forwarded into instead of going straight to the routing engine (§4.6
/// step 2).
#[derive(Clone)]
pub struct RxBinding {
    pub queue: QueueId,
    pub kind: InterfaceKind,
    pub forward_ring: Option<Arc<SoftwareRing>>,
}

pub struct LcoreContext {
    pub id: usize,
    rx_bindings: Mutex<Vec<RxBinding>>,
    rx_queues_mask: AtomicU64,
    tx_queues: Mutex<Vec<TxBinding>>,
    rings_to_push: Mutex<Vec<Arc<RingsToPushEntry>>>,
    rings_to_push_count: AtomicU64,
    stop_flag: AtomicBool,
    is_control_worker: AtomicBool,
    is_packet_worker: AtomicBool,
    distinct_interfaces: Mutex<std::collections::HashSet<InterfaceIndex>>,
}

impl LcoreContext {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            rx_bindings: Mutex::new(Vec::new()),
            rx_queues_mask: AtomicU64::new(0),
            tx_queues: Mutex::new(Vec::new()),
            rings_to_push: Mutex::new(Vec::new()),
            rings_to_push_count: AtomicU64::new(0),
            stop_flag: AtomicBool::new(false),
            is_control_worker: AtomicBool::new(false),
            is_packet_worker: AtomicBool::new(false),
            distinct_interfaces: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn rx_queue_count(&self) -> usize {
        self.rx_bindings.lock().unwrap().len()
    }

    pub fn rings_to_push_count(&self) -> usize {
        self.rings_to_push_count.load(Ordering::Acquire) as usize
    }

    fn is_reserved(&self) -> bool {
        self.is_control_worker.load(Ordering::Acquire) || self.is_packet_worker.load(Ordering::Acquire)
    }

    /// Load metric for least-loaded selection (§4.5). A reserved service
    /// worker (control, packet, or both) reports `usize::MAX`, standing in
    /// for "seeding its RX count to the maximum" (§4.7) without corrupting
    /// the real RX queue bookkeeping.
    pub fn effective_load(&self) -> usize {
        if self.is_reserved() {
            usize::MAX
        } else {
            self.rx_queue_count() + self.rings_to_push_count()
        }
    }

    pub fn is_eligible_for_scheduling(&self) -> bool {
        !self.is_reserved()
    }

    /// Mark this worker fully reserved (both control and packet roles),
    /// e.g. the minimum-worker-count configuration where both collocate.
    pub fn mark_service_worker(&self) {
        self.is_control_worker.store(true, Ordering::Release);
        self.is_packet_worker.store(true, Ordering::Release);
    }

    pub fn mark_control_worker(&self) {
        self.is_control_worker.store(true, Ordering::Release);
    }

    pub fn mark_packet_worker(&self) {
        self.is_packet_worker.store(true, Ordering::Release);
    }

    pub fn is_control_worker(&self) -> bool {
        self.is_control_worker.load(Ordering::Acquire)
    }

    pub fn is_packet_worker(&self) -> bool {
        self.is_packet_worker.load(Ordering::Acquire)
    }

    pub fn distinct_interface_count(&self) -> usize {
        self.distinct_interfaces.lock().unwrap().len()
    }

    /// Publish a new hardware RX queue as a plain, physical-interface
    /// binding. Convenience wrapper around [`LcoreContext::add_rx_binding`]
    /// for callers that don't need a virtual-interface forward ring.
    pub fn add_rx_queue(&self, queue: QueueId) {
        self.add_rx_binding(RxBinding {
            queue,
            kind: InterfaceKind::Physical,
            forward_ring: None,
        });
    }

    /// Publish a new RX binding: push the record, then set its bit with a
    /// write barrier so a forwarding worker never observes the bit before
    /// the queue record it names (§3 lifecycle, §4.5 RX assignment).
    pub fn add_rx_binding(&self, binding: RxBinding) {
        self.distinct_interfaces.lock().unwrap().insert(binding.queue.interface_index);
        let mut bindings = self.rx_bindings.lock().unwrap();
        let bit = bindings.len();
        bindings.push(binding);
        drop(bindings);
        self.rx_queues_mask.fetch_or(1 << bit, Ordering::Release);
    }

    pub fn rx_queues_snapshot(&self) -> (Vec<RxBinding>, u64) {
        let bindings = self.rx_bindings.lock().unwrap();
        (bindings.clone(), self.rx_queues_mask.load(Ordering::Acquire))
    }

    /// Insert keeping the TX list in ascending interface-index order, for
    /// flush cache locality (§4.5).
    pub fn add_tx_binding(&self, binding: TxBinding) {
        self.distinct_interfaces.lock().unwrap().insert(binding.interface_index);
        let mut list = self.tx_queues.lock().unwrap();
        let pos = list
            .iter()
            .position(|b| b.interface_index > binding.interface_index)
            .unwrap_or(list.len());
        list.insert(pos, binding);
    }

    pub fn tx_queues_snapshot(&self) -> Vec<TxBinding> {
        self.tx_queues.lock().unwrap().clone()
    }

    pub fn add_rings_to_push(&self, entry: Arc<RingsToPushEntry>) {
        self.distinct_interfaces.lock().unwrap().insert(entry.source_interface);
        self.rings_to_push.lock().unwrap().push(entry);
        self.rings_to_push_count.fetch_add(1, Ordering::Release);
    }

    pub fn rings_to_push_snapshot(&self) -> Vec<Arc<RingsToPushEntry>> {
        self.rings_to_push.lock().unwrap().clone()
    }

    /// Step 2 of the detach protocol (§4.5): decrement the count once the
    /// null source is visible. Step 3 (reclaim) happens in the scheduler,
    /// gated on a quiescent interval.
    pub fn decrement_rings_to_push_count(&self) {
        self.rings_to_push_count.fetch_sub(1, Ordering::Release);
    }

    /// Drop every `rings_to_push` entry whose source has been nulled and
    /// whose owning worker has since declared quiescence. Called by the
    /// scheduler's detach reclaim step, never by the worker itself.
    pub fn reclaim_detached_rings(&self) {
        self.rings_to_push.lock().unwrap().retain(|e| !e.is_detached());
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}
