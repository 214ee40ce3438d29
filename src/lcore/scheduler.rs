// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Queue Scheduler (§4.5): assigns an interface's RX/TX queues to workers at
// attach time, and removes a worker's software-ring bindings at detach time
// through the quiescent-reclaim protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::driver::{InterfaceIndex, InterfaceInfo, InterfaceKind, QueueId};
use crate::error::{Result, VrouterError};
use crate::lcore::context::{LcoreContext, RingsToPushEntry, RxBinding, SoftwareRing, TxBinding};
use crate::quiescence::QuiescenceRegistry;

/// Depth of a freshly created inter-worker software ring. Chosen to absorb
/// one full forwarding burst without back-pressure under normal load.
const SOFTWARE_RING_CAPACITY: usize = 256;

/// Summary of one `attach_interface` call, useful for tests and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentReport {
    pub primary_worker: usize,
    pub rx_bindings: usize,
    pub tx_hardware_bindings: usize,
    pub tx_software_rings: usize,
}

pub struct Scheduler {
    workers: Vec<Arc<LcoreContext>>,
    quiescence: Arc<QuiescenceRegistry>,
    max_interfaces_per_worker: usize,
    pending_detach_epoch: Mutex<HashMap<usize, u64>>,
}

impl Scheduler {
    pub fn new(
        workers: Vec<Arc<LcoreContext>>,
        quiescence: Arc<QuiescenceRegistry>,
        max_interfaces_per_worker: usize,
    ) -> Self {
        Self {
            workers,
            quiescence,
            max_interfaces_per_worker,
            pending_detach_epoch: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker(&self, id: usize) -> &Arc<LcoreContext> {
        &self.workers[id]
    }

    fn forwarding_worker_ids(&self) -> Vec<usize> {
        (0..self.workers.len())
            .filter(|&i| self.workers[i].is_eligible_for_scheduling())
            .collect()
    }

    /// Least-loaded selection (§4.5): minimum `effective_load`, ties broken
    /// by ascending worker id. Falls back to every worker (including
    /// service-reserved ones) only when no forwarding worker exists at all
    /// — the physical-only selector case.
    fn least_loaded(&self) -> Option<usize> {
        let forwarding = self.forwarding_worker_ids();
        let candidates: Vec<usize> = if forwarding.is_empty() {
            (0..self.workers.len()).collect()
        } else {
            forwarding
        };
        candidates
            .into_iter()
            .min_by_key(|&i| self.workers[i].effective_load())
    }

    /// Attach a new interface's RX and TX queues (§4.5 "Queue Scheduler").
    ///
    /// RX assignment: walk the forwarding workers once, starting at `W*`,
    /// binding one hardware RX queue per visit until `rx_queue_count`
    /// queues are placed or every worker has been visited — unplaced
    /// queues simply stay unbound rather than doubling up on a worker
    /// within this call (§8 "RX queues distribute ... one remains
    /// unbound").
    ///
    /// TX assignment: walk the forwarding workers once, starting at `W*`.
    /// Each visited worker gets exactly one egress path for this interface:
    /// a hardware TX queue while the per-interface hardware supply lasts, a
    /// software ring to `W*` afterward. This keeps the documented property
    /// "exactly min(nTx, forwarding_worker_count) hardware bindings; the
    /// rest get one software ring each" exact, at the cost of never
    /// double-binding hardware queues onto a single worker within one
    /// attach call even when nTx exceeds the forwarding worker count (see
    /// the design ledger for the scenario this simplifies away).
    pub fn attach_interface(&self, info: &InterfaceInfo) -> Result<AttachmentReport> {
        let w_star = self.least_loaded().ok_or(VrouterError::SchedulingFailure)?;

        let rx_bindings = self.assign_rx(w_star, info);
        let (tx_hardware_bindings, tx_software_rings) = self.assign_tx(w_star, info);

        Ok(AttachmentReport {
            primary_worker: w_star,
            rx_bindings,
            tx_hardware_bindings,
            tx_software_rings,
        })
    }

    /// Starting from `w_star`, visit each forwarding-eligible worker exactly
    /// once, binding one hardware RX queue per visit until `rx_queue_count`
    /// queues are placed (§4.5: "the service worker never appears in RX
    /// assignment results"; §8: "exactly `min(nRx, eligible_workers)` RX
    /// queues are bound"). A virtual interface's RX queue additionally gets
    /// a software ring forwarding its packets to `w_star` instead of
    /// handing them straight to the routing engine (§4.6 step 2).
    fn assign_rx(&self, w_star: usize, info: &InterfaceInfo) -> usize {
        let forwarding = self.forwarding_worker_ids();
        if forwarding.is_empty() {
            return 0;
        }
        let start_pos = forwarding.iter().position(|&w| w == w_star).unwrap_or(0);
        let mut bound = 0u32;
        for step in 0..forwarding.len() {
            if bound >= info.rx_queue_count {
                break;
            }
            let widx = forwarding[(start_pos + step) % forwarding.len()];
            let worker = &self.workers[widx];
            if worker.distinct_interface_count() >= self.max_interfaces_per_worker {
                continue;
            }

            let forward_ring = if info.kind == InterfaceKind::Virtual {
                let ring = Arc::new(SoftwareRing::new(SOFTWARE_RING_CAPACITY));
                self.workers[w_star].add_rings_to_push(Arc::new(RingsToPushEntry::new(
                    ring.clone(),
                    None,
                    info.index,
                )));
                Some(ring)
            } else {
                None
            };

            worker.add_rx_binding(RxBinding {
                queue: QueueId::new(info.index, bound),
                kind: info.kind,
                forward_ring,
            });
            bound += 1;
        }
        bound as usize
    }

    fn assign_tx(&self, w_star: usize, info: &InterfaceInfo) -> (usize, usize) {
        let forwarding = self.forwarding_worker_ids();
        if forwarding.is_empty() {
            return (0, 0);
        }
        let start_pos = forwarding.iter().position(|&w| w == w_star).unwrap_or(0);
        let mut queue_id = 0u32;
        let mut hw = 0;
        let mut sw = 0;

        for step in 0..forwarding.len() {
            let widx = forwarding[(start_pos + step) % forwarding.len()];
            let worker = &self.workers[widx];
            if worker.distinct_interface_count() >= self.max_interfaces_per_worker {
                continue;
            }
            if queue_id < info.tx_queue_count {
                worker.add_tx_binding(TxBinding {
                    interface_index: info.index,
                    queue: QueueId::new(info.index, queue_id),
                });
                queue_id += 1;
                hw += 1;
            } else {
                let ring = Arc::new(SoftwareRing::new(SOFTWARE_RING_CAPACITY));
                let entry = Arc::new(RingsToPushEntry::new(ring, None, info.index));
                worker.add_rings_to_push(entry);
                sw += 1;
            }
        }
        (hw, sw)
    }

    /// Allocate a worker for an MPLS filter queue or similar control-plane
    /// scheduling request that does not bind any interface queue — just the
    /// least-loaded selector, no RX/TX bookkeeping.
    pub fn schedule_filter_queue(&self) -> Result<usize> {
        self.least_loaded().ok_or(VrouterError::SchedulingFailure)
    }

    /// Begin removing an interface's software-ring bindings (§4.5 detach
    /// protocol step 1): null each matching entry's source under a write
    /// barrier, decrement the owning worker's count once that null is
    /// visible, and record the epoch so `poll_reclaim` knows when it is
    /// safe to free the entry itself.
    pub fn detach_interface(&self, interface_index: InterfaceIndex) {
        let mut pending = self.pending_detach_epoch.lock().unwrap();
        for worker in &self.workers {
            let mut touched = false;
            for entry in worker.rings_to_push_snapshot() {
                if entry.source_interface == interface_index && !entry.is_detached() {
                    entry.detach();
                    worker.decrement_rings_to_push_count();
                    touched = true;
                }
            }
            if touched {
                pending.insert(worker.id, self.quiescence.epoch(worker.id));
            }
        }
    }

    /// Step 3 of the detach protocol: for every worker with a pending
    /// detach, reclaim the now-dead entries once that worker's forwarding
    /// loop has announced at least one full quiescent interval since the
    /// null store.
    pub fn poll_reclaim(&self) {
        let mut pending = self.pending_detach_epoch.lock().unwrap();
        pending.retain(|&worker_id, &mut since| {
            if self.quiescence.advanced_since(worker_id, since) {
                self.workers[worker_id].reclaim_detached_rings();
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::InterfaceKind;

    fn make(worker_count: usize, service_workers: usize) -> Scheduler {
        let workers: Vec<Arc<LcoreContext>> = (0..worker_count).map(LcoreContext::new).map(Arc::new).collect();
        for w in workers.iter().take(service_workers) {
            w.mark_service_worker();
        }
        let quiescence = Arc::new(QuiescenceRegistry::new(worker_count));
        Scheduler::new(workers, quiescence, 32)
    }

    fn iface(index: u32, rx: u32, tx: u32) -> InterfaceInfo {
        InterfaceInfo {
            index,
            kind: InterfaceKind::Physical,
            rx_queue_count: rx,
            tx_queue_count: tx,
        }
    }

    #[test]
    fn service_worker_never_receives_rx_queues() {
        let sched = make(4, 1);
        sched.attach_interface(&iface(0, 4, 4)).unwrap();
        assert_eq!(sched.worker(0).rx_queue_count(), 0);
        let total_rx: usize = (1..4).map(|i| sched.worker(i).rx_queue_count()).sum();
        assert_eq!(total_rx, 4);
    }

    #[test]
    fn rx_assignment_caps_at_available_forwarding_workers() {
        let sched = make(3, 1);
        let report = sched.attach_interface(&iface(0, 8, 0)).unwrap();
        // Only 2 forwarding workers exist; a single lap leaves the
        // remaining 6 requested queues unbound rather than doubling up.
        assert_eq!(report.rx_bindings, 2);
    }

    #[test]
    fn tx_assignment_splits_hardware_and_software_per_spec_property() {
        // 2 forwarding workers, nTx=4: every forwarding worker gets exactly
        // one egress path; here both fit in hardware.
        let sched = make(3, 1);
        let report = sched.attach_interface(&iface(0, 0, 4)).unwrap();
        assert_eq!(report.tx_hardware_bindings, 2);
        assert_eq!(report.tx_software_rings, 0);

        // nTx < forwarding_worker_count: the remainder fall back to
        // software rings, one per leftover worker, matching §8's general
        // TX-assignment property.
        let sched = make(4, 1);
        let report = sched.attach_interface(&iface(1, 0, 1)).unwrap();
        assert_eq!(report.tx_hardware_bindings, 1);
        assert_eq!(report.tx_software_rings, 2);
    }

    #[test]
    fn detach_then_reclaim_only_after_quiescent_interval() {
        let sched = make(3, 1);
        sched.attach_interface(&iface(0, 0, 1)).unwrap();
        let with_sw_ring = (1..3)
            .find(|&i| sched.worker(i).rings_to_push_count() > 0)
            .expect("one worker got a software ring");

        sched.detach_interface(0);
        assert_eq!(sched.worker(with_sw_ring).rings_to_push_count(), 0);
        assert_eq!(sched.worker(with_sw_ring).rings_to_push_snapshot().len(), 1);

        sched.poll_reclaim();
        assert_eq!(sched.worker(with_sw_ring).rings_to_push_snapshot().len(), 1);

        sched.quiescence.announce(with_sw_ring);
        sched.poll_reclaim();
        assert!(sched.worker(with_sw_ring).rings_to_push_snapshot().is_empty());
    }

    #[test]
    fn schedule_filter_queue_falls_back_to_service_worker_when_none_forwarding() {
        // No forwarding workers at all: the selector falls back to the full
        // worker set rather than failing outright.
        let sched = make(1, 1);
        assert_eq!(sched.schedule_filter_queue().unwrap(), 0);
    }

    #[test]
    fn schedule_filter_queue_prefers_least_loaded_forwarding_worker() {
        let sched = make(3, 1);
        sched.worker(1).add_rx_queue(QueueId::new(0, 0));
        let chosen = sched.schedule_filter_queue().unwrap();
        assert_eq!(chosen, 2);
    }
}
