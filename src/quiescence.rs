// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Epoch-based quiescent-state tracking (§9 "Quiescent-state RCU"). Every
// forwarding/service worker announces once per loop iteration; a reclaimer
// snapshots the epoch before retiring a structure and waits until the
// owning worker's epoch has advanced past the snapshot, guaranteeing no
// in-flight iteration still holds a reference to the retired structure.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct QuiescenceRegistry {
    epochs: Vec<AtomicU64>,
}

impl QuiescenceRegistry {
    pub fn new(worker_count: usize) -> Self {
        Self {
            epochs: (0..worker_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.epochs.len()
    }

    /// Called once per iteration by the owning worker, at the point in its
    /// loop where it holds no references into structures subject to
    /// detach-time reclaim.
    pub fn announce(&self, worker_id: usize) {
        self.epochs[worker_id].fetch_add(1, Ordering::Release);
    }

    pub fn epoch(&self, worker_id: usize) -> u64 {
        self.epochs[worker_id].load(Ordering::Acquire)
    }

    /// `true` once `worker_id` has announced at least once since `since`
    /// was observed — i.e. one full quiescent interval has elapsed for
    /// that worker.
    pub fn advanced_since(&self, worker_id: usize, since: u64) -> bool {
        self.epoch(worker_id) > since
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_since_is_false_until_announce() {
        let reg = QuiescenceRegistry::new(2);
        let snap = reg.epoch(0);
        assert!(!reg.advanced_since(0, snap));
        reg.announce(0);
        assert!(reg.advanced_since(0, snap));
    }

    #[test]
    fn workers_are_independent() {
        let reg = QuiescenceRegistry::new(2);
        reg.announce(0);
        assert!(!reg.advanced_since(1, 0));
    }
}
