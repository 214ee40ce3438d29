// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The out-of-scope collaborator boundary (§1 Non-goals, §9 "Polymorphism"):
// physical/virtual interface drivers are not implemented here, only the
// capability set the lcore core needs from them.

use crate::error::Result;

pub type InterfaceIndex = u32;

/// `(interface_index, queue_id)` — the only identity a queue has to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId {
    pub interface_index: InterfaceIndex,
    pub queue: u32,
}

impl QueueId {
    pub fn new(interface_index: InterfaceIndex, queue: u32) -> Self {
        Self {
            interface_index,
            queue,
        }
    }
}

/// A received or to-be-transmitted frame. The core never interprets the
/// bytes; routing and parsing live in the out-of-scope engine.
#[derive(Debug, Clone)]
pub struct Packet {
    pub interface_index: InterfaceIndex,
    pub data: Vec<u8>,
}

/// Whether an interface's queues are handled directly by a forwarding
/// worker, or handed off to one via a software ring (§3 "Interface").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Physical,
    Virtual,
}

#[derive(Debug, Clone, Copy)]
pub struct InterfaceInfo {
    pub index: InterfaceIndex,
    pub kind: InterfaceKind,
    pub rx_queue_count: u32,
    pub tx_queue_count: u32,
}

/// The capability set a queue exposes (§9 "Polymorphism"): the core
/// addresses every queue only through this trait, never through a concrete
/// driver type.
pub trait QueueDriver: Send + Sync {
    /// Pull up to `budget` packets without blocking. An empty result means
    /// the queue is currently drained, not that it is permanently done.
    fn rx_burst(&self, queue: QueueId, budget: usize) -> Result<Vec<Packet>>;

    /// Enqueue one packet for transmission. Does not imply the packet has
    /// left the wire — see `flush`.
    fn tx_one(&self, queue: QueueId, packet: Packet) -> Result<()>;

    /// Push any packets queued by `tx_one` onto the wire.
    fn flush(&self, queue: QueueId) -> Result<()>;
}

/// A minimal in-memory driver used by tests and the `vrouter_lcore_demo`
/// binary: `tx_one` appends to a shared log instead of touching hardware,
/// and `rx_burst` drains a pre-seeded queue of packets.
#[cfg(any(test, feature = "loopback-driver"))]
pub mod loopback {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct LoopbackDriver {
        rx: Mutex<HashMap<QueueId, Vec<Packet>>>,
        tx_log: Mutex<Vec<(QueueId, Packet)>>,
        flush_count: Mutex<HashMap<QueueId, u64>>,
    }

    impl LoopbackDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_rx(&self, queue: QueueId, packets: Vec<Packet>) {
            self.rx.lock().unwrap().entry(queue).or_default().extend(packets);
        }

        pub fn tx_log(&self) -> Vec<(QueueId, Packet)> {
            self.tx_log.lock().unwrap().clone()
        }

        pub fn flush_count(&self, queue: QueueId) -> u64 {
            *self.flush_count.lock().unwrap().get(&queue).unwrap_or(&0)
        }
    }

    impl QueueDriver for LoopbackDriver {
        fn rx_burst(&self, queue: QueueId, budget: usize) -> Result<Vec<Packet>> {
            let mut rx = self.rx.lock().unwrap();
            let Some(pending) = rx.get_mut(&queue) else {
                return Ok(Vec::new());
            };
            let take = budget.min(pending.len());
            Ok(pending.drain(..take).collect())
        }

        fn tx_one(&self, queue: QueueId, packet: Packet) -> Result<()> {
            self.tx_log.lock().unwrap().push((queue, packet));
            Ok(())
        }

        fn flush(&self, queue: QueueId) -> Result<()> {
            *self.flush_count.lock().unwrap().entry(queue).or_insert(0) += 1;
            Ok(())
        }
    }
}
