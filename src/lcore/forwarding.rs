// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Forwarding Loop (§4.6): the hot-path body a pinned worker runs once it
// owns at least one RX queue or rings_to_push entry. Five passes per
// iteration: hardware RX burst, routing, software-ring drain, periodic TX
// flush, adaptive idle. No pass blocks; the loop itself is the only thing
// that ever sleeps, and only when a whole iteration saw no work.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::driver::{InterfaceKind, Packet, QueueDriver};
use crate::lcore::context::{LcoreContext, RxBinding};
use crate::quiescence::QuiescenceRegistry;

/// Burst size pulled from a single hardware RX queue per iteration. Matches
/// the `rx_burst`/`tx_burst` granularity the driver trait exposes.
const RX_BURST_SIZE: usize = 32;

/// Upper bound on receive passes per iteration (§4.6 step 2): drains
/// latency-sensitive bursty queues without reintroducing per-queue
/// bookkeeping across iterations.
const MAX_RX_PASSES: usize = 5;

/// Decides what to do with a packet once it has been pulled off some queue.
/// Routing itself is the out-of-scope collaborator (§1); the forwarding
/// loop only knows how to hand a packet to this trait and then act on the
/// verdict.
pub trait RoutingEngine: Send + Sync {
    fn route(&self, packet: Packet) -> RouteVerdict;
}

pub enum RouteVerdict {
    /// Transmit on the given queue (possibly a different interface's TX
    /// queue than the one the packet arrived on).
    Transmit(crate::driver::QueueId, Packet),
    /// Hand off to another worker's software ring (cross-lcore TX path).
    Forward(Arc<crate::lcore::context::SoftwareRing>, Packet),
    Drop,
}

pub struct ForwardingLoop<D: QueueDriver, R: RoutingEngine> {
    context: Arc<LcoreContext>,
    driver: Arc<D>,
    routing: Arc<R>,
    quiescence: Arc<QuiescenceRegistry>,
    flush_cycles: u64,
    idle_sleep: Duration,
    idle_sleep_no_rx: Duration,
}

impl<D: QueueDriver, R: RoutingEngine> ForwardingLoop<D, R> {
    pub fn new(
        context: Arc<LcoreContext>,
        driver: Arc<D>,
        routing: Arc<R>,
        quiescence: Arc<QuiescenceRegistry>,
        flush_cycles: u64,
        idle_sleep: Duration,
        idle_sleep_no_rx: Duration,
    ) -> Self {
        Self {
            context,
            driver,
            routing,
            quiescence,
            flush_cycles,
            idle_sleep,
            idle_sleep_no_rx,
        }
    }

    /// Run until [`LcoreContext::should_stop`] is observed. Intended to be
    /// the entire body of a pinned worker thread.
    pub fn run(&self) {
        let mut cycle: u64 = 0;
        while !self.context.should_stop() {
            let work_done = self.iteration(cycle);
            cycle = cycle.wrapping_add(1);

            self.quiescence.announce(self.context.id);

            if !work_done {
                let sleep_for = if self.context.rx_queue_count() == 0 {
                    self.idle_sleep_no_rx
                } else {
                    self.idle_sleep
                };
                std::thread::sleep(sleep_for);
            }
        }
    }

    /// One pass through all five stages; returns whether any packet was
    /// actually moved, for the caller's adaptive-idle decision.
    fn iteration(&self, cycle: u64) -> bool {
        let mut work_done = false;

        work_done |= self.drain_hardware_rx();
        work_done |= self.drain_software_rings();

        if self.flush_cycles != 0 && cycle % self.flush_cycles == 0 {
            self.flush_tx();
        }

        work_done
    }

    /// Pass 1+2: up to [`MAX_RX_PASSES`] receive passes over every owned
    /// hardware RX queue (§4.6 step 2). Each pass scans a pass-local
    /// snapshot of still-active queues; a queue that returns an empty burst
    /// drops out of that snapshot for the rest of this iteration but stays
    /// eligible again next iteration. Virtual-interface traffic is forwarded
    /// to its owning worker's software ring instead of going straight to
    /// the routing engine.
    fn drain_hardware_rx(&self) -> bool {
        let (bindings, _mask) = self.context.rx_queues_snapshot();
        let mut active: Vec<usize> = (0..bindings.len()).collect();
        let mut any = false;

        for _ in 0..MAX_RX_PASSES {
            if active.is_empty() {
                break;
            }
            let mut still_active = Vec::with_capacity(active.len());
            for idx in active {
                let binding = &bindings[idx];
                let packets = match self.driver.rx_burst(binding.queue, RX_BURST_SIZE) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(queue = ?binding.queue, error = %e, "rx_burst failed, skipping queue this pass");
                        continue;
                    }
                };
                if packets.is_empty() {
                    continue;
                }
                any = true;
                still_active.push(idx);
                for packet in packets {
                    self.deliver_rx_packet(binding, packet);
                }
            }
            active = still_active;
        }
        any
    }

    fn deliver_rx_packet(&self, binding: &RxBinding, packet: Packet) {
        if binding.kind == InterfaceKind::Virtual {
            match &binding.forward_ring {
                Some(ring) => {
                    if ring.push(packet).is_err() {
                        warn!("virtual interface forward ring full, dropping packet");
                    }
                }
                None => warn!("virtual interface rx binding has no forward ring, dropping packet"),
            }
        } else {
            self.route_one(packet);
        }
    }

    /// Pass 3: single-consumer burst dequeue from every live
    /// `rings_to_push` entry this worker owns, skipping any entry whose
    /// source has already been detached (§4.5 detach protocol, §4.6 step 3).
    fn drain_software_rings(&self) -> bool {
        let mut any = false;
        for entry in self.context.rings_to_push_snapshot() {
            let Some(ring) = entry.source() else {
                continue;
            };
            let packets = ring.drain_burst(RX_BURST_SIZE);
            if !packets.is_empty() {
                any = true;
            }
            for packet in packets {
                match entry.dest_tx {
                    Some(queue) => self.transmit(queue, packet),
                    None => self.route_one(packet),
                }
            }
        }
        any
    }

    fn route_one(&self, packet: Packet) {
        match self.routing.route(packet) {
            RouteVerdict::Transmit(queue, packet) => self.transmit(queue, packet),
            RouteVerdict::Forward(ring, packet) => {
                if ring.push(packet).is_err() {
                    warn!("software ring full, dropping forwarded packet");
                }
            }
            RouteVerdict::Drop => {}
        }
    }

    fn transmit(&self, queue: crate::driver::QueueId, packet: Packet) {
        if let Err(e) = self.driver.tx_one(queue, packet) {
            warn!(?queue, error = %e, "tx_one failed, dropping packet");
        }
    }

    /// Pass 4: flush every TX binding this worker owns. Run only once
    /// every `flush_cycles` iterations — a per-packet flush would defeat
    /// the point of bursting (§4.6 "periodic flush").
    fn flush_tx(&self) {
        for binding in self.context.tx_queues_snapshot() {
            if let Err(e) = self.driver.flush(binding.queue) {
                warn!(queue = ?binding.queue, error = %e, "flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::loopback::LoopbackDriver;
    use crate::driver::QueueId;

    struct EchoBackRouting {
        out_queue: QueueId,
    }
    impl RoutingEngine for EchoBackRouting {
        fn route(&self, packet: Packet) -> RouteVerdict {
            RouteVerdict::Transmit(self.out_queue, packet)
        }
    }

    #[test]
    fn drains_rx_burst_and_transmits_via_routing_verdict() {
        let context = Arc::new(LcoreContext::new(0));
        let rx_queue = QueueId::new(1, 0);
        let tx_queue = QueueId::new(2, 0);
        context.add_rx_queue(rx_queue);

        let driver = Arc::new(LoopbackDriver::new());
        driver.seed_rx(
            rx_queue,
            vec![Packet {
                interface_index: 1,
                data: vec![1, 2, 3],
            }],
        );

        let routing = Arc::new(EchoBackRouting { out_queue: tx_queue });
        let quiescence = Arc::new(QuiescenceRegistry::new(1));

        let forwarding = ForwardingLoop::new(
            context,
            driver.clone(),
            routing,
            quiescence,
            1000,
            Duration::from_micros(1),
            Duration::from_micros(1),
        );

        assert!(forwarding.iteration(0));
        let log = driver.tx_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, tx_queue);
        assert_eq!(log[0].1.data, vec![1, 2, 3]);
    }

    #[test]
    fn skips_detached_software_ring_without_panicking() {
        let context = Arc::new(LcoreContext::new(0));
        let ring = Arc::new(crate::lcore::context::SoftwareRing::new(4));
        let entry = Arc::new(crate::lcore::context::RingsToPushEntry::new(ring, None, 1));
        entry.detach();
        context.add_rings_to_push(entry);

        let driver = Arc::new(LoopbackDriver::new());
        let routing = Arc::new(EchoBackRouting {
            out_queue: QueueId::new(1, 0),
        });
        let quiescence = Arc::new(QuiescenceRegistry::new(1));
        let forwarding = ForwardingLoop::new(
            context,
            driver,
            routing,
            quiescence,
            1000,
            Duration::from_micros(1),
            Duration::from_micros(1),
        );

        assert!(!forwarding.iteration(0));
    }

    #[test]
    fn flush_runs_only_on_flush_cycle_boundary() {
        let context = Arc::new(LcoreContext::new(0));
        context.add_tx_binding(crate::lcore::context::TxBinding {
            interface_index: 1,
            queue: QueueId::new(1, 0),
        });
        let driver = Arc::new(LoopbackDriver::new());
        let routing = Arc::new(EchoBackRouting {
            out_queue: QueueId::new(1, 0),
        });
        let quiescence = Arc::new(QuiescenceRegistry::new(1));
        let forwarding = ForwardingLoop::new(
            context,
            driver.clone(),
            routing,
            quiescence,
            4,
            Duration::from_micros(1),
            Duration::from_micros(1),
        );

        forwarding.iteration(1);
        assert_eq!(driver.flush_count(QueueId::new(1, 0)), 0);
        forwarding.iteration(4);
        assert_eq!(driver.flush_count(QueueId::new(1, 0)), 1);
    }

    #[test]
    fn virtual_interface_rx_forwards_to_ring_instead_of_routing() {
        let context = Arc::new(LcoreContext::new(0));
        let rx_queue = QueueId::new(3, 0);
        let ring = Arc::new(crate::lcore::context::SoftwareRing::new(4));
        context.add_rx_binding(RxBinding {
            queue: rx_queue,
            kind: InterfaceKind::Virtual,
            forward_ring: Some(ring.clone()),
        });

        let driver = Arc::new(LoopbackDriver::new());
        driver.seed_rx(
            rx_queue,
            vec![Packet {
                interface_index: 3,
                data: vec![9, 9, 9],
            }],
        );

        // A routing engine that panics if ever invoked: a virtual
        // interface's packets must never reach it directly.
        struct UnreachableRouting;
        impl RoutingEngine for UnreachableRouting {
            fn route(&self, _packet: Packet) -> RouteVerdict {
                panic!("virtual interface packet reached the routing engine directly");
            }
        }

        let quiescence = Arc::new(QuiescenceRegistry::new(1));
        let forwarding = ForwardingLoop::new(
            context,
            driver,
            Arc::new(UnreachableRouting),
            quiescence,
            1000,
            Duration::from_micros(1),
            Duration::from_micros(1),
        );

        assert!(forwarding.iteration(0));
        let drained = ring.drain_burst(4);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].data, vec![9, 9, 9]);
    }
}
