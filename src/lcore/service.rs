// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Service Loop (§4.7): the body run by a worker reserved for control- and
// packet-plane duty instead of forwarding. Alternates a Transport Dispatcher
// sweep with an agent packet I/O step; never owns an RX queue, so it always
// takes the `idle_sleep_no_rx` interval when a round saw no work.

use std::sync::Arc;
use std::time::Duration;

use crate::lcore::context::LcoreContext;
use crate::quiescence::QuiescenceRegistry;
use crate::transport::{MessageHandler, TransportDispatcher};

/// The agent packet I/O step is an out-of-scope collaborator (§1): the
/// service loop only knows it can be polled once per round and reports
/// whether it moved anything.
pub trait PacketPlaneStep: Send + Sync {
    fn step(&self) -> bool;
}

/// A step that never has work; used when a deployment has no packet-plane
/// agent wired in yet (e.g. the transport-only demo).
pub struct NoPacketPlane;
impl PacketPlaneStep for NoPacketPlane {
    fn step(&self) -> bool {
        false
    }
}

pub struct ServiceLoop<H: MessageHandler, P: PacketPlaneStep> {
    context: Arc<LcoreContext>,
    dispatcher: Arc<TransportDispatcher<H>>,
    packet_plane: Arc<P>,
    quiescence: Arc<QuiescenceRegistry>,
    idle_sleep_no_rx: Duration,
    is_control_worker: bool,
    is_packet_worker: bool,
}

impl<H: MessageHandler, P: PacketPlaneStep> ServiceLoop<H, P> {
    /// `is_control_worker`/`is_packet_worker` pick one of the two reserved
    /// roles from §4.7; both `true` is the minimum-worker-count
    /// configuration where they collocate on the same worker.
    pub fn new(
        context: Arc<LcoreContext>,
        dispatcher: Arc<TransportDispatcher<H>>,
        packet_plane: Arc<P>,
        quiescence: Arc<QuiescenceRegistry>,
        idle_sleep_no_rx: Duration,
        is_control_worker: bool,
        is_packet_worker: bool,
    ) -> Self {
        if is_control_worker {
            context.mark_control_worker();
        }
        if is_packet_worker {
            context.mark_packet_worker();
        }
        Self {
            context,
            dispatcher,
            packet_plane,
            quiescence,
            idle_sleep_no_rx,
            is_control_worker,
            is_packet_worker,
        }
    }

    pub fn run(&self) {
        while !self.context.should_stop() {
            self.round();
        }
    }

    /// One iteration of §4.7: a control-only worker runs a dispatcher
    /// sweep, a packet-only worker runs a packet-plane step, and a
    /// collocated worker runs both with a yield and a stop-flag recheck
    /// between them so neither role can starve the other or outlive a
    /// shutdown request.
    pub fn round(&self) {
        if self.is_control_worker && self.is_packet_worker {
            self.dispatcher.step();
            std::thread::yield_now();
            if self.context.should_stop() {
                self.quiescence.announce(self.context.id);
                return;
            }
            let packet_work = self.packet_plane.step();
            self.quiescence.announce(self.context.id);
            if !packet_work {
                std::thread::sleep(self.idle_sleep_no_rx);
            }
        } else if self.is_control_worker {
            self.dispatcher.step();
            self.quiescence.announce(self.context.id);
            std::thread::sleep(self.idle_sleep_no_rx);
        } else if self.is_packet_worker {
            let packet_work = self.packet_plane.step();
            self.quiescence.announce(self.context.id);
            if !packet_work {
                std::thread::sleep(self.idle_sleep_no_rx);
            }
        } else {
            self.quiescence.announce(self.context.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::RingPair;
    use crate::transport::server::{RingSlotEntry, TransportShared};
    use crate::transport::EchoHandler;
    use std::sync::atomic::Ordering;

    #[test]
    fn round_drains_transport_and_polls_packet_plane() {
        let context = Arc::new(LcoreContext::new(0));
        let shared = Arc::new(TransportShared::new(1, 4096));
        let mut pair = RingPair::create("/vrouter-test-service-1", 4096).unwrap();
        let entry = Box::new(RingSlotEntry {
            request_ring: pair.from_peer(),
            response_ring: pair.to_peer(),
        });
        let entry_ptr = Box::into_raw(entry);
        shared.poll_rings_for_test()[0].store(entry_ptr, Ordering::Release);

        let request = crate::transport::message::NetlinkMessage {
            seq: 1,
            multi: false,
            payload: b"hi".to_vec(),
        }
        .encode();
        pair.from_peer().enqueue(&request).unwrap();

        let dispatcher = Arc::new(TransportDispatcher::new(shared, EchoHandler));
        let packet_plane = Arc::new(NoPacketPlane);
        let quiescence = Arc::new(QuiescenceRegistry::new(1));
        let service = ServiceLoop::new(
            context.clone(),
            dispatcher,
            packet_plane,
            quiescence.clone(),
            Duration::from_micros(1),
            true,
            true,
        );

        assert!(context.effective_load() == usize::MAX);
        let snap = quiescence.epoch(0);
        service.round();
        assert!(quiescence.advanced_since(0, snap));
        assert!(pair.to_peer().peek().is_some());

        unsafe { drop(Box::from_raw(entry_ptr)) };
    }
}
