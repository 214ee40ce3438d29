// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end attach → forward → detach lifecycle across the scheduler and
// the forwarding loop, driven against the loopback driver instead of real
// hardware queues.

use std::sync::Arc;
use std::time::Duration;

use vrouter_core::driver::loopback::LoopbackDriver;
use vrouter_core::driver::{InterfaceInfo, InterfaceKind, Packet, QueueId};
use vrouter_core::lcore::{ForwardingLoop, LcoreContext, RouteVerdict, RoutingEngine, Scheduler};
use vrouter_core::quiescence::QuiescenceRegistry;

struct Bounce;
impl RoutingEngine for Bounce {
    fn route(&self, packet: Packet) -> RouteVerdict {
        RouteVerdict::Transmit(QueueId::new(packet.interface_index, 0), packet)
    }
}

#[test]
fn attached_interface_forwards_packets_then_detach_stops_new_work() {
    let worker_count = 3;
    let contexts: Vec<Arc<LcoreContext>> = (0..worker_count).map(LcoreContext::new).map(Arc::new).collect();
    contexts[0].mark_service_worker();
    let quiescence = Arc::new(QuiescenceRegistry::new(worker_count));
    let scheduler = Scheduler::new(contexts.clone(), quiescence.clone(), 32);

    let iface = InterfaceInfo {
        index: 7,
        kind: InterfaceKind::Physical,
        rx_queue_count: 2,
        tx_queue_count: 2,
    };
    let report = scheduler.attach_interface(&iface).unwrap();
    assert_eq!(report.rx_bindings, 2);

    let driver = Arc::new(LoopbackDriver::new());
    let (rx_queues, _) = contexts[report.primary_worker].rx_queues_snapshot();
    let seeded_queue = rx_queues[0].queue;
    driver.seed_rx(
        seeded_queue,
        vec![Packet {
            interface_index: 7,
            data: b"lifecycle".to_vec(),
        }],
    );

    let forwarding = ForwardingLoop::new(
        contexts[report.primary_worker].clone(),
        driver.clone(),
        Arc::new(Bounce),
        quiescence.clone(),
        1000,
        Duration::from_micros(1),
        Duration::from_micros(1),
    );

    std::thread::spawn(move || forwarding.run());
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while driver.tx_log().is_empty() {
        assert!(std::time::Instant::now() < deadline, "forwarding loop never ran");
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(driver.tx_log()[0].1.data, b"lifecycle");

    scheduler.detach_interface(7);
    // Every worker that had a rings_to_push entry for this interface should
    // have its live count drop to zero immediately, before any reclaim.
    for ctx in &contexts {
        for entry in ctx.rings_to_push_snapshot() {
            if entry.source_interface == 7 {
                assert!(entry.is_detached());
            }
        }
    }

    contexts[report.primary_worker].request_stop();
}
