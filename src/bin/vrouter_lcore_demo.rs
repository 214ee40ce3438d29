// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Boots a full pinned-lcore fleet against a loopback driver: one reserved
// service worker runs the netlink transport, the rest run the forwarding
// loop. Demonstrates the attach → forward → detach lifecycle end to end
// without any real hardware queue.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vrouter_core::config::WorkerConfig;
use vrouter_core::driver::loopback::LoopbackDriver;
use vrouter_core::driver::{InterfaceInfo, InterfaceKind, Packet};
use vrouter_core::lcore::{ForwardingLoop, LcoreContext, RouteVerdict, RoutingEngine, Scheduler, ServiceLoop};
use vrouter_core::quiescence::QuiescenceRegistry;
use vrouter_core::transport::{EchoHandler, PacketPlane, TransportDispatcher, TransportServer};

/// Bounces every packet back out the interface it arrived on.
struct Loopback;
impl RoutingEngine for Loopback {
    fn route(&self, packet: Packet) -> RouteVerdict {
        let queue = vrouter_core::driver::QueueId::new(packet.interface_index, 0);
        RouteVerdict::Transmit(queue, packet)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerConfig::parse();
    info!(worker_count = config.worker_count, service_workers = config.service_workers, "starting lcore demo");

    let contexts: Vec<Arc<LcoreContext>> = (0..config.worker_count).map(LcoreContext::new).map(Arc::new).collect();
    let quiescence = Arc::new(QuiescenceRegistry::new(config.worker_count));
    let scheduler = Scheduler::new(contexts.clone(), quiescence.clone(), config.max_interfaces_per_worker);

    let driver = Arc::new(LoopbackDriver::new());
    let iface = InterfaceInfo {
        index: 0,
        kind: InterfaceKind::Virtual,
        rx_queue_count: 1,
        tx_queue_count: 1,
    };
    let report = scheduler.attach_interface(&iface)?;
    info!(
        primary_worker = report.primary_worker,
        rx = report.rx_bindings,
        tx_hw = report.tx_hardware_bindings,
        tx_sw = report.tx_software_rings,
        "interface attached"
    );

    driver.seed_rx(
        vrouter_core::driver::QueueId::new(0, 0),
        vec![Packet {
            interface_index: 0,
            data: b"hello from the lcore demo".to_vec(),
        }],
    );

    let server = TransportServer::bind(&config.run_dir, config.max_peers, config.ring_capacity)?;
    let dispatcher = Arc::new(TransportDispatcher::new(server.shared(), EchoHandler));
    let packet_plane = Arc::new(PacketPlane::bind(&config.run_dir)?);

    let mut handles = Vec::new();

    // Service worker 0: drives the transport server's own accept/hangup
    // loop, the dispatcher sweep, and the packet-plane step. This demo
    // always reserves a single collocated worker, regardless of
    // `config.service_workers` (a split two-worker layout needs a second
    // thread wired the same way, with `is_control_worker`/`is_packet_worker`
    // split across the two).
    {
        let service_context = contexts[0].clone();
        let quiescence = quiescence.clone();
        let idle = config.idle_sleep_no_rx;
        let mut server = server;
        let dispatcher = dispatcher.clone();
        let packet_plane = packet_plane.clone();
        handles.push(std::thread::spawn(move || {
            if let Err(e) = vrouter_core::rt_prio::pin_cpu(0) {
                warn!(error = %e, "failed to pin service worker, continuing unpinned");
            }
            let service = ServiceLoop::new(service_context.clone(), dispatcher, packet_plane, quiescence, idle, true, true);
            while !service_context.should_stop() {
                service.round();
                if let Err(e) = server.step(1) {
                    warn!(error = %e, "transport server step failed");
                }
            }
        }));
    }

    for (core_id, context) in contexts.iter().enumerate().skip(config.service_workers) {
        let context = context.clone();
        let driver = driver.clone();
        let routing = Arc::new(Loopback);
        let quiescence = quiescence.clone();
        let flush_cycles = config.flush_cycles;
        let idle_sleep = config.idle_sleep;
        let idle_sleep_no_rx = config.idle_sleep_no_rx;
        handles.push(std::thread::spawn(move || {
            if let Err(e) = vrouter_core::rt_prio::pin_cpu(core_id) {
                warn!(error = %e, "failed to pin forwarding worker, continuing unpinned");
            }
            let forwarding = ForwardingLoop::new(context, driver, routing, quiescence, flush_cycles, idle_sleep, idle_sleep_no_rx);
            forwarding.run();
        }));
    }

    std::thread::sleep(Duration::from_millis(200));
    info!(tx_log_len = driver.tx_log().len(), "demo run complete, stopping workers");

    for context in &contexts {
        context.request_stop();
    }
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}
