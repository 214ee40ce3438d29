// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Stands up the shared-memory netlink transport in isolation: binds the
// control socket, accepts peers, and echoes every request back through the
// Transport Dispatcher. Useful for exercising the handshake and ring
// protocol without a full lcore fleet.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vrouter_core::config::WorkerConfig;
use vrouter_core::transport::{EchoHandler, TransportDispatcher, TransportServer};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerConfig::parse();
    info!(run_dir = %config.run_dir.display(), max_peers = config.max_peers, "starting transport demo");

    let mut server = TransportServer::bind(&config.run_dir, config.max_peers, config.ring_capacity)?;
    let dispatcher = TransportDispatcher::new(server.shared(), EchoHandler);

    info!(path = %server.socket_path().display(), "listening");

    loop {
        server.step(TransportServer::POLL_TIMEOUT.as_millis() as i32)?;
        dispatcher.step();
        std::thread::sleep(Duration::from_millis(1));
    }
}
