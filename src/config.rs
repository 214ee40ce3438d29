// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Worker configuration (§6 "Worker configuration"). Constructed
// programmatically by the embedding application, or parsed from flags by
// the crate's own diagnostic binaries.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the lcore fleet and the shared-memory transport.
#[derive(Debug, Clone, clap::Parser)]
#[command(about = "userspace poll-mode virtual router core")]
pub struct WorkerConfig {
    /// Total number of pinned workers, including reserved service workers.
    #[arg(long, default_value_t = 4)]
    pub worker_count: usize,

    /// Number of workers reserved for service roles (1 or 2; see §4.7).
    #[arg(long, default_value_t = 1)]
    pub service_workers: usize,

    /// Forwarding-loop TX flush interval, in loop iterations.
    #[arg(long, default_value_t = 1000)]
    pub flush_cycles: u64,

    /// Adaptive-idle sleep duration when a forwarding iteration saw no packets.
    #[arg(long, default_value = "50us", value_parser = parse_duration)]
    pub idle_sleep: Duration,

    /// Longer sleep duration used when a worker owns no RX queues at all.
    #[arg(long, default_value = "1ms", value_parser = parse_duration)]
    pub idle_sleep_no_rx: Duration,

    /// Directory holding the transport's unix socket and (transiently) its
    /// shared-memory backing files.
    #[arg(long, default_value = "/var/run/vrouter")]
    pub run_dir: PathBuf,

    /// Maximum number of simultaneous transport peers (Peer Slot table size).
    #[arg(long, default_value_t = 5)]
    pub max_peers: usize,

    /// Per-half ring payload capacity, in bytes. Must be large enough that
    /// `header + max_record_len < capacity` for every message the agent sends.
    #[arg(long, default_value_t = 100 * 1024)]
    pub ring_capacity: u32,

    /// Maximum number of interfaces any single worker may own RX queues for
    /// (`MAX_INTERFACES` in §4.5's TX-assignment skip condition).
    #[arg(long, default_value_t = 32)]
    pub max_interfaces_per_worker: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            service_workers: 1,
            flush_cycles: 1000,
            idle_sleep: Duration::from_micros(50),
            idle_sleep_no_rx: Duration::from_millis(1),
            run_dir: PathBuf::from("/var/run/vrouter"),
            max_peers: 5,
            ring_capacity: 100 * 1024,
            max_interfaces_per_worker: 32,
        }
    }
}

impl WorkerConfig {
    /// Number of workers eligible to run the forwarding loop (excludes
    /// service-reserved workers).
    pub fn forwarding_worker_count(&self) -> usize {
        self.worker_count.saturating_sub(self.service_workers)
    }

    /// Path to the control-plane netlink-transport socket (§6).
    pub fn netlink_socket_path(&self) -> PathBuf {
        self.run_dir.join("dpdk_netlink")
    }

    /// Path to the packet-plane agent socket (§4.7 "agent packet I/O").
    pub fn packet_socket_path(&self) -> PathBuf {
        self.run_dir.join("dpdk_packet")
    }
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let (num, unit) = s
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| s.split_at(i))
        .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
    let n: u64 = num.parse().map_err(|_| format!("invalid duration {s:?}"))?;
    match unit {
        "us" => Ok(Duration::from_micros(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        other => Err(format!("unknown duration unit {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarding_worker_count_excludes_service() {
        let mut cfg = WorkerConfig::default();
        cfg.worker_count = 4;
        cfg.service_workers = 1;
        assert_eq!(cfg.forwarding_worker_count(), 3);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("50us").unwrap(), Duration::from_micros(50));
        assert_eq!(parse_duration("1ms").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("nope").is_err());
    }
}
