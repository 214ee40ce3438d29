// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lockless shared-memory netlink transport and pinned-lcore forwarding
// core for a userspace poll-mode virtual router. See `SPEC_FULL.md` for
// the full module map; this file only wires the public surface together.

pub mod config;
pub mod driver;
pub mod error;
pub mod lcore;
pub mod platform;
pub mod quiescence;
pub mod ring;
pub mod rt_prio;
pub mod shm;
pub mod shm_name;
pub mod transport;

pub use config::WorkerConfig;
pub use error::{Result, VrouterError};
pub use ring::Ring;
