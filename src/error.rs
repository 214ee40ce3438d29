// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error type. Hot-path failures (RingFull, RingEmpty) are pure
// signals with no payload and are never fatal; setup failures carry the
// originating io::Error so the caller can inspect errno.

use std::io;

/// Error surfaced by the transport, scheduler, and forwarding components.
#[derive(Debug, thiserror::Error)]
pub enum VrouterError {
    /// The ring has no contiguous region of `header + len` bytes; back-pressure.
    /// Never retried internally — the caller decides whether to drop or retry.
    #[error("ring is full")]
    RingFull,

    /// The ring has no record to dequeue. Informational; consumers loop.
    #[error("ring is empty")]
    RingEmpty,

    /// No free peer slot at accept time, or no free hardware queue at attach time.
    #[error("no free slot available")]
    SlotExhausted,

    /// A setup-time allocation (shm, socket, mmap) failed.
    #[error("allocation failed: {0}")]
    AllocationFailure(#[source] io::Error),

    /// Observed via POLLHUP; drives peer cleanup, never propagates past the
    /// transport server's own state machine.
    #[error("peer disconnected")]
    PeerDisconnect,

    /// No eligible worker exists for a new MPLS filter queue.
    #[error("no eligible worker for scheduling request")]
    SchedulingFailure,

    /// An RX/TX/flush driver call returned an error; the affected queue is
    /// logged and the forwarding loop proceeds to the next queue.
    #[error("driver operation failed: {0}")]
    DriverFailure(#[source] io::Error),
}

impl From<io::Error> for VrouterError {
    fn from(e: io::Error) -> Self {
        VrouterError::AllocationFailure(e)
    }
}

pub type Result<T> = std::result::Result<T, VrouterError>;
