// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport Server (§4.3): accepts peer connections on a local stream
// socket, allocates a ring pair per peer, hands off the shared-memory
// descriptor, and polls for hangup. Runs on a dedicated cooperative
// worker; its only blocking call is `poll` with a bounded timeout.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, VrouterError};
use crate::platform::posix;
use crate::ring::Ring;
use crate::shm::RingPair;

/// Lifecycle of one peer connection. `Accepted` and `HandshakeSent` are
/// transient — the handshake has no suspension point, so a slot moves
/// straight from absent to `Active` within one `step()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Accepted,
    HandshakeSent,
    Active,
    Hangup,
    Unmapped,
}

/// The pair of ring views the dispatcher reads/writes for one peer. Lives
/// behind a raw pointer in `poll_rings` so the dispatcher can read it
/// without taking any lock (§5: "the dispatcher is a pure reader").
pub struct RingSlotEntry {
    /// The ring this side (the router) dequeues agent requests from.
    pub request_ring: Ring,
    /// The ring this side enqueues agent responses into.
    pub response_ring: Ring,
}

struct ActivePeer {
    fd: RawFd,
    entry_ptr: *mut RingSlotEntry,
    ring_pair: RingPair,
}

// SAFETY: `ActivePeer` is only ever touched by the single transport-server
// worker thread; `entry_ptr` aliases memory shared with the dispatcher
// thread strictly through the atomics in `TransportShared`.
unsafe impl Send for ActivePeer {}

struct PendingUnmap {
    entry_ptr: *mut RingSlotEntry,
    ring_pair: RingPair,
    queued_at_sweep: u64,
}

unsafe impl Send for PendingUnmap {}

/// State shared between the server (sole writer) and the dispatcher (pure
/// reader of `poll_rings`, sole mutator of `pending_unmap` draining).
pub struct TransportShared {
    poll_rings: Vec<AtomicPtr<RingSlotEntry>>,
    pending_unmap: Mutex<Vec<PendingUnmap>>,
    sweep_counter: AtomicU64,
    ring_capacity: u32,
}

impl TransportShared {
    pub fn new(max_peers: usize, ring_capacity: u32) -> Self {
        Self {
            poll_rings: (0..max_peers).map(|_| AtomicPtr::new(std::ptr::null_mut())).collect(),
            pending_unmap: Mutex::new(Vec::new()),
            sweep_counter: AtomicU64::new(0),
            ring_capacity,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.poll_rings.len()
    }

    #[cfg(test)]
    pub fn poll_rings_for_test(&self) -> &[AtomicPtr<RingSlotEntry>] {
        &self.poll_rings
    }

    /// Dispatcher-side read of one slot's ring pointer. Never null-checked
    /// by anything but the dispatcher itself.
    pub fn poll_ring(&self, slot: usize) -> *mut RingSlotEntry {
        self.poll_rings[slot].load(Ordering::Acquire)
    }

    /// Run by the dispatcher once per full sweep over `poll_rings`:
    /// reclaims every pending-unmap entry queued before this sweep began
    /// (§4.4 "drain pending_unmap"; §5 "at least one dispatcher pass has
    /// observed the removal").
    pub fn reclaim_pending(&self) {
        let current_sweep = self.sweep_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let mut pending = self.pending_unmap.lock().unwrap();
        let mut remaining = Vec::with_capacity(pending.len());
        for entry in pending.drain(..) {
            if entry.queued_at_sweep < current_sweep {
                unsafe { drop(Box::from_raw(entry.entry_ptr)) };
                drop(entry.ring_pair);
            } else {
                remaining.push(entry);
            }
        }
        *pending = remaining;
    }
}

struct Slot {
    peer: Option<ActivePeer>,
}

pub struct TransportServer {
    listener_fd: RawFd,
    slots: Vec<Slot>,
    shared: std::sync::Arc<TransportShared>,
    socket_path: PathBuf,
}

impl TransportServer {
    pub fn bind(run_dir: &Path, max_peers: usize, ring_capacity: u32) -> Result<Self> {
        std::fs::create_dir_all(run_dir).map_err(VrouterError::from)?;
        let socket_path = run_dir.join("dpdk_netlink");
        let listener_fd = posix::unix_listener(&socket_path, 16).map_err(VrouterError::from)?;
        info!(path = %socket_path.display(), "transport server listening");

        Ok(Self {
            listener_fd,
            slots: (0..max_peers).map(|_| Slot { peer: None }).collect(),
            shared: std::sync::Arc::new(TransportShared::new(max_peers, ring_capacity)),
            socket_path,
        })
    }

    pub fn shared(&self) -> std::sync::Arc<TransportShared> {
        self.shared.clone()
    }

    fn first_free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.peer.is_none())
    }

    /// One cooperative iteration: poll the listener and every active peer
    /// descriptor with `timeout_ms`, accept at most one new connection,
    /// and clean up any peer that hung up.
    pub fn step(&mut self, timeout_ms: i32) -> Result<()> {
        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(1 + self.slots.len());
        fds.push(libc::pollfd {
            fd: self.listener_fd,
            events: libc::POLLIN,
            revents: 0,
        });
        let mut slot_for_fd_index = Vec::with_capacity(self.slots.len());
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(peer) = &slot.peer {
                fds.push(libc::pollfd {
                    fd: peer.fd,
                    events: 0,
                    revents: 0,
                });
                slot_for_fd_index.push(idx);
            }
        }

        let ready = posix::poll(&mut fds, timeout_ms).map_err(VrouterError::from)?;
        if ready == 0 {
            return Ok(());
        }

        if fds[0].revents & libc::POLLIN != 0 {
            self.accept_one();
        }

        for (fd_idx, pfd) in fds.iter().enumerate().skip(1) {
            if posix::has_hangup(pfd.revents) {
                let slot_idx = slot_for_fd_index[fd_idx - 1];
                self.hangup_slot(slot_idx);
            }
        }

        Ok(())
    }

    fn accept_one(&mut self) {
        let conn = match posix::accept_conn(self.listener_fd) {
            Ok(Some(fd)) => fd,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };

        let Some(slot_idx) = self.first_free_slot() else {
            warn!("peer slots exhausted, closing new connection");
            posix::close(conn);
            return;
        };

        if let Err(e) = self.handshake(slot_idx, conn) {
            warn!(error = %e, slot = slot_idx, "handshake failed, rolling back slot");
            posix::close(conn);
        }
    }

    fn handshake(&mut self, slot_idx: usize, conn: RawFd) -> Result<()> {
        debug!(slot = slot_idx, "accepted peer");

        let name = crate::shm_name::next_ring_shm_name(slot_idx);
        let mut ring_pair = RingPair::create(&name, self.shared.ring_capacity)?;

        let fd = ring_pair.object().fd().ok_or_else(|| {
            VrouterError::AllocationFailure(std::io::Error::new(
                std::io::ErrorKind::Other,
                "shm object has no descriptor to hand off",
            ))
        })?;

        posix::send_fd(conn, &[0u8], fd).map_err(VrouterError::from)?;
        debug!(slot = slot_idx, "handshake sent");

        // The mapping stays valid without the creator's own descriptor
        // open, so it is closed as soon as the peer has its own copy
        // (§6: "then closed locally").
        ring_pair.object_mut().close_local_fd();

        // `from_peer`/`to_peer` already resolve to the router-RX/router-TX
        // halves in the fixed §6 offset layout for this (unswapped) side.
        let entry = Box::new(RingSlotEntry {
            request_ring: ring_pair.from_peer(),
            response_ring: ring_pair.to_peer(),
        });
        let entry_ptr = Box::into_raw(entry);
        self.shared.poll_rings[slot_idx].store(entry_ptr, Ordering::Release);

        self.slots[slot_idx].peer = Some(ActivePeer {
            fd: conn,
            entry_ptr,
            ring_pair,
        });

        info!(slot = slot_idx, "peer active");
        Ok(())
    }

    fn hangup_slot(&mut self, slot_idx: usize) {
        let Some(peer) = self.slots[slot_idx].peer.take() else {
            return;
        };
        info!(slot = slot_idx, "peer hung up");

        self.shared.poll_rings[slot_idx].store(std::ptr::null_mut(), Ordering::Release);
        posix::close(peer.fd);

        let queued_at_sweep = self.shared.sweep_counter.load(Ordering::Acquire);
        self.shared.pending_unmap.lock().unwrap().push(PendingUnmap {
            entry_ptr: peer.entry_ptr,
            ring_pair: peer.ring_pair,
            queued_at_sweep,
        });
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Poll timeout the server uses while it has no other work — also the
    /// point at which it is considered quiescent for cancellation purposes.
    pub const POLL_TIMEOUT: Duration = Duration::from_millis(50);
}

impl Drop for TransportServer {
    fn drop(&mut self) {
        posix::close(self.listener_fd);
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
