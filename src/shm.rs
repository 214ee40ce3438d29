// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory object lifecycle (§4.2). An object is created, mapped,
// unlinked by name immediately, and its descriptor is handed to the peer
// out-of-band over the transport socket's `SCM_RIGHTS` control channel —
// the object lives only as long as some descriptor still references it,
// never by POSIX name.

use std::os::unix::io::RawFd;

use crate::error::Result;
use crate::platform::posix;
use crate::ring::{Ring, RingHeader};

/// A mapped, page-locked shared-memory region backing one ring pair.
///
/// Owns exactly one of: the descriptor returned at creation time (before
/// handoff), or nothing once [`ShmObject::take_fd_for_handoff`] has moved
/// the descriptor out to be sent to the peer. Either way, the mapping
/// itself stays valid until `Drop` — `munmap` does not require the
/// creating descriptor to remain open.
pub struct ShmObject {
    fd: Option<RawFd>,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapped region is shared across processes by construction;
// `ShmObject` itself is moved between at most one creator thread and one
// handoff point, never concurrently mutated through the Rust type.
unsafe impl Send for ShmObject {}
unsafe impl Sync for ShmObject {}

impl ShmObject {
    /// Create and map a new shared-memory object of `len` bytes, using
    /// `name` as its (immediately unlinked) POSIX name.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let (fd, ptr) = posix::shm_create(name, len)?;
        Ok(Self {
            fd: Some(fd),
            ptr,
            len,
        })
    }

    /// Map a descriptor received from a peer over `SCM_RIGHTS`. Takes
    /// ownership of `fd`.
    pub fn from_received_fd(fd: RawFd, len: usize) -> Result<Self> {
        let ptr = posix::map_fd(fd, len)?;
        Ok(Self {
            fd: Some(fd),
            ptr,
            len,
        })
    }

    /// Base address of the mapping.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Descriptor to attach as an `SCM_RIGHTS` control message when handing
    /// this object to a peer. Does not transfer ownership — call
    /// [`ShmObject::close_local_fd`] once the send has completed, since the
    /// mapping remains valid without a locally open descriptor.
    pub fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// Close this side's descriptor after it has been sent to the peer.
    /// The mapping stays valid; only the local bookkeeping reference is
    /// released (§6: "handed to the peer... then closed locally").
    pub fn close_local_fd(&mut self) {
        if let Some(fd) = self.fd.take() {
            unsafe { libc::close(fd) };
        }
    }
}

impl Drop for ShmObject {
    fn drop(&mut self) {
        unsafe { posix::unmap(self.ptr, self.len) };
        if let Some(fd) = self.fd.take() {
            unsafe { libc::close(fd) };
        }
    }
}

/// The two independent, opposite-direction rings that make up one peer's
/// shared-memory connection: `to_peer` carries records the owning side
/// enqueues and the peer dequeues, `from_peer` the reverse. Both halves
/// live in a single mapping at fixed offsets — half 0 is always the
/// router-RX ring header, half 1 always the router-TX ring header (§6) —
/// so a single descriptor handoff is enough to give the peer both
/// directions (§3 "Shared Memory Pair", §9 design note on the
/// response-queue slot).
pub struct RingPair {
    object: ShmObject,
    ring_capacity: u32,
    /// `false`: this view is the router's (the creator's) — `to_peer` is
    /// half 1 (router-TX), `from_peer` is half 0 (router-RX). `true`: the
    /// mirror image, i.e. the receiving peer's view of the same mapping.
    swapped: bool,
}

impl RingPair {
    /// Total bytes a ring pair of the given per-half payload `ring_capacity`
    /// occupies.
    pub fn total_len(ring_capacity: u32) -> usize {
        2 * (RingHeader::SIZE + ring_capacity as usize)
    }

    fn half_offset(ring_capacity: u32, half: usize) -> usize {
        half * (RingHeader::SIZE + ring_capacity as usize)
    }

    /// Create a fresh, zero-initialized ring pair backed by a new
    /// shared-memory object.
    pub fn create(name: &str, ring_capacity: u32) -> Result<Self> {
        let object = ShmObject::create(name, Self::total_len(ring_capacity))?;
        let pair = Self {
            object,
            ring_capacity,
            swapped: false,
        };
        pair.to_peer().header().reset();
        pair.from_peer().header().reset();
        Ok(pair)
    }

    /// Wrap a ring pair whose backing object was received from a peer.
    /// Headers are left as mapped — the creating side already zeroed them.
    /// The receiving side's `to_peer`/`from_peer` are the mirror image of
    /// the creator's, since both map the same bytes.
    pub fn from_received(object: ShmObject, ring_capacity: u32) -> Self {
        Self {
            object,
            ring_capacity,
            swapped: true,
        }
    }

    fn ring_at(&self, half: usize) -> Ring {
        let base = unsafe {
            self.object
                .as_mut_ptr()
                .add(Self::half_offset(self.ring_capacity, half))
        };
        let header = base as *const RingHeader;
        let payload = unsafe { base.add(RingHeader::SIZE) };
        unsafe { Ring::new(header, payload, self.ring_capacity) }
    }

    /// The ring this side enqueues into. Half 1 (router-TX) for the
    /// router's own view, half 0 for the peer's mirrored view.
    pub fn to_peer(&self) -> Ring {
        self.ring_at(if self.swapped { 0 } else { 1 })
    }

    /// The ring this side dequeues from. Half 0 (router-RX) for the
    /// router's own view, half 1 for the peer's mirrored view.
    pub fn from_peer(&self) -> Ring {
        self.ring_at(if self.swapped { 1 } else { 0 })
    }

    pub fn object(&self) -> &ShmObject {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut ShmObject {
        &mut self.object
    }

    pub fn ring_capacity(&self) -> u32 {
        self.ring_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ring header layout must be self-consistent regardless of the platform
    // shm backend; this doesn't touch shm_open at all.
    #[test]
    fn total_len_accounts_for_both_halves() {
        assert_eq!(
            RingPair::total_len(1024),
            2 * (RingHeader::SIZE + 1024)
        );
    }
}
