// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lockless SPSC byte-ring with variable-length records, ported from the
// shared-memory netlink ring used by the control-plane transport
// (vr_netlink_ring.c: vr_nl_ring_enq_ptr/enq_finish/deq_ptr/deq_finish).
// Every record is prefixed by a 4-byte little-endian length header; the
// sentinel 0xFFFFFFFF means "producer gave up on this position, resume at
// offset 0". Only the producer ever mutates `head`; only the consumer ever
// mutates `tail`. No operation here blocks, sleeps, or allocates.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, VrouterError};

/// Length of the per-record header (a single little-endian u32).
pub const HDR_LEN: u32 = 4;

/// Marks "producer wrapped to offset 0 without writing a record here".
pub const SENTINEL: u32 = 0xFFFF_FFFF;

const CACHE_LINE: usize = 64;

/// The two atomic cursors for one ring half, each on its own cache line so
/// the producer's `head` writes never false-share with the consumer's
/// `tail` writes.
#[repr(C)]
pub struct RingHeader {
    head: AtomicU32,
    _pad0: [u8; CACHE_LINE - 4],
    tail: AtomicU32,
    _pad1: [u8; CACHE_LINE - 4],
}

impl RingHeader {
    /// Byte size of the header region preceding a ring's payload area.
    pub const SIZE: usize = std::mem::size_of::<RingHeader>();

    /// Reset both cursors to zero. Must only be called before any peer has
    /// mapped the ring (§4.2 "Initialization writes zeroed headers").
    pub fn reset(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
    }
}

impl Default for RingHeader {
    fn default() -> Self {
        Self {
            head: AtomicU32::new(0),
            _pad0: [0; CACHE_LINE - 4],
            tail: AtomicU32::new(0),
            _pad1: [0; CACHE_LINE - 4],
        }
    }
}

/// A view onto one half of a ring pair: a `RingHeader` plus the `capacity`
/// bytes of payload that immediately follow it in memory. Constructed by
/// pointing into a mapped shared-memory region (or, for tests, an owned
/// buffer); never owns the memory itself.
pub struct Ring {
    header: *const RingHeader,
    payload: *mut u8,
    capacity: u32,
}

// SAFETY: a `Ring` is used as an SPSC handle shared between exactly one
// producer and one consumer (possibly in different threads or processes);
// the atomics on `head`/`tail` are the only synchronization needed, and the
// payload bytes are only touched by the side that currently owns that
// region per the happens-before edges the atomics establish.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Construct a view over a ring half living at `header`/`payload` with
    /// `capacity` bytes of payload.
    ///
    /// # Safety
    /// `header` must point to a valid, non-aliased `RingHeader`, and
    /// `payload` must point to at least `capacity` writable bytes that
    /// outlive this `Ring`. The caller must ensure at most one producer and
    /// one consumer ever use the returned handle concurrently.
    pub unsafe fn new(header: *const RingHeader, payload: *mut u8, capacity: u32) -> Self {
        Self {
            header,
            payload,
            capacity,
        }
    }

    pub(crate) fn header(&self) -> &RingHeader {
        unsafe { &*self.header }
    }

    unsafe fn read_len_at(&self, offset: u32) -> u32 {
        let p = self.payload.add(offset as usize) as *const u32;
        u32::from_le(std::ptr::read(p))
    }

    unsafe fn write_len_at(&self, offset: u32, len: u32) {
        let p = self.payload.add(offset as usize) as *mut u32;
        std::ptr::write(p, len.to_le());
    }

    unsafe fn write_payload_at(&self, offset: u32, src: &[u8]) {
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.payload.add(offset as usize), src.len());
    }

    unsafe fn payload_ptr(&self, offset: u32) -> *const u8 {
        self.payload.add(offset as usize)
    }

    /// Enqueue `src` as a single record. Never blocks; fails with
    /// [`VrouterError::RingFull`] if no placement exists (§4.1 case 4).
    pub fn enqueue(&self, src: &[u8]) -> Result<()> {
        self.enqueue_iov(&[src])
    }

    /// Enqueue the concatenation of `iov` as a single contiguous record.
    /// The whole message must fit without an intra-record wrap.
    pub fn enqueue_iov(&self, iov: &[&[u8]]) -> Result<()> {
        let len: u32 = iov.iter().map(|s| s.len() as u32).sum();
        let hdr = self.header();
        let h = hdr.head.load(Ordering::Relaxed);
        let t = hdr.tail.load(Ordering::Acquire);
        let cap = self.capacity;

        let write_at = if h >= t {
            if h + HDR_LEN + len <= cap {
                h
            } else if h + HDR_LEN <= cap && HDR_LEN + len < t {
                // Producer cannot fit after `h`; mark it and wrap to 0.
                unsafe { self.write_len_at(h, SENTINEL) };
                0
            } else {
                return Err(VrouterError::RingFull);
            }
        } else if t - h > len + HDR_LEN {
            h
        } else {
            return Err(VrouterError::RingFull);
        };

        unsafe {
            self.write_len_at(write_at, len);
            let mut off = write_at + HDR_LEN;
            for chunk in iov {
                self.write_payload_at(off, chunk);
                off += chunk.len() as u32;
            }
        }

        let new_head = write_at + HDR_LEN + len;
        hdr.head.store(new_head, Ordering::Release);
        Ok(())
    }

    /// Borrow the next record without consuming it. Returns `(ptr, len)`;
    /// the caller must not retain `ptr` past the matching [`Ring::advance`].
    pub fn peek(&self) -> Option<(*const u8, u32)> {
        let hdr = self.header();
        let h = hdr.head.load(Ordering::Acquire);
        let t = hdr.tail.load(Ordering::Relaxed);
        if h == t {
            return None;
        }

        let (tail, len) = unsafe {
            let mut tail = t;
            let mut len = self.read_len_at(tail);
            if len == SENTINEL {
                tail = 0;
                len = self.read_len_at(tail);
            }
            (tail, len)
        };

        Some((unsafe { self.payload_ptr(tail + HDR_LEN) }, len))
    }

    /// Copy out and consume the next record, if any. Not used on the
    /// forwarding hot path; convenient for control-plane call sites.
    pub fn dequeue_buf(&self) -> Option<Vec<u8>> {
        let (ptr, len) = self.peek()?;
        let buf = unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec();
        self.advance();
        Some(buf)
    }

    /// Advance `tail` past the record last returned by [`Ring::peek`].
    ///
    /// Recomputes the wrapped/non-wrapped case unconditionally from the
    /// current `tail` rather than trusting a value cached by a prior
    /// `peek` call — the simpler of the two variants in the source, and
    /// the one this ring implements (§9 open question 2).
    ///
    /// Precondition: a prior `peek` returned `Some`.
    pub fn advance(&self) {
        let hdr = self.header();
        let t = hdr.tail.load(Ordering::Relaxed);

        let (tail, len) = unsafe {
            let mut tail = t;
            let mut len = self.read_len_at(tail);
            if len == SENTINEL {
                tail = 0;
                len = self.read_len_at(tail);
            }
            (tail, len)
        };

        hdr.tail.store(tail + HDR_LEN + len, Ordering::Release);
    }

    /// `true` iff `head == tail` (no pending records). Racy w.r.t. a
    /// concurrent producer; useful for tests and diagnostics only.
    pub fn is_empty(&self) -> bool {
        let hdr = self.header();
        hdr.head.load(Ordering::Acquire) == hdr.tail.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// An owned ring half, backed by a heap allocation instead of shared
/// memory. Used by unit tests, benches, and any purely in-process SPSC use
/// (e.g. future software-ring reuse) where a shared-memory mapping would be
/// overkill.
pub struct OwnedRing {
    header: Box<RingHeader>,
    payload: Vec<u8>,
}

impl OwnedRing {
    pub fn new(capacity: u32) -> Self {
        Self {
            header: Box::new(RingHeader::default()),
            payload: vec![0u8; capacity as usize],
        }
    }

    /// Borrow a [`Ring`] view over this allocation.
    pub fn view(&mut self) -> Ring {
        let header = self.header.as_ref() as *const RingHeader;
        let payload = self.payload.as_mut_ptr();
        let capacity = self.payload.len() as u32;
        unsafe { Ring::new(header, payload, capacity) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_three_records_in_order() {
        let mut owned = OwnedRing::new(512);
        let ring = owned.view();

        ring.enqueue(&[1u8; 100]).unwrap();
        ring.enqueue(&[2u8; 200]).unwrap();
        ring.enqueue(&[3u8; 50]).unwrap();

        assert_eq!(ring.header().head.load(Ordering::Relaxed), 362);

        for expect in [1u8, 2u8, 3u8] {
            let (ptr, len) = ring.peek().unwrap();
            let got = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
            assert!(got.iter().all(|&b| b == expect));
            ring.advance();
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn scenario_2_wrap_with_sentinel() {
        // head=500, tail=100 inside a CAP=512 ring: a 50-byte enqueue must
        // write the sentinel at 500 and the real record at 0.
        let mut owned = OwnedRing::new(512);
        {
            let ring = owned.view();
            let hdr = ring.header();
            hdr.head.store(500, Ordering::Relaxed);
            hdr.tail.store(100, Ordering::Relaxed);
        }
        let ring = owned.view();
        ring.enqueue(&[7u8; 50]).unwrap();
        assert_eq!(ring.header().head.load(Ordering::Relaxed), 54);
        assert_eq!(unsafe { ring.read_len_at(500) }, SENTINEL);
        assert_eq!(unsafe { ring.read_len_at(0) }, 50);
    }

    #[test]
    fn full_when_no_contiguous_region_exists() {
        let mut owned = OwnedRing::new(32);
        let ring = owned.view();
        // HDR_LEN=4, so a 28-byte record exactly exhausts the ring once.
        ring.enqueue(&[1u8; 24]).unwrap();
        let err = ring.enqueue(&[2u8; 24]).unwrap_err();
        assert!(matches!(err, VrouterError::RingFull));
    }

    #[test]
    fn peek_without_advance_is_idempotent() {
        let mut owned = OwnedRing::new(128);
        let ring = owned.view();
        ring.enqueue(b"hello").unwrap();
        let (p1, l1) = ring.peek().unwrap();
        let (p2, l2) = ring.peek().unwrap();
        assert_eq!(p1, p2);
        assert_eq!(l1, l2);
    }

    #[test]
    fn enqueue_iov_concatenates_contiguously() {
        let mut owned = OwnedRing::new(128);
        let ring = owned.view();
        ring.enqueue_iov(&[b"foo", b"bar"]).unwrap();
        let (ptr, len) = ring.peek().unwrap();
        assert_eq!(len, 6);
        let got = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
        assert_eq!(got, b"foobar");
    }

    #[test]
    fn dequeue_buf_copies_and_advances() {
        let mut owned = OwnedRing::new(128);
        let ring = owned.view();
        ring.enqueue(b"payload").unwrap();
        let buf = ring.dequeue_buf().unwrap();
        assert_eq!(buf, b"payload");
        assert!(ring.is_empty());
    }

    #[test]
    fn producer_consumer_interleaving_preserves_order_and_bytes() {
        let mut owned = OwnedRing::new(256);
        let ring = owned.view();
        let mut expected = Vec::new();
        for i in 0..20u8 {
            let rec: Vec<u8> = (0..(i % 7) + 1).map(|_| i).collect();
            ring.enqueue(&rec).unwrap();
            expected.push(rec);
            // Interleave: drain immediately every other record, matching a
            // single producer/single consumer racing in lockstep.
            if i % 2 == 1 {
                while let Some(buf) = ring.dequeue_buf() {
                    assert_eq!(buf, expected.remove(0));
                }
            }
        }
        while let Some(buf) = ring.dequeue_buf() {
            assert_eq!(buf, expected.remove(0));
        }
        assert!(expected.is_empty());
    }
}
