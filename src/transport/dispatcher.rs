// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport Dispatcher (§4.4): single worker that scans every connected
// peer's request ring, decodes each record, invokes the message handler,
// and serializes the accumulated responses back into that peer's response
// ring. A pure reader of `poll_rings`; the sole drainer of `pending_unmap`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::VrouterError;
use crate::transport::message::NetlinkMessage;
use crate::transport::server::TransportShared;

/// Handles one decoded request, producing zero or more response payloads
/// in emission order. The netlink framing and multi-part flagging around
/// each payload is the dispatcher's job, not the handler's (§4.4: "the
/// Netlink message parser" is an out-of-scope collaborator, §1).
pub trait MessageHandler: Send + Sync {
    fn handle(&self, request: &[u8]) -> Vec<Vec<u8>>;
}

/// Trivial handler that echoes the request back as the sole response.
/// Used by `vrouter_transport_demo` (§10.5) and dispatcher tests.
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn handle(&self, request: &[u8]) -> Vec<Vec<u8>> {
        vec![request.to_vec()]
    }
}

pub struct TransportDispatcher<H: MessageHandler> {
    shared: Arc<TransportShared>,
    handler: H,
}

impl<H: MessageHandler> TransportDispatcher<H> {
    pub fn new(shared: Arc<TransportShared>, handler: H) -> Self {
        Self { shared, handler }
    }

    /// One full sweep over every peer slot, matching §4.4's pseudocode
    /// exactly: drain each non-null ring to exhaustion, then reclaim
    /// whatever became eligible for unmap before this sweep started.
    pub fn step(&self) {
        for slot in 0..self.shared.max_peers() {
            self.drain_slot(slot);
        }
        self.shared.reclaim_pending();
    }

    fn drain_slot(&self, slot: usize) {
        let entry_ptr = self.shared.poll_ring(slot);
        if entry_ptr.is_null() {
            return;
        }
        // SAFETY: non-null only while the server keeps the backing
        // RingSlotEntry alive; the server never frees it before this
        // dispatcher has observed the null store that precedes removal.
        let entry = unsafe { &*entry_ptr };

        loop {
            let Some((ptr, len)) = entry.request_ring.peek() else {
                break;
            };
            let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec();
            self.handle_request(slot, &entry.response_ring, &bytes);
            entry.request_ring.advance();
        }
    }

    fn handle_request(&self, slot: usize, response_ring: &crate::ring::Ring, raw: &[u8]) {
        let request = match NetlinkMessage::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(slot, error = %e, "dropping malformed request");
                return;
            }
        };

        trace!(slot, seq = request.seq, "dispatching request");
        let responses = self.handler.handle(&request.payload);
        let last = responses.len().saturating_sub(1);

        for (i, payload) in responses.into_iter().enumerate() {
            let wire = NetlinkMessage {
                seq: request.seq,
                multi: i != last,
                payload,
            }
            .encode();

            if let Err(VrouterError::RingFull) = response_ring.enqueue(&wire) {
                warn!(slot, seq = request.seq, "response ring full, dropping remainder");
                break;
            }
        }
    }

    /// Sleep interval between sweeps when nothing is pending; the service
    /// loop calls `step` at its own cadence rather than this looping
    /// internally, so this is advisory for callers driving their own loop.
    pub const IDLE_SLEEP: Duration = Duration::from_millis(5);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::RingPair;

    #[test]
    fn echoes_request_as_single_response() {
        let shared = Arc::new(TransportShared::new(1, 4096));
        let mut pair = RingPair::create("/vrouter-test-dispatch-1", 4096).unwrap();
        let entry = Box::new(crate::transport::server::RingSlotEntry {
            request_ring: pair.from_peer(),
            response_ring: pair.to_peer(),
        });
        let entry_ptr = Box::into_raw(entry);
        shared.poll_rings_for_test()[0].store(entry_ptr, std::sync::atomic::Ordering::Release);

        let request = NetlinkMessage {
            seq: 5,
            multi: false,
            payload: b"ping".to_vec(),
        }
        .encode();
        pair.from_peer().enqueue(&request).unwrap();

        let dispatcher = TransportDispatcher::new(shared, EchoHandler);
        dispatcher.step();

        let (ptr, len) = pair.to_peer().peek().expect("response present");
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
        let response = NetlinkMessage::decode(bytes).unwrap();
        assert_eq!(response.seq, 5);
        assert_eq!(response.payload, b"ping");
        assert!(!response.multi);

        unsafe { drop(Box::from_raw(entry_ptr)) };
        let _ = pair;
    }
}
