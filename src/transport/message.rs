// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Netlink-shaped wire format (§6): a netlink message header, a generic
// netlink header, and a single attribute carrying the opaque protocol
// payload. Not a general netlink codec — only the one attribute this
// transport ever sends is supported.

use crate::error::{Result, VrouterError};
use std::io;

/// Attribute type carrying the opaque protocol message (§6).
pub const NL_ATTR_VR_MESSAGE_PROTOCOL: u16 = 1;

/// Netlink multipart-message flag, set on every response but the last.
pub const NLM_F_MULTI: u16 = 0x2;

const NLMSG_HDR_LEN: usize = 16;
const GENLMSG_HDR_LEN: usize = 4;
const NLA_HDR_LEN: usize = 4;

fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

/// A decoded request or response: a sequence number plus the attribute
/// payload carried inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetlinkMessage {
    pub seq: u32,
    pub multi: bool,
    pub payload: Vec<u8>,
}

impl NetlinkMessage {
    /// Encode as `nlmsghdr + genlmsghdr + nlattr(payload)`.
    pub fn encode(&self) -> Vec<u8> {
        let attr_len = NLA_HDR_LEN + self.payload.len();
        let total = NLMSG_HDR_LEN + GENLMSG_HDR_LEN + nla_align(attr_len);
        let mut buf = vec![0u8; total];

        buf[0..4].copy_from_slice(&(total as u32).to_le_bytes());
        buf[4..6].copy_from_slice(&0u16.to_le_bytes()); // nlmsg_type: unused by this transport
        let flags = if self.multi { NLM_F_MULTI } else { 0 };
        buf[6..8].copy_from_slice(&flags.to_le_bytes());
        buf[8..12].copy_from_slice(&self.seq.to_le_bytes());
        buf[12..16].copy_from_slice(&0u32.to_le_bytes()); // nlmsg_pid: unused

        let genl_off = NLMSG_HDR_LEN;
        buf[genl_off] = 0; // cmd
        buf[genl_off + 1] = 1; // version
                               // buf[genl_off+2..genl_off+4] reserved, already zero

        let attr_off = genl_off + GENLMSG_HDR_LEN;
        buf[attr_off..attr_off + 2].copy_from_slice(&(attr_len as u16).to_le_bytes());
        buf[attr_off + 2..attr_off + 4]
            .copy_from_slice(&NL_ATTR_VR_MESSAGE_PROTOCOL.to_le_bytes());
        buf[attr_off + NLA_HDR_LEN..attr_off + attr_len].copy_from_slice(&self.payload);

        buf
    }

    /// Decode a single message from `buf`, which must contain exactly one
    /// encoded message (§4.1 records are already length-delimited by the
    /// ring, so no further framing is needed here).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < NLMSG_HDR_LEN + GENLMSG_HDR_LEN + NLA_HDR_LEN {
            return Err(short_buffer());
        }
        let flags = u16::from_le_bytes([buf[6], buf[7]]);
        let seq = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let attr_off = NLMSG_HDR_LEN + GENLMSG_HDR_LEN;
        let nla_len = u16::from_le_bytes([buf[attr_off], buf[attr_off + 1]]) as usize;
        let nla_type = u16::from_le_bytes([buf[attr_off + 2], buf[attr_off + 3]]);
        if nla_type != NL_ATTR_VR_MESSAGE_PROTOCOL {
            return Err(VrouterError::AllocationFailure(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected netlink attribute type {nla_type}"),
            )));
        }
        if nla_len < NLA_HDR_LEN || attr_off + nla_len > buf.len() {
            return Err(short_buffer());
        }

        let payload = buf[attr_off + NLA_HDR_LEN..attr_off + nla_len].to_vec();
        Ok(Self {
            seq,
            multi: flags & NLM_F_MULTI != 0,
            payload,
        })
    }
}

fn short_buffer() -> VrouterError {
    VrouterError::AllocationFailure(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "netlink message truncated",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let msg = NetlinkMessage {
            seq: 42,
            multi: false,
            payload: b"hello".to_vec(),
        };
        let wire = msg.encode();
        let decoded = NetlinkMessage::decode(&wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn multi_flag_roundtrips() {
        let msg = NetlinkMessage {
            seq: 7,
            multi: true,
            payload: vec![1, 2, 3],
        };
        let wire = msg.encode();
        let decoded = NetlinkMessage::decode(&wire).unwrap();
        assert!(decoded.multi);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        assert!(NetlinkMessage::decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn decode_rejects_wrong_attribute_type() {
        let mut msg = NetlinkMessage {
            seq: 1,
            multi: false,
            payload: b"x".to_vec(),
        }
        .encode();
        let attr_off = NLMSG_HDR_LEN + GENLMSG_HDR_LEN;
        msg[attr_off + 2..attr_off + 4].copy_from_slice(&99u16.to_le_bytes());
        assert!(NetlinkMessage::decode(&msg).is_err());
    }
}
