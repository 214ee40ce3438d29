// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Agent packet I/O (§4.7): a second, independent accept loop on a distinct
// well-known socket path carrying raw non-Netlink packet frames rather than
// control messages. Unlike the netlink transport, a packet-plane connection
// carries no ring handshake — it is a bare byte pipe the service loop drains
// and fills once per round.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::{Result, VrouterError};
use crate::lcore::service::PacketPlaneStep;
use crate::platform::posix;

const FRAME_BUF_LEN: usize = 65536;

/// Owns the packet-plane listener and, once connected, the single peer
/// descriptor. `step` takes `&self` (the `PacketPlaneStep` contract), so the
/// peer fd lives behind a `Mutex` rather than requiring `&mut self`.
pub struct PacketPlane {
    listener_fd: RawFd,
    peer_fd: Mutex<Option<RawFd>>,
    socket_path: PathBuf,
}

impl PacketPlane {
    pub fn bind(run_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(run_dir).map_err(VrouterError::from)?;
        let socket_path = run_dir.join("dpdk_packet");
        let listener_fd = posix::unix_listener(&socket_path, 1).map_err(VrouterError::from)?;
        info!(path = %socket_path.display(), "packet plane listening");

        Ok(Self {
            listener_fd,
            peer_fd: Mutex::new(None),
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn accept_if_unconnected(&self) {
        let mut peer = self.peer_fd.lock().unwrap();
        if peer.is_some() {
            return;
        }
        match posix::accept_conn(self.listener_fd) {
            Ok(Some(fd)) => {
                debug!("packet plane peer connected");
                *peer = Some(fd);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "packet plane accept failed"),
        }
    }

    fn drop_peer(&self, fd: RawFd) {
        posix::close(fd);
        *self.peer_fd.lock().unwrap() = None;
    }
}

impl PacketPlaneStep for PacketPlane {
    /// While disconnected, a no-op poll for a new peer. Once connected, one
    /// non-blocking read pass followed by one non-blocking write pass
    /// (echoing whatever was read, standing in for the out-of-scope packet
    /// forwarding collaborator — §1); any I/O error drops the peer so the
    /// next round waits for a fresh connection.
    fn step(&self) -> bool {
        self.accept_if_unconnected();

        let fd = match *self.peer_fd.lock().unwrap() {
            Some(fd) => fd,
            None => return false,
        };

        let mut buf = [0u8; FRAME_BUF_LEN];
        let n = match posix::try_read(fd, &mut buf) {
            Ok(Some(0)) => {
                debug!("packet plane peer closed");
                self.drop_peer(fd);
                return false;
            }
            Ok(Some(n)) => n,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "packet plane read failed, dropping peer");
                self.drop_peer(fd);
                return false;
            }
        };

        match posix::try_write(fd, &buf[..n]) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "packet plane write failed, dropping peer");
                self.drop_peer(fd);
                false
            }
        }
    }
}

impl Drop for PacketPlane {
    fn drop(&mut self) {
        if let Some(fd) = self.peer_fd.lock().unwrap().take() {
            posix::close(fd);
        }
        posix::close(self.listener_fd);
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn no_op_while_no_peer_connected() {
        let dir = tempfile_run_dir("packet-plane-idle");
        let plane = PacketPlane::bind(&dir).unwrap();
        assert!(!plane.step());
    }

    #[test]
    fn echoes_one_frame_once_connected() {
        let dir = tempfile_run_dir("packet-plane-echo");
        let plane = PacketPlane::bind(&dir).unwrap();

        let mut client = UnixStream::connect(plane.socket_path()).unwrap();
        assert!(!plane.step()); // accepts, but nothing pending to read yet

        client.write_all(b"frame").unwrap();
        // Give the kernel a moment to make the bytes visible to a
        // non-blocking read on the other end.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(plane.step());

        let mut out = [0u8; 5];
        client.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"frame");
    }

    fn tempfile_run_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vrouter-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }
}
