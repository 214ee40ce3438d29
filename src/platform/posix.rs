// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Raw POSIX primitives backing the shared-memory objects and the unix
// domain socket transport: shm creation/mapping and SCM_RIGHTS fd passing.
// Everything here is a thin, allocation-free wrapper over a single libc
// call; callers own the higher-level protocol.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr;

/// Create a new shared-memory object of `len` bytes, map it `MAP_LOCKED`
/// (page-locked, never swapped), and unlink its name immediately — the
/// object is kept alive only by the mapping and by whichever file
/// descriptors still reference it (§6: objects are unlinked right after
/// creation and handed to the peer purely by descriptor).
///
/// Returns the open descriptor (still valid after the unlink) and the
/// mapped base address.
pub fn shm_create(name: &str, len: usize) -> io::Result<(RawFd, *mut u8)> {
    let c_name =
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe {
        libc::shm_open(
            c_name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600,
        )
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
            libc::shm_unlink(c_name.as_ptr());
        }
        return Err(err);
    }

    let map = map_fd(fd, len);
    // Unlink regardless of mmap outcome: a failed create must not leak a
    // named object, and a successful one no longer needs its name.
    unsafe { libc::shm_unlink(c_name.as_ptr()) };

    match map {
        Ok(ptr) => Ok((fd, ptr)),
        Err(err) => {
            unsafe { libc::close(fd) };
            Err(err)
        }
    }
}

/// Map an already-open shared-memory descriptor (typically just received
/// over `SCM_RIGHTS`) at `len` bytes.
pub fn map_fd(fd: RawFd, len: usize) -> io::Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_LOCKED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

/// # Safety
/// `ptr`/`len` must be the exact pair returned by a prior `shm_create` or
/// `map_fd`, and must not be used again afterward.
pub unsafe fn unmap(ptr: *mut u8, len: usize) {
    libc::munmap(ptr as *mut libc::c_void, len);
}

/// Send `payload` on `sock` with `fd` attached as an `SCM_RIGHTS` control
/// message — the sole mechanism by which a shared-memory object's
/// descriptor crosses the process boundary (§6 handshake).
pub fn send_fd(sock: RawFd, payload: &[u8], fd: RawFd) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cbuf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cbuf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
        ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);
    }

    let ret = unsafe { libc::sendmsg(sock, &msg, 0) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receive a message on `sock` into `buf`, extracting a passed descriptor
/// if the peer attached one. Returns the byte count read and the fd, if any.
pub fn recv_fd(sock: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<RawFd>)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cbuf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cbuf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    let n = unsafe { libc::recvmsg(sock, &mut msg, 0) };
    if n == -1 {
        return Err(io::Error::last_os_error());
    }

    let mut fd = None;
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if !cmsg.is_null()
            && (*cmsg).cmsg_level == libc::SOL_SOCKET
            && (*cmsg).cmsg_type == libc::SCM_RIGHTS
        {
            fd = Some(ptr::read(libc::CMSG_DATA(cmsg) as *const RawFd));
        }
    }
    Ok((n as usize, fd))
}

/// Thin wrapper over `poll(2)`. Returns the number of descriptors with
/// pending events.
pub fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<usize> {
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}

/// `true` iff the peer side of a stream socket hung up (§4.3 `Hangup`
/// transition; the server never needs to actually read to detect this).
pub fn has_hangup(revents: i16) -> bool {
    revents & libc::POLLHUP != 0
}

/// Bind and listen on a local unix domain stream socket at `path`,
/// removing any stale socket file left behind by a prior run. Returns a
/// non-blocking listening descriptor.
pub fn unix_listener(path: &Path, backlog: i32) -> io::Result<RawFd> {
    let _ = std::fs::remove_file(path);

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    let addr = unix_sockaddr(path)?;
    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    if unsafe { libc::listen(fd, backlog) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    set_nonblocking(fd)?;
    Ok(fd)
}

fn unix_sockaddr(path: &Path) -> io::Result<libc::sockaddr_un> {
    let bytes = path.as_os_str().as_bytes();
    // -1 for the mandatory trailing NUL.
    if bytes.len() >= mem::size_of::<libc::sockaddr_un>() - 2 - 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long",
        ));
    }
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = src as libc::c_char;
    }
    Ok(addr)
}

/// Connect to a local unix domain stream socket at `path`. Used by the
/// agent-side half of the transport (demo binaries, tests).
pub fn unix_connect(path: &Path) -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    let addr = unix_sockaddr(path)?;
    let ret = unsafe {
        libc::connect(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }
    Ok(fd)
}

/// Accept one pending connection on a non-blocking listener. `Ok(None)`
/// means no connection was pending.
pub fn accept_conn(listener_fd: RawFd) -> io::Result<Option<RawFd>> {
    let fd = unsafe { libc::accept(listener_fd, ptr::null_mut(), ptr::null_mut()) };
    if fd == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    set_nonblocking(fd)?;
    Ok(Some(fd))
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Non-blocking plain-byte read (no `SCM_RIGHTS`). `Ok(None)` means the
/// descriptor had nothing pending; `Ok(Some(0))` means the peer closed its
/// write side.
pub fn try_read(fd: RawFd, buf: &mut [u8]) -> io::Result<Option<usize>> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(n as usize))
}

/// Non-blocking plain-byte write. `Ok(None)` means the descriptor's send
/// buffer was full; the caller retries on a later pass.
pub fn try_write(fd: RawFd, buf: &[u8]) -> io::Result<Option<usize>> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(n as usize))
}
