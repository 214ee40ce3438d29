// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// CPU pinning and real-time scheduling for pinned lcore workers (§4.5
// "pinned worker"). A worker that is not pinned and not SCHED_FIFO can be
// preempted mid-burst by the kernel scheduler, which defeats the cooperative
// scheduling model the whole lcore design assumes.

use std::io;

/// Pin the calling thread to a single CPU core. The lcore dispatcher calls
/// this once, immediately after spawning each worker thread and before it
/// starts polling any queue.
pub fn pin_cpu(core_id: usize) -> io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Raise the calling thread to `SCHED_FIFO` at `priority` (1-99; higher
/// runs first). Requires `CAP_SYS_NICE` or root — callers should treat
/// failure as non-fatal and keep running at the default scheduling class.
pub fn set_realtime_priority(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_cpu_to_current_core_succeeds() {
        // Pinning to whichever core we're already free to run on should
        // always succeed, independent of how many cores the host has.
        let here = unsafe { libc::sched_getcpu() };
        if here >= 0 {
            pin_cpu(here as usize).expect("pin to current core");
        }
    }
}
