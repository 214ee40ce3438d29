// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The transport and shared-memory objects only ever run on Linux (shm_open,
// POLLHUP, AF_UNIX, /var/run paths); there is no Windows backend here.

pub mod posix;
