//! External collaborators: the listening-socket registry and signal-handler
//! table.
//!
//! Both are modeled as injected traits with stock implementations, so the
//! dispatcher core never reaches for process-wide singletons directly.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use parking_lot::Mutex;

use crate::port::Port;
use crate::socket::SocketHandle;

/// Coordinates shared listening descriptors across dispatch clients.
///
/// Multiple handles may refer to the same listening fd. When a `CLOSE`
/// command arrives for a listening descriptor, the worker queries
/// [`close_safe`](Self::close_safe) under the registry's own lock; only a
/// `true` answer lets it destroy the dispatch state and close the fd.
pub trait SharedSocketRegistry: Send + Sync {
    /// Returns true when `socket` holds the last reference to its listening
    /// fd and the fd may be closed.
    fn close_safe(&self, socket: &SocketHandle) -> bool;
}

/// Stock registry: a share count per listening fd.
///
/// Descriptors never announced via [`add_share`](Self::add_share) are
/// treated as sole owners, so embedders that never share listening sockets
/// can use the default registry untouched.
#[derive(Debug, Default)]
pub struct FdShareRegistry {
    shares: Mutex<HashMap<RawFd, usize>>,
}

impl FdShareRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more user of `fd`.
    pub fn add_share(&self, fd: RawFd) {
        *self.shares.lock().entry(fd).or_insert(0) += 1;
    }
}

impl SharedSocketRegistry for FdShareRegistry {
    fn close_safe(&self, socket: &SocketHandle) -> bool {
        let mut shares = self.shares.lock();
        match shares.get_mut(&socket.fd()) {
            None => true,
            Some(count) if *count <= 1 => {
                shares.remove(&socket.fd());
                true
            }
            Some(count) => {
                *count -= 1;
                false
            }
        }
    }
}

/// Clears process signal handlers keyed by fd when a signal socket closes.
pub trait SignalHandlers: Send + Sync {
    /// Drops any signal handler registered for `fd` on behalf of
    /// `owner_port`.
    fn clear_by_fd(&self, fd: RawFd, owner_port: Port);
}

/// Stock no-op implementation for embedders without signal plumbing.
#[derive(Debug, Default)]
pub struct NoSignalHandlers;

impl SignalHandlers for NoSignalHandlers {
    fn clear_by_fd(&self, _fd: RawFd, _owner_port: Port) {}
}
