//! Subscriber handles carried through interrupt messages.
//!
//! A [`SocketHandle`] stands for one application-side socket object. The
//! dispatcher never owns the handle: callers keep it in an `Arc`, and every
//! in-flight interrupt message clones one reference that the worker releases
//! on receipt. The handle therefore cannot be freed while a message naming
//! it is still in the pipe.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::port::{Port, ILLEGAL_PORT};

/// Reference-counted handle to an application socket.
#[derive(Debug)]
pub struct SocketHandle {
    fd: AtomicI32,
    owner_port: Port,
}

impl SocketHandle {
    /// Creates a handle over `fd` with no owner port.
    #[must_use]
    pub fn new(fd: RawFd) -> Self {
        Self::with_owner_port(fd, ILLEGAL_PORT)
    }

    /// Creates a handle over `fd`, recording the port that owns the socket
    /// (used when clearing signal handlers on close).
    #[must_use]
    pub fn with_owner_port(fd: RawFd, owner_port: Port) -> Self {
        Self {
            fd: AtomicI32::new(fd),
            owner_port,
        }
    }

    /// The underlying descriptor, or `-1` once detached.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// The owning port recorded at construction.
    #[must_use]
    pub fn owner_port(&self) -> Port {
        self.owner_port
    }

    /// Detaches the handle from its descriptor without closing it. The
    /// worker closes the descriptor itself when the dispatch state is
    /// destroyed; a shared listening fd may stay open for other handles.
    pub fn detach(&self) {
        self.fd.store(-1, Ordering::Release);
    }

    /// Leaks one reference for the message that will carry it. The worker
    /// balances this with [`from_message_id`](Self::from_message_id).
    pub(crate) fn into_message_id(handle: &Arc<SocketHandle>) -> i64 {
        Arc::into_raw(Arc::clone(handle)) as usize as i64
    }

    /// Reclaims the reference leaked by [`into_message_id`](Self::into_message_id).
    ///
    /// # Safety
    ///
    /// `id` must be a value produced by `into_message_id` that has not been
    /// reclaimed yet.
    pub(crate) unsafe fn from_message_id(id: i64) -> Arc<SocketHandle> {
        unsafe { Arc::from_raw(id as usize as *const SocketHandle) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_clears_fd() {
        let handle = SocketHandle::new(42);
        assert_eq!(handle.fd(), 42);
        handle.detach();
        assert_eq!(handle.fd(), -1);
    }

    #[test]
    fn owner_port_defaults_to_illegal() {
        assert_eq!(SocketHandle::new(3).owner_port(), ILLEGAL_PORT);
        assert_eq!(SocketHandle::with_owner_port(3, 99).owner_port(), 99);
    }

    #[test]
    fn message_id_round_trip_balances_references() {
        let handle = Arc::new(SocketHandle::new(7));
        let id = SocketHandle::into_message_id(&handle);
        assert_eq!(Arc::strong_count(&handle), 2);

        let carried = unsafe { SocketHandle::from_message_id(id) };
        assert_eq!(carried.fd(), 7);
        drop(carried);
        assert_eq!(Arc::strong_count(&handle), 1);
    }
}
