//! Readiness-device abstraction over the platform multiplexers.
//!
//! The worker talks to the kernel through [`ReadinessDevice`]: per-fd change
//! records in, normalized [`DeviceEvent`] records out. Backends translate
//! their kernel's vocabulary into the same record so the worker's decode
//! rules stay platform-independent.
//!
//! # Platform Backends
//!
//! | Platform | Backend | Module |
//! |----------|---------|--------|
//! | Linux | epoll | `epoll.rs` |
//! | macOS | kqueue | `kqueue.rs` |
//! | Testing | in-memory | `lab.rs` |
//!
//! # User Tokens
//!
//! Each registration carries an opaque `user` value echoed back in events.
//! The dispatcher registers descriptors with `user = fd + 1` and the wakeup
//! channel with [`WAKEUP_USER`] (zero), so a zero token unambiguously means
//! "interrupt pending".

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("iodispatch requires a readiness device: epoll (Linux) or kqueue (macOS)");

pub mod lab;

#[cfg(target_os = "linux")]
pub mod epoll;

#[cfg(target_os = "macos")]
pub mod kqueue;

pub use lab::{LabDevice, LabHandle, LabOp};

#[cfg(target_os = "linux")]
pub use epoll::EpollDevice;

#[cfg(target_os = "macos")]
pub use kqueue::KqueueDevice;

/// The `user` token reserved for the wakeup channel.
pub const WAKEUP_USER: u64 = 0;

/// Which half of a descriptor an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Readable (or accept-ready on a listening socket).
    Read,
    /// Writable.
    Write,
}

/// One normalized readiness event.
#[derive(Debug, Clone, Copy)]
pub struct DeviceEvent {
    /// The `user` token supplied at registration.
    pub user: u64,
    /// The filter that fired.
    pub filter: Filter,
    /// End-of-file observed on this half.
    pub eof: bool,
    /// Non-zero when an error condition accompanies `eof` (kqueue `fflags`,
    /// epoll `EPOLLERR`). Carries the errno for device-level errors.
    pub error_data: i64,
    /// The device itself failed to process this change record. Fatal.
    pub device_error: bool,
}

/// Platform multiplexer: accepts change records, yields event records.
pub trait ReadinessDevice: Send {
    /// Installs filters for `fd`. `read`/`write` select the filters;
    /// `edge_triggered` requests edge semantics (state *transitions* only).
    ///
    /// A rejection (closed fd, unsupported device such as `/dev/null`) is
    /// reported as an error for the caller to demote; it is not fatal.
    fn add(&mut self, fd: RawFd, user: u64, read: bool, write: bool, edge_triggered: bool)
        -> io::Result<()>;

    /// Removes every filter for `fd`.
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;

    /// Blocks up to `timeout` (forever when `None`) and fills `events` with
    /// up to `max_events` records. An interrupted wait yields zero events.
    fn wait(
        &mut self,
        events: &mut Vec<DeviceEvent>,
        timeout: Option<Duration>,
        max_events: usize,
    ) -> io::Result<()>;
}

/// The production backend for this platform.
#[cfg(target_os = "linux")]
pub(crate) fn platform_device() -> io::Result<Box<dyn ReadinessDevice>> {
    Ok(Box::new(EpollDevice::new()?))
}

/// The production backend for this platform.
#[cfg(target_os = "macos")]
pub(crate) fn platform_device() -> io::Result<Box<dyn ReadinessDevice>> {
    Ok(Box::new(KqueueDevice::new()?))
}
