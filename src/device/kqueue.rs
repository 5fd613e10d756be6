//! macOS kqueue backend.
//!
//! Change records map directly onto `kevent` changelists: `EV_ADD` plus
//! `EV_CLEAR` for edge-triggered registrations, `EV_DELETE` per filter on
//! removal. Event records carry `EV_EOF` as `eof`, `fflags` as `error_data`,
//! and `EV_ERROR` as `device_error` (with the errno in `error_data`).

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use libc::{
    kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_CLEAR, EV_DELETE, EV_EOF,
    EV_ERROR,
};
use smallvec::SmallVec;

use super::{DeviceEvent, Filter, ReadinessDevice};
use crate::sys;

/// Kqueue-backed readiness device.
pub struct KqueueDevice {
    kq: RawFd,
    buf: Vec<kevent>,
}

impl KqueueDevice {
    /// Creates the kqueue instance (close-on-exec).
    pub fn new() -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        sys::set_close_on_exec(kq)?;
        Ok(Self { kq, buf: Vec::new() })
    }

    fn change(fd: RawFd, filter: i16, flags: u16, user: u64) -> kevent {
        kevent {
            ident: fd as usize,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: user as *mut libc::c_void,
        }
    }
}

impl ReadinessDevice for KqueueDevice {
    fn add(
        &mut self,
        fd: RawFd,
        user: u64,
        read: bool,
        write: bool,
        edge_triggered: bool,
    ) -> io::Result<()> {
        let mut flags = EV_ADD;
        if edge_triggered {
            flags |= EV_CLEAR;
        }

        let mut changes: SmallVec<[kevent; 2]> = SmallVec::new();
        if read {
            changes.push(Self::change(fd, EVFILT_READ, flags, user));
        }
        if write {
            changes.push(Self::change(fd, EVFILT_WRITE, flags, user));
        }
        debug_assert!(!changes.is_empty());

        let rc = unsafe {
            kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        // Delete each filter on its own; only one of the two may be present.
        for filter in [EVFILT_READ, EVFILT_WRITE] {
            let change = Self::change(fd, filter, EV_DELETE, 0);
            unsafe {
                kevent(self.kq, &change, 1, ptr::null_mut(), 0, ptr::null());
            }
        }
        Ok(())
    }

    fn wait(
        &mut self,
        events: &mut Vec<DeviceEvent>,
        timeout: Option<Duration>,
        max_events: usize,
    ) -> io::Result<()> {
        events.clear();
        let max_events = max_events.max(1);
        self.buf.clear();
        self.buf.reserve(max_events);

        let ts;
        let ts_ptr = match timeout {
            Some(t) => {
                ts = timespec {
                    tv_sec: t.as_secs().min(i64::MAX as u64) as libc::time_t,
                    tv_nsec: libc::c_long::from(t.subsec_nanos()),
                };
                &ts as *const timespec
            }
            None => ptr::null(),
        };

        let n = unsafe {
            kevent(
                self.kq,
                ptr::null(),
                0,
                self.buf.as_mut_ptr(),
                max_events as i32,
                ts_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        unsafe {
            self.buf.set_len(n as usize);
        }

        for ev in &self.buf {
            let filter = match ev.filter {
                EVFILT_READ => Filter::Read,
                EVFILT_WRITE => Filter::Write,
                _ => continue,
            };
            let device_error = ev.flags & EV_ERROR != 0;
            events.push(DeviceEvent {
                user: ev.udata as u64,
                filter,
                eof: ev.flags & EV_EOF != 0,
                error_data: if device_error {
                    ev.data as i64
                } else {
                    i64::from(ev.fflags)
                },
                device_error,
            });
        }
        Ok(())
    }
}

// kevent buffers are plain data; the raw pointers inside are user tokens.
unsafe impl Send for KqueueDevice {}

impl Drop for KqueueDevice {
    fn drop(&mut self) {
        sys::sys_close(self.kq);
    }
}
