//! Linux epoll backend.
//!
//! Functionally equivalent to the kqueue backend and selected automatically
//! on Linux targets. Kernel bits normalize into [`DeviceEvent`] as follows:
//! `EPOLLHUP`/`EPOLLRDHUP` become `eof`, `EPOLLERR` becomes `eof` with
//! non-zero `error_data`. Registration errors surface synchronously from
//! `epoll_ctl`, so `device_error` never fires here.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL,
};

use super::{DeviceEvent, Filter, ReadinessDevice};
use crate::sys;

/// Epoll-backed readiness device.
pub struct EpollDevice {
    epoll: RawFd,
    buf: Vec<epoll_event>,
}

impl EpollDevice {
    /// Creates the epoll instance (close-on-exec).
    pub fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll,
            buf: Vec::new(),
        })
    }
}

impl ReadinessDevice for EpollDevice {
    fn add(
        &mut self,
        fd: RawFd,
        user: u64,
        read: bool,
        write: bool,
        edge_triggered: bool,
    ) -> io::Result<()> {
        let mut flags = 0i32;
        if read {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if write {
            flags |= EPOLLOUT;
        }
        if edge_triggered {
            flags |= EPOLLET;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: user,
        };
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
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
        let timeout_ms = timeout.map_or(-1i32, |t| t.as_millis().min(i32::MAX as u128) as i32);

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.buf.as_mut_ptr(),
                max_events as i32,
                timeout_ms,
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
            let bits = ev.events as i32;
            let err = bits & EPOLLERR != 0;
            let read_side = bits & (EPOLLIN | EPOLLHUP | EPOLLRDHUP) != 0 || err;
            if read_side {
                events.push(DeviceEvent {
                    user: ev.u64,
                    filter: Filter::Read,
                    eof: bits & (EPOLLHUP | EPOLLRDHUP) != 0 || err,
                    error_data: i64::from(err),
                    device_error: false,
                });
            }
            if bits & EPOLLOUT != 0 {
                events.push(DeviceEvent {
                    user: ev.u64,
                    filter: Filter::Write,
                    eof: bits & EPOLLHUP != 0 || err,
                    error_data: i64::from(err),
                    device_error: false,
                });
            }
        }
        Ok(())
    }
}

impl Drop for EpollDevice {
    fn drop(&mut self) {
        sys::sys_close(self.epoll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::{make_pipe, sys_close, sys_write};

    #[test]
    fn readable_pipe_reports_read_event() {
        let mut device = EpollDevice::new().expect("epoll");
        let (read_fd, write_fd) = make_pipe().expect("pipe");
        device.add(read_fd, 7, true, false, false).expect("add");

        assert_eq!(sys_write(write_fd, b"x"), 1);

        let mut events = Vec::new();
        device
            .wait(&mut events, Some(Duration::from_millis(500)), 16)
            .expect("wait");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user, 7);
        assert_eq!(events[0].filter, Filter::Read);
        assert!(!events[0].eof);
        assert_eq!(events[0].error_data, 0);

        device.remove(read_fd).expect("remove");
        sys_close(read_fd);
        sys_close(write_fd);
    }

    #[test]
    fn closed_writer_reports_eof() {
        let mut device = EpollDevice::new().expect("epoll");
        let (read_fd, write_fd) = make_pipe().expect("pipe");
        device.add(read_fd, 9, true, false, true).expect("add");
        sys_close(write_fd);

        let mut events = Vec::new();
        device
            .wait(&mut events, Some(Duration::from_millis(500)), 16)
            .expect("wait");
        assert_eq!(events.len(), 1);
        assert!(events[0].eof);
        assert_eq!(events[0].error_data, 0);

        sys_close(read_fd);
    }

    #[test]
    fn timeout_expires_with_no_events() {
        let mut device = EpollDevice::new().expect("epoll");
        let mut events = Vec::new();
        let start = std::time::Instant::now();
        device
            .wait(&mut events, Some(Duration::from_millis(30)), 16)
            .expect("wait");
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn add_rejects_plain_file() {
        let mut device = EpollDevice::new().expect("epoll");
        // epoll refuses regular files the way kqueue refuses /dev/null.
        let file = std::fs::File::open("/proc/self/exe")
            .or_else(|_| std::fs::File::open("/etc/hostname"))
            .expect("open file");
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&file);
        assert!(device.add(fd, 3, true, false, false).is_err());
    }

    #[test]
    fn remove_unknown_fd_errors() {
        let mut device = EpollDevice::new().expect("epoll");
        let (read_fd, write_fd) = make_pipe().expect("pipe");
        assert!(device.remove(read_fd).is_err());
        sys_close(read_fd);
        sys_close(write_fd);
    }
}
