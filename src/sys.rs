//! Thin libc wrappers used by the wakeup channel and device backends.

use std::io;
use std::os::unix::io::RawFd;

pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) }
}

pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { libc::write(fd, buffer.as_ptr().cast(), buffer.len()) }
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

pub(crate) fn set_close_on_exec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Plain `pipe(2)`; flags are applied separately so the read and write ends
/// can differ (only the read end is non-blocking).
pub(crate) fn make_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

pub(crate) fn shutdown_read(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RD);
    }
}

pub(crate) fn shutdown_write(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_WR);
    }
}

/// Aborts the process after logging. Reserved for structural failures the
/// dispatcher cannot recover from (a desynchronized wakeup pipe, a dead
/// readiness device).
pub(crate) fn fatal(msg: &str) -> ! {
    tracing::error!(message = %msg, "fatal dispatcher failure");
    std::process::abort();
}
