//! Wakeup channel: the pipe carrying interrupt messages into the worker.
//!
//! Writers on arbitrary threads post exactly one [`InterruptMessage`] per
//! `write(2)`. The message is smaller than the pipe-atomic limit, so the OS
//! serializes concurrent writers without a user-space lock. The read end is
//! non-blocking and drained in batches by the worker; both ends are
//! close-on-exec.
//!
//! A short write or a drain that is not a whole number of messages means the
//! channel is desynchronized and the process aborts: there is no way to
//! resynchronize a byte stream of fixed-size records once a partial record
//! has been consumed.

use std::io;
use std::os::unix::io::RawFd;

use crate::message::InterruptMessage;
use crate::sys;

/// Write end. Shared by the dispatcher façade across threads.
#[derive(Debug)]
pub(crate) struct WakeupSender {
    fd: RawFd,
}

/// Read end. Owned by the worker.
#[derive(Debug)]
pub(crate) struct WakeupReceiver {
    fd: RawFd,
    buf: Vec<u8>,
}

/// Creates the channel. Failure to create or configure the pipe is fatal.
pub(crate) fn wakeup_channel() -> (WakeupSender, WakeupReceiver) {
    let (read_fd, write_fd) = match sys::make_pipe() {
        Ok(fds) => fds,
        Err(err) => sys::fatal(&format!("wakeup pipe creation failed: {err}")),
    };
    if let Err(err) = sys::set_nonblocking(read_fd) {
        sys::fatal(&format!("wakeup pipe read end non-blocking failed: {err}"));
    }
    if let Err(err) = sys::set_close_on_exec(read_fd) {
        sys::fatal(&format!("wakeup pipe read end cloexec failed: {err}"));
    }
    if let Err(err) = sys::set_close_on_exec(write_fd) {
        sys::fatal(&format!("wakeup pipe write end cloexec failed: {err}"));
    }
    (
        WakeupSender { fd: write_fd },
        WakeupReceiver {
            fd: read_fd,
            buf: Vec::new(),
        },
    )
}

impl WakeupSender {
    /// Posts one message. Succeeds or aborts: a partial message would
    /// desynchronize the reader for good.
    pub(crate) fn wake(&self, msg: &InterruptMessage) {
        let bytes = msg.to_wire();
        loop {
            let written = sys::sys_write(self.fd, &bytes);
            if written == InterruptMessage::WIRE_SIZE as isize {
                return;
            }
            if written < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                sys::fatal(&format!("wakeup write failed: {err}"));
            }
            sys::fatal(&format!("wakeup short write: {written} bytes"));
        }
    }
}

impl WakeupReceiver {
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Drains up to `batch` messages into `out`.
    ///
    /// The pipe is registered level-triggered with the readiness device, so
    /// anything left behind re-fires on the next wait.
    pub(crate) fn drain(&mut self, batch: usize, out: &mut Vec<InterruptMessage>) {
        self.buf.resize(batch.max(1) * InterruptMessage::WIRE_SIZE, 0);
        let bytes = loop {
            let n = sys::sys_read(self.fd, &mut self.buf);
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return,
                _ => sys::fatal(&format!("wakeup read failed: {err}")),
            }
        };
        if bytes % InterruptMessage::WIRE_SIZE != 0 {
            sys::fatal(&format!("wakeup drain misaligned: {bytes} bytes"));
        }
        for chunk in self.buf[..bytes].chunks_exact(InterruptMessage::WIRE_SIZE) {
            out.push(InterruptMessage::from_wire(chunk));
        }
    }
}

impl Drop for WakeupSender {
    fn drop(&mut self) {
        sys::sys_close(self.fd);
    }
}

impl Drop for WakeupReceiver {
    fn drop(&mut self) {
        sys::sys_close(self.fd);
    }
}
