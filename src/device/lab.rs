//! Deterministic in-memory device for worker tests.
//!
//! [`LabDevice`] never touches the kernel: tests inject [`DeviceEvent`]s
//! through a [`LabHandle`] and assert on the operation log the device keeps
//! of every `add`/`remove` it receives. Waits return injected events
//! immediately and never block.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{DeviceEvent, ReadinessDevice};

/// One recorded registration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabOp {
    /// `add(fd, user, read, write, edge_triggered)` was called.
    Add {
        /// Registered fd.
        fd: RawFd,
        /// User token supplied.
        user: u64,
        /// Read filter requested.
        read: bool,
        /// Write filter requested.
        write: bool,
        /// Edge-triggered semantics requested.
        edge: bool,
    },
    /// `remove(fd)` was called.
    Remove {
        /// Deregistered fd.
        fd: RawFd,
    },
}

#[derive(Debug, Default)]
struct LabState {
    pending: VecDeque<DeviceEvent>,
    ops: Vec<LabOp>,
    reject_fds: HashSet<RawFd>,
}

/// In-memory readiness device.
#[derive(Debug, Default)]
pub struct LabDevice {
    state: Arc<Mutex<LabState>>,
}

/// Test-side handle for injecting events and inspecting operations.
#[derive(Debug, Clone)]
pub struct LabHandle {
    state: Arc<Mutex<LabState>>,
}

impl LabDevice {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared test handle.
    #[must_use]
    pub fn handle(&self) -> LabHandle {
        LabHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl LabHandle {
    /// Queues an event for the next wait.
    pub fn inject(&self, event: DeviceEvent) {
        self.state.lock().pending.push_back(event);
    }

    /// Makes future `add` calls for `fd` fail, the way the kernel rejects
    /// unsupported descriptors.
    pub fn reject_fd(&self, fd: RawFd) {
        self.state.lock().reject_fds.insert(fd);
    }

    /// Snapshot of the operation log.
    #[must_use]
    pub fn ops(&self) -> Vec<LabOp> {
        self.state.lock().ops.clone()
    }

    /// Clears the operation log.
    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }
}

impl ReadinessDevice for LabDevice {
    fn add(
        &mut self,
        fd: RawFd,
        user: u64,
        read: bool,
        write: bool,
        edge_triggered: bool,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        state.ops.push(LabOp::Add {
            fd,
            user,
            read,
            write,
            edge: edge_triggered,
        });
        if state.reject_fds.contains(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "lab device rejects fd",
            ));
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.state.lock().ops.push(LabOp::Remove { fd });
        Ok(())
    }

    fn wait(
        &mut self,
        events: &mut Vec<DeviceEvent>,
        _timeout: Option<Duration>,
        max_events: usize,
    ) -> io::Result<()> {
        events.clear();
        let mut state = self.state.lock();
        while events.len() < max_events.max(1) {
            match state.pending.pop_front() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        Ok(())
    }
}
