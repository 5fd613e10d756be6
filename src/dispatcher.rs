//! Thread-safe dispatcher façade.
//!
//! [`EventDispatcher`] is the only surface foreign threads touch: every call
//! turns into one interrupt message on the wakeup channel, and the worker is
//! the sole consumer. [`DispatcherBuilder`] wires the collaborators (port
//! sink, listening-socket registry, signal handlers) before start.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use iodispatch::{Command, CommandWord, EventDispatcher, EventMask, SocketHandle};
//!
//! let dispatcher = EventDispatcher::start(sink);
//! let socket = Arc::new(SocketHandle::new(fd));
//! dispatcher.send_data(
//!     &socket,
//!     port,
//!     CommandWord::new(Command::SetMask).with_events(EventMask::IN).bits(),
//! );
//! // ... readiness masks arrive at `port` through the sink ...
//! dispatcher.shutdown();
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::DispatcherConfig;
use crate::device;
use crate::message::{InterruptMessage, SHUTDOWN_ID, TIMER_ID};
use crate::port::{Port, PortSink, ILLEGAL_PORT};
use crate::registry::{FdShareRegistry, NoSignalHandlers, SharedSocketRegistry, SignalHandlers};
use crate::socket::SocketHandle;
use crate::sys;
use crate::wakeup::{wakeup_channel, WakeupSender};
use crate::worker::Worker;

/// Configures and starts an [`EventDispatcher`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    registry: Arc<dyn SharedSocketRegistry>,
    signals: Arc<dyn SignalHandlers>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Starts from the default configuration and stock collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            registry: Arc::new(FdShareRegistry::new()),
            signals: Arc::new(NoSignalHandlers),
        }
    }

    /// Replaces the worker configuration.
    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Injects the listening-socket registry consulted on `CLOSE`.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn SharedSocketRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Injects the signal-handler table consulted for signal sockets.
    #[must_use]
    pub fn signal_handlers(mut self, signals: Arc<dyn SignalHandlers>) -> Self {
        self.signals = signals;
        self
    }

    /// Spawns the worker thread. Initialization failures (pipe, readiness
    /// device, thread spawn) are structural and abort the process.
    #[must_use]
    pub fn start(self, sink: Arc<dyn PortSink>) -> EventDispatcher {
        let mut config = self.config;
        config.normalize();

        let (sender, receiver) = wakeup_channel();
        let dev = match device::platform_device() {
            Ok(dev) => dev,
            Err(err) => sys::fatal(&format!("readiness device creation failed: {err}")),
        };
        let worker = Worker::new(dev, receiver, sink, self.registry, self.signals, config.clone());
        let join = std::thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || worker.run());
        let join = match join {
            Ok(join) => join,
            Err(err) => sys::fatal(&format!("worker thread spawn failed: {err}")),
        };
        EventDispatcher {
            sender,
            worker: Mutex::new(Some(join)),
        }
    }
}

/// Handle to a running dispatcher. Callable from any thread.
pub struct EventDispatcher {
    sender: WakeupSender,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Starts a dispatcher with default configuration and collaborators.
    #[must_use]
    pub fn start(sink: Arc<dyn PortSink>) -> Self {
        DispatcherBuilder::new().start(sink)
    }

    /// Enqueues one command for `socket`. `data` is a packed
    /// [`CommandWord`](crate::CommandWord); replies go to `port`.
    ///
    /// The message carries one extra reference to the handle, released by
    /// the worker on receipt, so the handle outlives its last in-flight
    /// command. Messages sent after shutdown are dropped.
    pub fn send_data(&self, socket: &Arc<SocketHandle>, port: Port, data: i64) {
        let guard = self.worker.lock();
        if guard.is_none() {
            tracing::trace!(port, "command after shutdown dropped");
            return;
        }
        self.sender.wake(&InterruptMessage {
            id: SocketHandle::into_message_id(socket),
            port,
            data,
        });
    }

    /// Arms (deadline in monotonic milliseconds, `> 0`) or cancels
    /// (`<= 0`) the timer for `port`.
    pub fn set_timer(&self, port: Port, deadline_ms: i64) {
        let guard = self.worker.lock();
        if guard.is_none() {
            tracing::trace!(port, "timer update after shutdown dropped");
            return;
        }
        self.sender.wake(&InterruptMessage {
            id: TIMER_ID,
            port,
            data: deadline_ms,
        });
    }

    /// Stops the worker and waits for it to finish its current iteration
    /// and tear down. Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        let join = {
            let mut guard = self.worker.lock();
            let Some(join) = guard.take() else {
                return;
            };
            // Still under the lock: no message can land behind the
            // shutdown sentinel once the slot reads empty.
            self.sender.wake(&InterruptMessage {
                id: SHUTDOWN_ID,
                port: ILLEGAL_PORT,
                data: 0,
            });
            join
        };
        if join.join().is_err() {
            sys::fatal("dispatcher worker panicked");
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
