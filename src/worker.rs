//! The dispatcher worker: wait, decode, deliver, apply interrupts.
//!
//! One thread owns every mutable structure here. Per iteration the worker
//! blocks on the readiness device with the next timer deadline as timeout,
//! fires at most one due timer, applies the readiness batch, and only then
//! drains the wakeup channel. Readiness-before-interrupts is load-bearing: a
//! `CLOSE` arriving in the same wait must not tear down state that earlier
//! readiness entries in the batch still reference.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DispatcherConfig;
use crate::descriptor::{fd_for_user, user_for_fd, DescriptorMap};
use crate::device::{DeviceEvent, Filter, ReadinessDevice, WAKEUP_USER};
use crate::events::EventMask;
use crate::message::{Command, CommandWord, InterruptMessage, SHUTDOWN_ID, TIMER_ID};
use crate::port::{Port, PortSink, ILLEGAL_PORT};
use crate::registry::{SharedSocketRegistry, SignalHandlers};
use crate::socket::SocketHandle;
use crate::sys;
use crate::timer::{monotonic_millis, TimerQueue};
use crate::wakeup::WakeupReceiver;

pub(crate) struct Worker {
    device: Box<dyn ReadinessDevice>,
    wakeup: WakeupReceiver,
    descriptors: DescriptorMap,
    timers: TimerQueue,
    sink: Arc<dyn PortSink>,
    registry: Arc<dyn SharedSocketRegistry>,
    signals: Arc<dyn SignalHandlers>,
    config: DispatcherConfig,
    shutdown: bool,
    events: Vec<DeviceEvent>,
    messages: Vec<InterruptMessage>,
}

impl Worker {
    pub(crate) fn new(
        mut device: Box<dyn ReadinessDevice>,
        wakeup: WakeupReceiver,
        sink: Arc<dyn PortSink>,
        registry: Arc<dyn SharedSocketRegistry>,
        signals: Arc<dyn SignalHandlers>,
        config: DispatcherConfig,
    ) -> Self {
        // The wakeup fd is level-triggered so partially drained batches
        // re-fire on the next wait.
        if let Err(err) = device.add(wakeup.raw_fd(), WAKEUP_USER, true, false, false) {
            sys::fatal(&format!("registering wakeup fd failed: {err}"));
        }
        Self {
            device,
            wakeup,
            descriptors: DescriptorMap::new(),
            timers: TimerQueue::new(),
            sink,
            registry,
            signals,
            config,
            shutdown: false,
            events: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) {
        tracing::debug!("dispatcher worker running");
        while !self.shutdown {
            let timeout = self.wait_timeout();
            self.poll_once(timeout);
        }
        self.teardown();
        tracing::debug!("dispatcher worker shut down");
    }

    /// One iteration: wait, fire a due timer, apply the batch.
    fn poll_once(&mut self, timeout: Option<Duration>) {
        let max_events = self.config.max_events_per_wait;
        let mut events = std::mem::take(&mut self.events);
        if let Err(err) = self.device.wait(&mut events, timeout, max_events) {
            sys::fatal(&format!("readiness wait failed: {err}"));
        }
        self.handle_timeout();
        self.handle_events(&events);
        events.clear();
        self.events = events;
    }

    /// Sleep until the earliest timer, clamped to what the kernel APIs
    /// accept; forever when no timer is armed.
    fn wait_timeout(&mut self) -> Option<Duration> {
        let (deadline, _) = self.timers.earliest()?;
        let millis = (deadline - monotonic_millis()).clamp(0, i64::from(i32::MAX));
        Some(Duration::from_millis(millis as u64))
    }

    fn handle_timeout(&mut self) {
        if let Some(port) = self.timers.pop_due(monotonic_millis()) {
            self.sink.post_null(port);
        }
    }

    fn handle_events(&mut self, events: &[DeviceEvent]) {
        let mut interrupt_seen = false;
        for event in events {
            if event.device_error {
                sys::fatal(&format!(
                    "readiness device error on user {}: errno {}",
                    event.user, event.error_data
                ));
            }
            if event.user == WAKEUP_USER {
                interrupt_seen = true;
            } else {
                self.dispatch_readiness(event);
            }
        }
        if interrupt_seen {
            // After the readiness batch, so a close in the same batch does
            // not invalidate descriptors we are still delivering for.
            self.handle_interrupts();
        }
    }

    fn dispatch_readiness(&mut self, event: &DeviceEvent) {
        let fd = fd_for_user(event.user);
        let sink = Arc::clone(&self.sink);
        let (old_mask, delivery) = {
            let Some(di) = self.descriptors.get_mut(fd) else {
                tracing::trace!(fd, "readiness for unknown descriptor dropped");
                return;
            };
            let old_mask = di.mask();
            let mask = decode_event(event, di.is_listening());
            if mask.contains(EventMask::ERROR) {
                di.notify_all(mask, sink.as_ref());
                (old_mask, None)
            } else {
                (old_mask, Some((di.next_notify_port(mask), mask)))
            }
        };
        self.update_tracking(fd, old_mask);
        if let Some((Some(port), mask)) = delivery {
            self.sink.post_i32(port, mask.as_i32());
        }
        // A delivery target of None means every eligible subscriber is out
        // of tokens; the event is skipped.
    }

    fn handle_interrupts(&mut self) {
        let mut messages = std::mem::take(&mut self.messages);
        self.wakeup
            .drain(self.config.wakeup_drain_batch, &mut messages);
        for msg in &messages {
            self.apply(msg);
        }
        messages.clear();
        self.messages = messages;
    }

    fn apply(&mut self, msg: &InterruptMessage) {
        match msg.id {
            TIMER_ID => self.timers.update(msg.port, msg.data),
            SHUTDOWN_ID => {
                tracing::debug!("shutdown requested");
                self.shutdown = true;
            }
            _ => self.apply_socket_command(msg),
        }
    }

    fn apply_socket_command(&mut self, msg: &InterruptMessage) {
        // Reclaims the reference this message carried; dropping `socket` at
        // the end of the scope releases it.
        let socket = unsafe { SocketHandle::from_message_id(msg.id) };
        let fd = socket.fd();
        if fd < 0 {
            return;
        }
        let word = CommandWord::from_bits(msg.data);
        let Some(command) = word.command() else {
            debug_assert!(false, "malformed command word {:#x}", msg.data);
            tracing::trace!(data = msg.data, "malformed command word dropped");
            return;
        };
        match command {
            Command::ShutdownRead => sys::shutdown_read(fd),
            Command::ShutdownWrite => sys::shutdown_write(fd),
            Command::SetMask => {
                let events = word.events().intersect(EventMask::IO);
                let di = self.descriptors.get_or_create(fd, word.is_listening());
                let old_mask = di.mask();
                di.set_port_and_mask(msg.port, events);
                self.update_tracking(fd, old_mask);
            }
            Command::ReturnToken => {
                let di = self.descriptors.get_or_create(fd, word.is_listening());
                let old_mask = di.mask();
                di.return_tokens(msg.port, i64::from(word.token_count()));
                self.update_tracking(fd, old_mask);
            }
            Command::Close => self.close_descriptor(&socket, msg.port, word),
        }
    }

    fn close_descriptor(&mut self, socket: &Arc<SocketHandle>, port: Port, word: CommandWord) {
        let fd = socket.fd();
        if word.is_signal_socket() {
            self.signals.clear_by_fd(fd, socket.owner_port());
        }
        let (old_mask, listening) = {
            let di = self.descriptors.get_or_create(fd, word.is_listening());
            let old_mask = di.mask();
            if port != ILLEGAL_PORT {
                di.remove_port(port);
            }
            (old_mask, di.is_listening())
        };
        self.update_tracking(fd, old_mask);

        // A listening fd may be shared with other dispatch clients; only
        // the last closer tears the descriptor down.
        let destroy = !listening || self.registry.close_safe(socket);
        if destroy {
            if let Some(di) = self.descriptors.remove(fd) {
                debug_assert!(di.mask().is_empty());
                debug_assert!(!di.tracked());
                di.close();
            }
        }
        socket.detach();
        self.sink.post_i32(port, EventMask::DESTROYED.as_i32());
    }

    /// Reconciles the device registration with the effective mask after any
    /// mutation. `old_mask` is the effective mask before the mutation.
    fn update_tracking(&mut self, fd: RawFd, old_mask: EventMask) {
        let (new_mask, listening) = match self.descriptors.get_mut(fd) {
            Some(di) => (di.mask(), di.is_listening()),
            None => return,
        };
        if old_mask.is_empty() && new_mask.is_empty() {
            return;
        }
        if new_mask.is_empty() {
            self.untrack(fd);
        } else if old_mask.is_empty() {
            self.track(fd);
        } else if old_mask != new_mask {
            // The device requires re-registration to change interest.
            debug_assert!(!listening);
            self.untrack(fd);
            self.track(fd);
        }
    }

    fn track(&mut self, fd: RawFd) {
        let (read, write, edge) = {
            let Some(di) = self.descriptors.get_mut(fd) else {
                return;
            };
            debug_assert!(!di.tracked());
            let mask = di.mask();
            debug_assert!(!mask.is_empty());
            (
                mask.contains(EventMask::IN),
                mask.contains(EventMask::OUT),
                !di.is_listening(),
            )
        };
        match self.device.add(fd, user_for_fd(fd), read, write, edge) {
            Ok(()) => {
                if let Some(di) = self.descriptors.get_mut(fd) {
                    di.set_tracked(true);
                }
            }
            Err(err) => {
                // The device refused the fd (already closed, or an
                // unsupported file such as /dev/null). Surface it to the
                // subscribers as a close instead of an error return.
                tracing::debug!(fd, error = %err, "readiness device rejected fd");
                let sink = Arc::clone(&self.sink);
                if let Some(di) = self.descriptors.get_mut(fd) {
                    di.notify_all(EventMask::CLOSE, sink.as_ref());
                }
            }
        }
    }

    fn untrack(&mut self, fd: RawFd) {
        let Some(di) = self.descriptors.get_mut(fd) else {
            return;
        };
        if !di.tracked() {
            return;
        }
        di.set_tracked(false);
        if let Err(err) = self.device.remove(fd) {
            tracing::trace!(fd, error = %err, "device removal failed");
        }
    }

    fn teardown(&mut self) {
        let remaining = self.descriptors.drain();
        if !remaining.is_empty() {
            tracing::debug!(count = remaining.len(), "closing descriptors at shutdown");
        }
        for di in remaining {
            if di.tracked() {
                let _ = self.device.remove(di.fd());
            }
            di.close();
        }
    }
}

/// Decodes one device event into the application mask.
///
/// On a listening socket a read event means connections are ready; EOF with
/// an error code degrades it to `ERROR`, plain EOF to `CLOSE`. On other
/// descriptors data events take priority: read EOF keeps `IN` and adds
/// `CLOSE` unless an error code replaces everything with `ERROR`.
pub(crate) fn decode_event(event: &DeviceEvent, listening: bool) -> EventMask {
    if listening {
        debug_assert!(matches!(event.filter, Filter::Read));
        let mut mask = EventMask::NONE;
        if event.eof {
            mask = if event.error_data != 0 {
                EventMask::ERROR
            } else {
                EventMask::CLOSE
            };
        }
        if mask.is_empty() {
            mask = EventMask::IN;
        }
        mask
    } else {
        match event.filter {
            Filter::Read => {
                let mut mask = EventMask::IN;
                if event.eof {
                    if event.error_data != 0 {
                        mask = EventMask::ERROR;
                    } else {
                        mask = mask.add(EventMask::CLOSE);
                    }
                }
                mask
            }
            Filter::Write => {
                let mut mask = EventMask::OUT;
                if event.eof && event.error_data != 0 {
                    mask = EventMask::ERROR;
                }
                mask
            }
        }
    }
}
