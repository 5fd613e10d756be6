//! Per-descriptor dispatch state and the fd-keyed descriptor table.
//!
//! A [`DescriptorInfo`] records everything the worker knows about one
//! registered fd: its subscribers, their requested event bits and token
//! balances, and whether the fd is currently registered with the readiness
//! device. The *single* variant serves ordinary sockets with one subscriber;
//! the *multiple* variant serves listening sockets shared by several
//! subscribers, dispatched round-robin with one token consumed per delivered
//! event.
//!
//! All state here is owned and mutated by the worker thread only.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use smallvec::SmallVec;

use crate::events::EventMask;
use crate::port::{Port, PortSink};
use crate::sys;

/// Token balance granted to a newly added *multiple* subscriber. The
/// subscriber earns more only through `RETURN_TOKEN`.
const INITIAL_TOKENS: i64 = 1;

#[derive(Debug, Clone)]
struct Subscriber {
    port: Port,
    events: EventMask,
    tokens: i64,
}

#[derive(Debug)]
enum Subscribers {
    /// One subscriber, never throttled.
    Single(Option<Subscriber>),
    /// Round-robin ring of token-throttled subscribers.
    Multiple { ring: Vec<Subscriber>, next: usize },
}

/// Dispatch state for one registered fd.
#[derive(Debug)]
pub(crate) struct DescriptorInfo {
    fd: RawFd,
    tracked: bool,
    subscribers: Subscribers,
}

impl DescriptorInfo {
    pub(crate) fn new_single(fd: RawFd) -> Self {
        Self {
            fd,
            tracked: false,
            subscribers: Subscribers::Single(None),
        }
    }

    pub(crate) fn new_multiple(fd: RawFd) -> Self {
        Self {
            fd,
            tracked: false,
            subscribers: Subscribers::Multiple {
                ring: Vec::new(),
                next: 0,
            },
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Listening sockets are exactly the *multiple* descriptors.
    pub(crate) fn is_listening(&self) -> bool {
        matches!(self.subscribers, Subscribers::Multiple { .. })
    }

    pub(crate) fn tracked(&self) -> bool {
        self.tracked
    }

    pub(crate) fn set_tracked(&mut self, tracked: bool) {
        self.tracked = tracked;
    }

    /// The effective mask: requested bits of every subscriber currently
    /// eligible for delivery, restricted to `IN|OUT`. A *multiple*
    /// subscriber with an empty token balance contributes nothing until
    /// tokens are returned.
    pub(crate) fn mask(&self) -> EventMask {
        match &self.subscribers {
            Subscribers::Single(entry) => entry
                .as_ref()
                .map_or(EventMask::NONE, |s| s.events.intersect(EventMask::IO)),
            Subscribers::Multiple { ring, .. } => ring
                .iter()
                .filter(|s| s.tokens > 0)
                .fold(EventMask::NONE, |mask, s| {
                    mask.add(s.events.intersect(EventMask::IO))
                }),
        }
    }

    /// Upserts a subscriber. For *single*, replaces any prior entry; for
    /// *multiple*, updates the entry for `port` or appends a fresh one with
    /// the initial token grant.
    pub(crate) fn set_port_and_mask(&mut self, port: Port, events: EventMask) {
        debug_assert!(events.remove(EventMask::IO).is_empty());
        match &mut self.subscribers {
            Subscribers::Single(entry) => {
                *entry = Some(Subscriber {
                    port,
                    events,
                    tokens: INITIAL_TOKENS,
                });
            }
            Subscribers::Multiple { ring, .. } => {
                if let Some(existing) = ring.iter_mut().find(|s| s.port == port) {
                    existing.events = events;
                } else {
                    ring.push(Subscriber {
                        port,
                        events,
                        tokens: INITIAL_TOKENS,
                    });
                }
            }
        }
    }

    /// Credits `count` tokens back to `port`. A balance crossing zero from
    /// below re-enters the subscriber's bits into the effective mask.
    pub(crate) fn return_tokens(&mut self, port: Port, count: i64) {
        debug_assert!(count > 0);
        match &mut self.subscribers {
            // Single subscribers are not throttled.
            Subscribers::Single(_) => {}
            Subscribers::Multiple { ring, .. } => {
                if let Some(entry) = ring.iter_mut().find(|s| s.port == port) {
                    entry.tokens += count;
                } else {
                    tracing::trace!(fd = self.fd, port, "token return for unknown port");
                }
            }
        }
    }

    /// Deletes the subscriber entry for `port`.
    pub(crate) fn remove_port(&mut self, port: Port) {
        match &mut self.subscribers {
            Subscribers::Single(entry) => {
                if entry.as_ref().is_some_and(|s| s.port == port) {
                    *entry = None;
                }
            }
            Subscribers::Multiple { ring, next } => {
                if let Some(index) = ring.iter().position(|s| s.port == port) {
                    ring.remove(index);
                    if index < *next {
                        *next -= 1;
                    }
                    if ring.is_empty() {
                        *next = 0;
                    } else {
                        *next %= ring.len();
                    }
                }
            }
        }
    }

    /// Whether any subscriber entries remain.
    pub(crate) fn has_subscribers(&self) -> bool {
        match &self.subscribers {
            Subscribers::Single(entry) => entry.is_some(),
            Subscribers::Multiple { ring, .. } => !ring.is_empty(),
        }
    }

    /// Picks the subscriber to receive `events`.
    ///
    /// For *single*, the sole subscriber. For *multiple*, the next ring
    /// entry whose requested bits intersect `events` and whose balance is
    /// positive; that entry pays one token and the ring advances past it.
    /// `None` means nobody is eligible and the event should be skipped.
    pub(crate) fn next_notify_port(&mut self, events: EventMask) -> Option<Port> {
        match &mut self.subscribers {
            Subscribers::Single(entry) => entry.as_ref().map(|s| s.port),
            Subscribers::Multiple { ring, next } => {
                let len = ring.len();
                for offset in 0..len {
                    let index = (*next + offset) % len;
                    let entry = &mut ring[index];
                    if entry.tokens > 0 && entry.events.intersects(events) {
                        entry.tokens -= 1;
                        *next = (index + 1) % len;
                        return Some(entry.port);
                    }
                }
                None
            }
        }
    }

    /// Posts `events` to every subscriber and clears their requested bits.
    /// Used for fatal per-descriptor conditions (error, synthesized close).
    pub(crate) fn notify_all(&mut self, events: EventMask, sink: &dyn PortSink) {
        let mut ports: SmallVec<[Port; 4]> = SmallVec::new();
        match &mut self.subscribers {
            Subscribers::Single(entry) => {
                if let Some(s) = entry.as_mut() {
                    ports.push(s.port);
                    s.events = EventMask::NONE;
                }
            }
            Subscribers::Multiple { ring, .. } => {
                for s in ring.iter_mut() {
                    ports.push(s.port);
                    s.events = EventMask::NONE;
                }
            }
        }
        for port in ports {
            sink.post_i32(port, events.as_i32());
        }
    }

    /// Closes the underlying fd. Consumes the state: only descriptors
    /// removed from the table are closed.
    pub(crate) fn close(self) {
        if self.fd >= 0 {
            sys::sys_close(self.fd);
        }
    }
}

/// Fd-keyed table of descriptor state, owned by the worker.
///
/// Keys are encoded as `fd + 1` so key zero stays unused; the same encoding
/// doubles as the device `user` token, reserving zero for the wakeup
/// channel.
#[derive(Debug, Default)]
pub(crate) struct DescriptorMap {
    entries: HashMap<u64, DescriptorInfo>,
}

pub(crate) fn user_for_fd(fd: RawFd) -> u64 {
    fd as u64 + 1
}

pub(crate) fn fd_for_user(user: u64) -> RawFd {
    (user - 1) as RawFd
}

impl DescriptorMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `fd`, inserting a fresh entry of the kind
    /// implied by `is_listening` on first reference. The kind is fixed at
    /// insertion time.
    pub(crate) fn get_or_create(&mut self, fd: RawFd, is_listening: bool) -> &mut DescriptorInfo {
        debug_assert!(fd >= 0);
        let di = self.entries.entry(user_for_fd(fd)).or_insert_with(|| {
            if is_listening {
                DescriptorInfo::new_multiple(fd)
            } else {
                DescriptorInfo::new_single(fd)
            }
        });
        debug_assert_eq!(di.fd(), fd);
        di
    }

    pub(crate) fn get_mut(&mut self, fd: RawFd) -> Option<&mut DescriptorInfo> {
        self.entries.get_mut(&user_for_fd(fd))
    }

    /// Detaches the state for `fd`; the caller destroys it.
    pub(crate) fn remove(&mut self, fd: RawFd) -> Option<DescriptorInfo> {
        self.entries.remove(&user_for_fd(fd))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Empties the table for worker teardown.
    pub(crate) fn drain(&mut self) -> Vec<DescriptorInfo> {
        self.entries.drain().map(|(_, di)| di).collect()
    }
}
