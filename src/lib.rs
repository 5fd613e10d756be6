//! Iodispatch: a single-worker I/O event dispatcher.
//!
//! # Overview
//!
//! Iodispatch multiplexes file-descriptor readiness and timer expirations on
//! one background worker thread and delivers them as compact bitmask messages
//! to subscribers identified by opaque *ports*. It is the event-loop nucleus
//! a higher-level runtime builds sockets, pipes, and timers on top of: the
//! embedder hands the dispatcher raw fds and ports, and the dispatcher hands
//! back readiness edges.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ foreign threads                                                  │
//! │   EventDispatcher::send_data / set_timer / shutdown              │
//! │        │ 24-byte interrupt messages (atomic pipe writes)         │
//! │        ▼                                                         │
//! │ ┌────────────────────────── worker ──────────────────────────┐   │
//! │ │  ReadinessDevice (kqueue / epoll)   TimerQueue             │   │
//! │ │        │ readiness events               │ deadlines        │   │
//! │ │        ▼                                ▼                  │   │
//! │ │  DescriptorMap → DescriptorInfo → PortSink::post_i32       │   │
//! │ └────────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`EventDispatcher`] | Thread-safe façade: start, send commands, shut down |
//! | [`SocketHandle`] | Reference-counted subscriber handle carried through messages |
//! | [`EventMask`] | Application-visible event bits (IN/OUT/ERROR/CLOSE/DESTROYED) |
//! | [`CommandWord`] | Packed command encoding for [`EventDispatcher::send_data`] |
//! | [`PortSink`] | Delivery seam: how event masks reach application ports |
//! | [`device::ReadinessDevice`] | Platform multiplexer abstraction |
//!
//! # Delivery Contract
//!
//! Non-listening descriptors register edge-triggered: a readiness edge is
//! delivered at most once per request cycle, and the subscriber re-arms with
//! `SET_MASK` after draining. Listening descriptors are level-triggered and
//! throttled per subscriber by a token balance replenished with
//! `RETURN_TOKEN`. Structural failures (pipe integrity, device health) abort
//! the process; per-fd failures are demoted to `CLOSE`/`ERROR` event masks.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub(crate) mod descriptor;
pub mod device;
pub mod dispatcher;
pub mod events;
pub mod message;
pub mod port;
pub mod registry;
pub mod socket;
pub(crate) mod sys;
pub mod test_utils;
pub mod timer;
pub(crate) mod wakeup;
pub(crate) mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatcherBuilder, EventDispatcher};
pub use events::EventMask;
pub use message::{Command, CommandWord, InterruptMessage, SHUTDOWN_ID, TIMER_ID};
pub use port::{Port, PortSink, ILLEGAL_PORT};
pub use registry::{FdShareRegistry, NoSignalHandlers, SharedSocketRegistry, SignalHandlers};
pub use socket::SocketHandle;
pub use timer::monotonic_millis;
