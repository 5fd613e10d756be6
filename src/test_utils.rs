//! Test utilities for iodispatch.
//!
//! This module provides shared helpers for unit and end-to-end tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A recording [`PortSink`] with blocking waits for delivery assertions

use std::sync::Once;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::port::{Port, PortSink, ILLEGAL_PORT};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// One value delivered through a [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostRecord {
    /// Destination port.
    pub port: Port,
    /// Posted value; `None` for the timer sentinel.
    pub value: Option<i32>,
}

/// A [`PortSink`] that records every post and supports blocking waits.
#[derive(Debug, Default)]
pub struct RecordingSink {
    posts: Mutex<Vec<PostRecord>>,
    delivered: Condvar,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything posted so far.
    #[must_use]
    pub fn posts(&self) -> Vec<PostRecord> {
        self.posts.lock().clone()
    }

    /// Takes and clears the recorded posts.
    #[must_use]
    pub fn take(&self) -> Vec<PostRecord> {
        std::mem::take(&mut *self.posts.lock())
    }

    /// Blocks until at least `count` posts have been recorded. Returns
    /// false on timeout.
    #[must_use]
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut posts = self.posts.lock();
        while posts.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self
                .delivered
                .wait_until(&mut posts, deadline)
                .timed_out()
            {
                return posts.len() >= count;
            }
        }
        true
    }

    fn record(&self, record: PostRecord) -> bool {
        if record.port == ILLEGAL_PORT {
            return false;
        }
        self.posts.lock().push(record);
        self.delivered.notify_all();
        true
    }
}

impl PortSink for RecordingSink {
    fn post_i32(&self, port: Port, value: i32) -> bool {
        self.record(PostRecord {
            port,
            value: Some(value),
        })
    }

    fn post_null(&self, port: Port) -> bool {
        self.record(PostRecord { port, value: None })
    }
}
