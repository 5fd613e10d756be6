//! Ports and the delivery seam.
//!
//! A *port* is an opaque integer destination owned by the application; the
//! dispatcher only ever posts small integers to it. How a posted value
//! reaches application code is the embedder's business, expressed through
//! [`PortSink`].

/// Opaque destination for event-mask messages.
pub type Port = i64;

/// The reserved "no port" value. Subscriber ports are always non-zero.
pub const ILLEGAL_PORT: Port = 0;

/// How posted values reach the application.
///
/// Delivery is best effort: a `false` return means the port was unreachable
/// and the dispatcher drops the message without further action.
///
/// Implementations are called from the worker thread and from nothing else,
/// but must be `Send + Sync` because the dispatcher façade hands the sink to
/// the worker at start.
pub trait PortSink: Send + Sync {
    /// Posts an event mask (or `DESTROYED` notification) to `port`.
    fn post_i32(&self, port: Port, value: i32) -> bool;

    /// Posts the timer sentinel (a null value) to `port`.
    fn post_null(&self, port: Port) -> bool;
}
