//! End-to-end dispatcher scenarios against the real platform backend.
//!
//! Every test starts a full dispatcher (worker thread, wakeup pipe, kernel
//! readiness device) and observes deliveries through a recording sink.
//! Registered descriptors are handed over with `into_raw_fd`: the worker
//! owns and closes them from that point on.

#![cfg(unix)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use iodispatch::test_utils::{init_test_logging, PostRecord, RecordingSink};
use iodispatch::{
    monotonic_millis, Command, CommandWord, DispatcherBuilder, EventDispatcher, EventMask,
    FdShareRegistry, Port, SocketHandle,
};

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(100);

fn start_dispatcher() -> (EventDispatcher, Arc<RecordingSink>) {
    init_test_logging();
    let sink = Arc::new(RecordingSink::new());
    let dispatcher = EventDispatcher::start(sink.clone());
    (dispatcher, sink)
}

fn set_mask(dispatcher: &EventDispatcher, socket: &Arc<SocketHandle>, port: Port, mask: EventMask) {
    dispatcher.send_data(
        socket,
        port,
        CommandWord::new(Command::SetMask).with_events(mask).bits(),
    );
}

#[test]
fn single_socket_read_readiness() {
    iodispatch::test_phase!("single_socket_read_readiness");
    let (dispatcher, sink) = start_dispatcher();
    let (local, mut peer) = UnixStream::pair().expect("socket pair");
    let socket = Arc::new(SocketHandle::new(local.into_raw_fd()));

    set_mask(&dispatcher, &socket, 100, EventMask::IN);
    peer.write_all(b"ready").expect("peer write");

    assert!(sink.wait_for_count(1, WAIT), "no readiness delivered");
    assert_eq!(
        sink.posts()[0],
        PostRecord {
            port: 100,
            value: Some(EventMask::IN.as_i32())
        }
    );

    dispatcher.shutdown();
    iodispatch::test_complete!("single_socket_read_readiness");
}

#[test]
fn edge_retriggers_on_new_data() {
    iodispatch::test_phase!("edge_retriggers_on_new_data");
    let (dispatcher, sink) = start_dispatcher();
    let (local, mut peer) = UnixStream::pair().expect("socket pair");
    let socket = Arc::new(SocketHandle::new(local.into_raw_fd()));

    set_mask(&dispatcher, &socket, 100, EventMask::IN);
    peer.write_all(b"first").expect("peer write");
    assert!(sink.wait_for_count(1, WAIT), "first edge missing");

    // A second burst is a new readiness transition even though the first
    // was never drained.
    peer.write_all(b"second").expect("peer write");
    assert!(sink.wait_for_count(2, WAIT), "second edge missing");
    assert!(sink
        .posts()
        .iter()
        .all(|p| p.port == 100 && p.value == Some(EventMask::IN.as_i32())));

    dispatcher.shutdown();
    iodispatch::test_complete!("edge_retriggers_on_new_data");
}

#[test]
fn writable_socket_posts_out() {
    iodispatch::test_phase!("writable_socket_posts_out");
    let (dispatcher, sink) = start_dispatcher();
    let (local, peer) = UnixStream::pair().expect("socket pair");
    let socket = Arc::new(SocketHandle::new(local.into_raw_fd()));

    set_mask(&dispatcher, &socket, 7, EventMask::OUT);

    assert!(sink.wait_for_count(1, WAIT), "no writable delivered");
    assert_eq!(
        sink.posts()[0],
        PostRecord {
            port: 7,
            value: Some(EventMask::OUT.as_i32())
        }
    );

    drop(peer);
    dispatcher.shutdown();
    iodispatch::test_complete!("writable_socket_posts_out");
}

#[test]
fn shared_listening_round_robin_with_backpressure() {
    iodispatch::test_phase!("shared_listening_round_robin_with_backpressure");
    let (dispatcher, sink) = start_dispatcher();

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let socket = Arc::new(SocketHandle::new(listener.into_raw_fd()));

    for port in [1, 2, 3] {
        dispatcher.send_data(
            &socket,
            port,
            CommandWord::new(Command::SetMask)
                .with_events(EventMask::IN)
                .listening()
                .bits(),
        );
    }

    // One pending connection keeps the level-triggered fd readable, so
    // deliveries continue until every subscriber's token is spent.
    let client = TcpStream::connect(addr).expect("connect");
    assert!(sink.wait_for_count(3, WAIT), "round robin incomplete");
    let ports: Vec<Port> = sink.posts().iter().map(|p| p.port).collect();
    assert_eq!(ports, vec![1, 2, 3]);
    assert!(sink
        .posts()
        .iter()
        .all(|p| p.value == Some(EventMask::IN.as_i32())));

    // Tokens exhausted: the readable fd stays silent.
    std::thread::sleep(SETTLE);
    assert_eq!(sink.take().len(), 3);

    // Returning tokens to one subscriber resumes delivery for it alone.
    dispatcher.send_data(
        &socket,
        2,
        CommandWord::new(Command::ReturnToken)
            .with_tokens(2)
            .listening()
            .bits(),
    );
    assert!(sink.wait_for_count(2, WAIT), "token return did not resume");
    let resumed: Vec<Port> = sink.posts().iter().map(|p| p.port).collect();
    assert_eq!(resumed, vec![2, 2]);

    drop(client);
    dispatcher.shutdown();
    iodispatch::test_complete!("shared_listening_round_robin_with_backpressure");
}

#[test]
fn half_close_posts_in_and_close() {
    iodispatch::test_phase!("half_close_posts_in_and_close");
    let (dispatcher, sink) = start_dispatcher();
    let (local, mut peer) = UnixStream::pair().expect("socket pair");
    let socket = Arc::new(SocketHandle::new(local.into_raw_fd()));

    // Data and EOF are both pending before the descriptor registers, so
    // they arrive as one readiness record.
    peer.write_all(b"tail").expect("peer write");
    peer.shutdown(std::net::Shutdown::Write).expect("half close");
    set_mask(&dispatcher, &socket, 9, EventMask::IN);

    assert!(sink.wait_for_count(1, WAIT), "no event delivered");
    // Data events take priority: readable bytes remain, so IN stays set
    // alongside CLOSE.
    assert_eq!(
        sink.posts()[0],
        PostRecord {
            port: 9,
            value: Some(EventMask::IN.add(EventMask::CLOSE).as_i32())
        }
    );

    dispatcher.shutdown();
    iodispatch::test_complete!("half_close_posts_in_and_close");
}

#[test]
fn timer_posts_null_after_deadline() {
    iodispatch::test_phase!("timer_posts_null_after_deadline");
    let (dispatcher, sink) = start_dispatcher();

    dispatcher.set_timer(55, monotonic_millis() + 80);
    // Nothing may fire before the deadline.
    assert!(!sink.wait_for_count(1, Duration::from_millis(30)));

    assert!(sink.wait_for_count(1, WAIT), "timer never fired");
    assert_eq!(sink.posts()[0], PostRecord { port: 55, value: None });

    // One-shot: no second fire.
    std::thread::sleep(SETTLE);
    assert_eq!(sink.posts().len(), 1);

    dispatcher.shutdown();
    iodispatch::test_complete!("timer_posts_null_after_deadline");
}

#[test]
fn overdue_timer_fires_immediately() {
    iodispatch::test_phase!("overdue_timer_fires_immediately");
    let (dispatcher, sink) = start_dispatcher();

    dispatcher.set_timer(56, monotonic_millis().max(1));
    assert!(sink.wait_for_count(1, WAIT), "overdue timer never fired");
    assert_eq!(sink.posts()[0], PostRecord { port: 56, value: None });

    dispatcher.shutdown();
    iodispatch::test_complete!("overdue_timer_fires_immediately");
}

#[test]
fn close_lifecycle_destroys_descriptor() {
    iodispatch::test_phase!("close_lifecycle_destroys_descriptor");
    let (dispatcher, sink) = start_dispatcher();
    let (local, mut peer) = UnixStream::pair().expect("socket pair");
    let socket = Arc::new(SocketHandle::new(local.into_raw_fd()));

    set_mask(&dispatcher, &socket, 11, EventMask::IN);
    dispatcher.send_data(&socket, 11, CommandWord::new(Command::Close).bits());

    assert!(sink.wait_for_count(1, WAIT), "no destroyed notification");
    assert_eq!(
        sink.posts()[0],
        PostRecord {
            port: 11,
            value: Some(EventMask::DESTROYED.as_i32())
        }
    );
    // The worker closed the fd and detached the handle; the peer observes
    // EOF immediately.
    assert_eq!(socket.fd(), -1);
    let mut buf = [0u8; 4];
    assert_eq!(Read::read(&mut peer, &mut buf).expect("peer read"), 0);

    dispatcher.shutdown();
    iodispatch::test_complete!("close_lifecycle_destroys_descriptor");
}

#[test]
fn shared_listener_close_coordinates_through_registry() {
    iodispatch::test_phase!("shared_listener_close_coordinates_through_registry");
    init_test_logging();
    let sink = Arc::new(RecordingSink::new());
    let registry = Arc::new(FdShareRegistry::new());
    let dispatcher = DispatcherBuilder::new()
        .registry(registry.clone())
        .start(sink.clone());

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let fd = listener.into_raw_fd();
    registry.add_share(fd);
    registry.add_share(fd);

    let first = Arc::new(SocketHandle::new(fd));
    let second = Arc::new(SocketHandle::new(fd));
    for (socket, port) in [(&first, 1), (&second, 2)] {
        dispatcher.send_data(
            socket,
            port,
            CommandWord::new(Command::SetMask)
                .with_events(EventMask::IN)
                .listening()
                .bits(),
        );
    }

    dispatcher.send_data(&first, 1, CommandWord::new(Command::Close).listening().bits());
    assert!(sink.wait_for_count(1, WAIT), "first close unacknowledged");
    // Another share remains: the fd must still be open.
    assert_ne!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1);

    dispatcher.send_data(&second, 2, CommandWord::new(Command::Close).listening().bits());
    assert!(sink.wait_for_count(2, WAIT), "second close unacknowledged");
    // Last share gone: the listening socket is closed for real.
    assert!(TcpStream::connect(addr).is_err());

    let destroyed: Vec<Port> = sink
        .posts()
        .iter()
        .filter(|p| p.value == Some(EventMask::DESTROYED.as_i32()))
        .map(|p| p.port)
        .collect();
    assert_eq!(destroyed, vec![1, 2]);

    dispatcher.shutdown();
    iodispatch::test_complete!("shared_listener_close_coordinates_through_registry");
}

#[test]
fn shutdown_stops_the_worker() {
    iodispatch::test_phase!("shutdown_stops_the_worker");
    let (dispatcher, sink) = start_dispatcher();

    dispatcher.set_timer(5, monotonic_millis() + 5);
    assert!(sink.wait_for_count(1, WAIT));

    dispatcher.shutdown();
    // Idempotent: a second shutdown returns immediately.
    dispatcher.shutdown();

    // The worker is gone; commands sent now are never delivered.
    dispatcher.set_timer(6, monotonic_millis().max(1));
    assert!(!sink.wait_for_count(2, Duration::from_millis(200)));
    iodispatch::test_complete!("shutdown_stops_the_worker");
}
