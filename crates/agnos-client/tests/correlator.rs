//! Correlator tests against a scripted raw-wire server.
//!
//! The peer side of each test speaks the protocol by hand over a bare
//! transport, which makes it easy to stage the awkward schedules: replies
//! out of order, replies to abandoned calls, replies that never come.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use agnos_client::{CallError, Client};
use agnos_core::SocketTransport;
use agnos_proto::packers::{self, Packer};
use agnos_proto::{PackerRegistry, RecordType, ReplyCode, Value};

const CLS_TEST_ERROR: i32 = 1400;

fn registry() -> Arc<PackerRegistry> {
    let mut registry = PackerRegistry::new();
    registry
        .register(Packer::Record(RecordType::throwable(
            CLS_TEST_ERROR,
            "TestError",
            vec![Packer::Str],
        )))
        .expect("registering the exception class");
    Arc::new(registry)
}

fn harness() -> (Client, SocketTransport) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let outbound = TcpStream::connect(addr).expect("connect");
    let (inbound, _) = listener.accept().expect("accept");

    let transport = Arc::new(SocketTransport::from_stream(outbound).expect("client transport"));
    let client = Client::new(transport, registry()).expect("client");
    (client, SocketTransport::from_stream(inbound).expect("server transport"))
}

/// Read one request off the wire, returning (seq, command byte).
fn read_request(t: &SocketTransport) -> (i32, i8) {
    let mut rt = t.begin_read().expect("request");
    let seq = rt.seq();
    let cmd = packers::unpack_i8(&mut rt).expect("command byte");
    (seq, cmd)
}

fn reply_success_i32(t: &SocketTransport, seq: i32, value: i32) {
    let mut tx = t.begin_write(seq).expect("begin reply");
    packers::pack_i8(ReplyCode::Success.to_wire(), &mut tx).expect("pack");
    packers::pack_i32(value, &mut tx).expect("pack");
    tx.end().expect("flush");
}

fn echo_ping(t: &SocketTransport) {
    let mut rt = t.begin_read().expect("ping request");
    let seq = rt.seq();
    let cmd = packers::unpack_i8(&mut rt).expect("command");
    assert_eq!(cmd, 0, "expected a ping");
    let payload = packers::unpack_str(&mut rt).expect("payload");
    drop(rt);

    let mut tx = t.begin_write(seq).expect("begin reply");
    packers::pack_i8(ReplyCode::Success.to_wire(), &mut tx).expect("pack");
    packers::pack_str(&payload, &mut tx).expect("pack");
    tx.end().expect("flush");
}

#[test]
fn replies_resolve_out_of_order() {
    let (client, server) = harness();

    let seq_a = client.begin_call(1, Some(Packer::Int32)).expect("call a").send().expect("send");
    let seq_b = client.begin_call(2, Some(Packer::Int32)).expect("call b").send().expect("send");
    assert_ne!(seq_a, seq_b);

    let script = thread::spawn(move || {
        let (first, _) = read_request(&server);
        let (second, _) = read_request(&server);
        assert_eq!((first, second), (seq_a, seq_b));
        // Answer the second call first.
        reply_success_i32(&server, seq_b, 222);
        reply_success_i32(&server, seq_a, 111);
        server
    });

    // Waiting on the first call does not consume the second one's reply.
    assert_eq!(client.get_reply(seq_a, None).expect("reply a"), Value::Int32(111));
    assert_eq!(client.get_reply(seq_b, None).expect("reply b"), Value::Int32(222));
    assert_eq!(client.pending_replies(), 0);

    drop(script.join().expect("script"));
}

#[test]
fn error_replies_raise_at_the_call_site() {
    let (client, server) = harness();

    let script = thread::spawn(move || {
        let (seq, _) = read_request(&server);
        let mut tx = server.begin_write(seq).expect("begin reply");
        packers::pack_i8(ReplyCode::ProtocolError.to_wire(), &mut tx).expect("pack");
        packers::pack_str("you did what now", &mut tx).expect("pack");
        tx.end().expect("flush");

        let (seq, _) = read_request(&server);
        let mut tx = server.begin_write(seq).expect("begin reply");
        packers::pack_i8(ReplyCode::PackedException.to_wire(), &mut tx).expect("pack");
        packers::pack_i32(CLS_TEST_ERROR, &mut tx).expect("pack");
        packers::pack_str("schema says no", &mut tx).expect("pack");
        tx.end().expect("flush");

        let (seq, _) = read_request(&server);
        let mut tx = server.begin_write(seq).expect("begin reply");
        packers::pack_i8(ReplyCode::GenericException.to_wire(), &mut tx).expect("pack");
        packers::pack_str("division by zero!", &mut tx).expect("pack");
        packers::pack_str("at remote.rs:17", &mut tx).expect("pack");
        tx.end().expect("flush");
        server
    });

    let err = client.invoke(1, &[], Some(Packer::Int32)).expect_err("protocol error");
    assert!(matches!(err, CallError::Protocol(ref p) if p.0 == "you did what now"));

    let err = client.invoke(2, &[], Some(Packer::Int32)).expect_err("packed exception");
    match err {
        CallError::Packed(exc) => {
            assert_eq!(exc.class_id, CLS_TEST_ERROR);
            assert_eq!(exc.value, Value::Record(vec![Value::Str("schema says no".into())]));
        }
        other => panic!("expected a packed exception, got {other:?}"),
    }

    let err = client.invoke(3, &[], Some(Packer::Int32)).expect_err("generic exception");
    match err {
        CallError::Generic(exc) => {
            assert_eq!(exc.message, "division by zero!");
            assert_eq!(exc.traceback, "at remote.rs:17");
        }
        other => panic!("expected a generic exception, got {other:?}"),
    }

    drop(script.join().expect("script"));
}

#[test]
fn discarded_replies_are_absorbed_by_the_pump() {
    let (client, server) = harness();

    let seq = client.begin_call(1, Some(Packer::Int32)).expect("call").send().expect("send");
    client.discard_reply(seq);

    let script = thread::spawn(move || {
        let (request_seq, _) = read_request(&server);
        reply_success_i32(&server, request_seq, 999);
        echo_ping(&server);
        server
    });

    // The discarded reply never surfaces; the connection keeps working.
    client.ping("after discard", None).expect("ping");
    assert_eq!(client.pending_replies(), 0);
    assert!(matches!(
        client.get_reply(seq, None),
        Err(CallError::Protocol(_))
    ));

    drop(script.join().expect("script"));
}

#[test]
fn timed_out_calls_are_discarded() {
    let (client, server) = harness();
    let (late_reply_tx, late_reply_rx) = mpsc::channel::<i32>();

    let script = thread::spawn(move || {
        let (seq, _) = read_request(&server);
        // Hold the reply until the caller has given up.
        let released = late_reply_rx.recv().expect("release signal");
        assert_eq!(released, seq);
        reply_success_i32(&server, seq, 424_242);
        echo_ping(&server);
        server
    });

    let seq = client.begin_call(1, Some(Packer::Int32)).expect("call").send().expect("send");
    let err = client.get_reply(seq, Some(Duration::from_millis(50))).expect_err("timeout");
    assert!(matches!(err, CallError::Timeout { seq: s } if s == seq));

    // The late reply lands in a discarded slot and vanishes.
    late_reply_tx.send(seq).expect("signal");
    client.ping("after timeout", None).expect("ping");
    assert_eq!(client.pending_replies(), 0);

    drop(script.join().expect("script"));
}

#[test]
fn ping_mismatch_is_a_protocol_error() {
    let (client, server) = harness();

    let script = thread::spawn(move || {
        let mut rt = server.begin_read().expect("ping request");
        let seq = rt.seq();
        let _ = packers::unpack_i8(&mut rt).expect("command");
        let _ = packers::unpack_str(&mut rt).expect("payload");
        drop(rt);

        let mut tx = server.begin_write(seq).expect("begin reply");
        packers::pack_i8(ReplyCode::Success.to_wire(), &mut tx).expect("pack");
        packers::pack_str("something else entirely", &mut tx).expect("pack");
        tx.end().expect("flush");
        server
    });

    let err = client.ping("marco", None).expect_err("mismatch");
    assert!(matches!(err, CallError::Protocol(_)));

    drop(script.join().expect("script"));
}

#[test]
fn unsolicited_replies_do_not_break_the_session() {
    let (client, server) = harness();

    let script = thread::spawn(move || {
        // A reply for a sequence number nobody issued.
        reply_success_i32(&server, 999, 1);
        echo_ping(&server);
        server
    });

    client.ping("still standing", None).expect("ping");
    drop(script.join().expect("script"));
}

#[test]
fn losing_the_connection_fails_pending_calls() {
    let (client, server) = harness();

    let seq = client.begin_call(1, Some(Packer::Int32)).expect("call").send().expect("send");
    let script = thread::spawn(move || {
        let _ = read_request(&server);
        drop(server);
    });

    let err = client.get_reply(seq, None).expect_err("lost");
    assert!(matches!(err, CallError::ConnectionLost(_)));
    script.join().expect("script");
}
