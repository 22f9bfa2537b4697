//! Property-based tests for the framing layer.
//!
//! Runs over real loopback sockets: whatever sequence of packets goes in one
//! side must come out the other, byte for byte and in order, independent of
//! payload contents and compression threshold.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use agnos_core::SocketTransport;
use proptest::prelude::*;

fn pair() -> (SocketTransport, SocketTransport) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let outbound = TcpStream::connect(addr).expect("connect");
    let (inbound, _) = listener.accept().expect("accept");
    (
        SocketTransport::from_stream(outbound).expect("wrap outbound"),
        SocketTransport::from_stream(inbound).expect("wrap inbound"),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn packets_round_trip_in_order(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..2048), 1..8),
        threshold in prop_oneof![Just(-1i32), 0..512i32],
    ) {
        let (a, b) = pair();
        a.set_compression_threshold(threshold);

        for (seq, payload) in payloads.iter().enumerate() {
            let mut tx = a.begin_write(seq as i32 + 1).expect("begin write");
            tx.write_all(payload).expect("buffer payload");
            tx.end().expect("emit packet");
        }

        for (seq, payload) in payloads.iter().enumerate() {
            let mut rx = b.begin_read().expect("begin read");
            prop_assert_eq!(rx.seq(), seq as i32 + 1);
            let mut out = Vec::new();
            rx.read_to_end(&mut out).expect("drain payload");
            prop_assert_eq!(&out, payload);
        }

        // No leftover bytes after the last packet: closing the writer makes
        // the next read observe a clean EOF.
        drop(a);
        prop_assert!(matches!(b.begin_read(), Err(agnos_core::TransportError::Eof)));
    }
}
