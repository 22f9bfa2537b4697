//! Socket transport with transactional packet I/O.
//!
//! [`SocketTransport`] wraps a TCP stream and hands out one transaction at a
//! time per side: [`ReadTransaction`] consumes exactly one inbound packet,
//! [`WriteTransaction`] accumulates exactly one outbound packet and emits it
//! (header, then payload, atomically with respect to other writers) on
//! [`WriteTransaction::end`].
//!
//! # Invariants
//!
//! - A read transaction is bounded: callers can never observe bytes beyond
//!   the current packet, and dropping the transaction leaves the stream
//!   positioned at the next packet header.
//! - Each side's lock has single-thread ownership semantics; `begin_read`
//!   and `begin_write` from the thread already holding that side fail with
//!   [`TransportError::Reentrant`] instead of deadlocking.

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use agnos_proto::PacketHeader;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use zerocopy::IntoBytes as _;

use crate::error::TransportError;

/// Write buffers keep this much capacity across transactions.
const WRITE_BUFFER_CAPACITY: usize = 128 * 1024;

/// Staging buffer size for inflating compressed payloads.
const INFLATE_CHUNK: usize = 8 * 1024;

/// A mutex with single-thread ownership semantics.
///
/// Acquisition from the thread that already owns the lock is reported as an
/// error before any blocking happens.
struct TxLock<T> {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    // Only the owning thread locks `data`, so this mutex is uncontended; it
    // exists to hand out `&mut T` without unsafe code.
    data: Mutex<T>,
}

impl<T> TxLock<T> {
    fn new(value: T) -> Self {
        Self { owner: Mutex::new(None), released: Condvar::new(), data: Mutex::new(value) }
    }

    fn acquire(&self, side: &'static str) -> Result<TxGuard<'_, T>, TransportError> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(me) {
            return Err(TransportError::Reentrant(side));
        }
        while owner.is_some() {
            owner = self.released.wait(owner).unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        drop(owner);

        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(TxGuard { lock: self, data: Some(data) })
    }
}

struct TxGuard<'a, T> {
    lock: &'a TxLock<T>,
    data: Option<MutexGuard<'a, T>>,
}

impl<T> TxGuard<'_, T> {
    #[allow(clippy::expect_used)]
    fn get(&mut self) -> &mut T {
        // INVARIANT: `data` is Some from construction until drop.
        self.data.as_deref_mut().expect("transaction data present until drop")
    }
}

impl<T> Drop for TxGuard<'_, T> {
    fn drop(&mut self) {
        // Release the data mutex before surrendering ownership.
        self.data.take();
        let mut owner = self.lock.owner.lock().unwrap_or_else(PoisonError::into_inner);
        *owner = None;
        self.lock.released.notify_one();
    }
}

struct ReadHalf {
    stream: BufReader<TcpStream>,
}

struct WriteHalf {
    stream: TcpStream,
    buf: Vec<u8>,
    seq: i32,
}

/// Connection-oriented transport carrying sequenced, optionally compressed
/// packets.
pub struct SocketTransport {
    peer: SocketAddr,
    // Used only for `close`; actual I/O goes through the halves.
    shutdown: TcpStream,
    read: TxLock<ReadHalf>,
    write: TxLock<WriteHalf>,
    // Negative disables compression entirely.
    compression_threshold: AtomicI32,
}

impl SocketTransport {
    /// Connect to a listening Agnos endpoint.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect(addr) {
                Ok(stream) => return Self::from_stream(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(TransportError::Io(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no address for {host}"))
        })))
    }

    /// Wrap an established connection (e.g. one returned by `accept`).
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let shutdown = stream.try_clone()?;
        let read_stream = stream.try_clone()?;
        Ok(Self {
            peer,
            shutdown,
            read: TxLock::new(ReadHalf { stream: BufReader::new(read_stream) }),
            write: TxLock::new(WriteHalf {
                stream,
                buf: Vec::with_capacity(WRITE_BUFFER_CAPACITY),
                seq: 0,
            }),
            compression_threshold: AtomicI32::new(-1),
        })
    }

    /// Address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Current compression threshold; negative means compression is off.
    pub fn compression_threshold(&self) -> i32 {
        self.compression_threshold.load(Ordering::Relaxed)
    }

    /// Compress outgoing payloads strictly larger than `threshold` bytes.
    pub fn set_compression_threshold(&self, threshold: i32) {
        self.compression_threshold.store(threshold, Ordering::Relaxed);
    }

    /// Turn outgoing compression off.
    pub fn disable_compression(&self) {
        self.set_compression_threshold(-1);
    }

    /// Shut the connection down in both directions.
    ///
    /// Blocked readers observe [`TransportError::Eof`], blocked writers an
    /// I/O error.
    pub fn close(&self) {
        let _ = self.shutdown.shutdown(Shutdown::Both);
    }

    /// Block until a packet header arrives, then open the read transaction.
    ///
    /// # Errors
    ///
    /// [`TransportError::Eof`] when the peer closed, `Reentrant` when this
    /// thread already holds the read side, `Io`/`Frame` on stream faults.
    pub fn begin_read(&self) -> Result<ReadTransaction<'_>, TransportError> {
        let mut guard = self.read.acquire("read")?;

        let mut raw = [0u8; PacketHeader::SIZE];
        let mut filled = 0;
        while filled < raw.len() {
            match guard.get().stream.read(&mut raw[filled..]) {
                Ok(0) => return Err(TransportError::Eof),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        let header = PacketHeader::parse(raw)?;
        tracing::trace!(
            seq = header.seq(),
            len = header.payload_len(),
            uncompressed = header.uncompressed_len(),
            "begin read"
        );

        let inflate = header.is_compressed().then(|| Inflater {
            decompress: Decompress::new(true),
            out_remaining: header.uncompressed_len() as usize,
            inbuf: vec![0u8; INFLATE_CHUNK],
            inpos: 0,
            inlen: 0,
        });

        Ok(ReadTransaction {
            seq: header.seq(),
            raw_remaining: header.payload_len() as usize,
            inflate,
            guard,
        })
    }

    /// Open the write transaction for a packet with the given sequence
    /// number.
    ///
    /// # Errors
    ///
    /// `Reentrant` when this thread already holds the write side.
    pub fn begin_write(&self, seq: i32) -> Result<WriteTransaction<'_>, TransportError> {
        let mut guard = self.write.acquire("write")?;
        tracing::trace!(seq, "begin write");
        {
            let half = guard.get();
            half.seq = seq;
            half.buf.clear();
        }
        Ok(WriteTransaction {
            guard,
            threshold: self.compression_threshold(),
            finished: false,
        })
    }
}

impl fmt::Display for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<SocketTransport {}>", self.peer)
    }
}

/// Streaming zlib state for one compressed payload.
struct Inflater {
    decompress: Decompress,
    out_remaining: usize,
    inbuf: Vec<u8>,
    inpos: usize,
    inlen: usize,
}

/// The scope in which one inbound packet is consumed.
///
/// Implements [`Read`] over the packet payload, inflating transparently when
/// the header marked it compressed. Reads never cross the packet boundary;
/// the payload running dry mid-value surfaces as `UnexpectedEof`. Dropping
/// the transaction discards unread payload bytes and releases the read side.
pub struct ReadTransaction<'a> {
    seq: i32,
    raw_remaining: usize,
    inflate: Option<Inflater>,
    guard: TxGuard<'a, ReadHalf>,
}

impl ReadTransaction<'_> {
    /// The sequence number the peer attached to this packet.
    pub fn seq(&self) -> i32 {
        self.seq
    }

    fn read_plain(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = buf.len().min(self.raw_remaining);
        if want == 0 {
            return Ok(0);
        }
        let got = self.guard.get().stream.read(&mut buf[..want])?;
        if got == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.raw_remaining -= got;
        Ok(got)
    }

    fn read_inflated(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let Some(inflate) = self.inflate.as_mut() else {
                return Err(io::Error::other("read transaction lost its inflater"));
            };
            let want = buf.len().min(inflate.out_remaining);
            if want == 0 {
                return Ok(0);
            }

            // Refill the staging buffer from the bounded raw payload.
            if inflate.inpos == inflate.inlen && self.raw_remaining > 0 {
                let chunk = inflate.inbuf.len().min(self.raw_remaining);
                let got = self.guard.get().stream.read(&mut inflate.inbuf[..chunk])?;
                if got == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                self.raw_remaining -= got;
                inflate.inpos = 0;
                inflate.inlen = got;
            }

            let before_in = inflate.decompress.total_in();
            let before_out = inflate.decompress.total_out();
            let status = inflate
                .decompress
                .decompress(
                    &inflate.inbuf[inflate.inpos..inflate.inlen],
                    &mut buf[..want],
                    FlushDecompress::None,
                )
                .map_err(io::Error::other)?;
            inflate.inpos += (inflate.decompress.total_in() - before_in) as usize;
            let produced = (inflate.decompress.total_out() - before_out) as usize;
            inflate.out_remaining -= produced;

            if produced > 0 {
                return Ok(produced);
            }
            match status {
                Status::StreamEnd => {
                    // The deflate stream ended short of the declared size.
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Status::Ok | Status::BufError => {
                    if inflate.inpos == inflate.inlen && self.raw_remaining == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into());
                    }
                }
            }
        }
    }
}

impl Read for ReadTransaction<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inflate.is_some() {
            self.read_inflated(buf)
        } else {
            self.read_plain(buf)
        }
    }
}

impl Drop for ReadTransaction<'_> {
    fn drop(&mut self) {
        // Skip unread payload bytes so the stream lands on the next header.
        let mut scratch = [0u8; 4096];
        while self.raw_remaining > 0 {
            let want = scratch.len().min(self.raw_remaining);
            match self.guard.get().stream.read(&mut scratch[..want]) {
                Ok(0) | Err(_) => break,
                Ok(n) => self.raw_remaining -= n,
            }
        }
        tracing::trace!(seq = self.seq, "end read");
    }
}

/// The scope in which one outbound packet is produced.
///
/// Implements [`Write`] into an in-memory buffer; nothing touches the socket
/// until [`WriteTransaction::end`], which emits header and payload in one
/// atomic sequence and flushes. Dropping the transaction without calling
/// `end` cancels it: the buffer is discarded and nothing is emitted.
pub struct WriteTransaction<'a> {
    guard: TxGuard<'a, WriteHalf>,
    threshold: i32,
    finished: bool,
}

impl WriteTransaction<'_> {
    /// The sequence number this packet will carry.
    pub fn seq(&mut self) -> i32 {
        self.guard.get().seq
    }

    /// Discard everything buffered so far, keeping the transaction and its
    /// sequence number. This is how error replies reuse a transaction whose
    /// buffer already holds a partial success payload.
    pub fn restart(&mut self) {
        self.guard.get().buf.clear();
    }

    /// Number of bytes buffered so far.
    pub fn buffered(&mut self) -> usize {
        self.guard.get().buf.len()
    }

    /// Emit the packet and release the write side.
    ///
    /// An empty buffer emits nothing at all, not even a header. Payloads
    /// strictly larger than the compression threshold (when enabled) are
    /// deflated, with the header's uncompressed-length field set to the
    /// original size.
    ///
    /// # Errors
    ///
    /// I/O failures leave the connection unusable; the buffered packet is
    /// dropped as if the transaction had been cancelled.
    pub fn end(mut self) -> Result<(), TransportError> {
        self.finished = true;
        let threshold = self.threshold;
        let half = self.guard.get();
        if half.buf.is_empty() {
            tracing::trace!(seq = half.seq, "end write (empty)");
            return Ok(());
        }

        let payload_len = half.buf.len();
        let compress = threshold >= 0 && payload_len > threshold as usize;
        if compress {
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(payload_len / 2), Compression::default());
            encoder.write_all(&half.buf)?;
            let deflated = encoder.finish()?;
            let header = PacketHeader::new(
                half.seq,
                wire_len(deflated.len())?,
                wire_len(payload_len)?,
            );
            tracing::trace!(
                seq = half.seq,
                raw = payload_len,
                deflated = deflated.len(),
                "end write (compressed)"
            );
            half.stream.write_all(header.as_bytes())?;
            half.stream.write_all(&deflated)?;
        } else {
            let header = PacketHeader::new(half.seq, wire_len(payload_len)?, 0);
            tracing::trace!(seq = half.seq, len = payload_len, "end write");
            half.stream.write_all(header.as_bytes())?;
            half.stream.write_all(&half.buf)?;
        }
        half.stream.flush()?;
        half.buf.clear();
        Ok(())
    }
}

impl Write for WriteTransaction<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.get().buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let half = self.guard.get();
            tracing::trace!(seq = half.seq, "cancel write");
            half.buf.clear();
        }
    }
}

fn wire_len(len: usize) -> Result<i32, TransportError> {
    i32::try_from(len).map_err(|_| TransportError::Oversize(len))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn pair() -> (SocketTransport, SocketTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let outbound = TcpStream::connect(addr).unwrap();
        let (inbound, _) = listener.accept().unwrap();
        (
            SocketTransport::from_stream(outbound).unwrap(),
            SocketTransport::from_stream(inbound).unwrap(),
        )
    }

    #[test]
    fn reads_never_cross_the_packet_boundary() {
        let (a, b) = pair();

        let mut tx = a.begin_write(1).unwrap();
        tx.write_all(b"abcdef").unwrap();
        tx.end().unwrap();

        let mut tx = a.begin_write(2).unwrap();
        tx.write_all(b"xyz").unwrap();
        tx.end().unwrap();

        let mut rx = b.begin_read().unwrap();
        assert_eq!(rx.seq(), 1);
        let mut buf = [0u8; 64];
        let got = rx.read(&mut buf).unwrap();
        assert_eq!(&buf[..got], b"abcdef");
        assert_eq!(rx.read(&mut buf).unwrap(), 0);
        drop(rx);

        let mut rx = b.begin_read().unwrap();
        assert_eq!(rx.seq(), 2);
        let mut out = Vec::new();
        rx.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"xyz");
    }

    #[test]
    fn dropping_a_transaction_skips_unread_payload() {
        let (a, b) = pair();

        let mut tx = a.begin_write(7).unwrap();
        tx.write_all(&[0xAA; 1000]).unwrap();
        tx.end().unwrap();

        let mut tx = a.begin_write(8).unwrap();
        tx.write_all(b"next").unwrap();
        tx.end().unwrap();

        // Consume only three bytes of the first packet.
        let mut rx = b.begin_read().unwrap();
        let mut buf = [0u8; 3];
        rx.read_exact(&mut buf).unwrap();
        drop(rx);

        let rx = b.begin_read().unwrap();
        assert_eq!(rx.seq(), 8);
    }

    #[test]
    fn empty_write_emits_nothing() {
        let (a, b) = pair();

        a.begin_write(3).unwrap().end().unwrap();

        let mut tx = a.begin_write(4).unwrap();
        tx.write_all(b"real").unwrap();
        tx.end().unwrap();

        // The empty transaction left no trace; the first packet seen is seq 4.
        let rx = b.begin_read().unwrap();
        assert_eq!(rx.seq(), 4);
    }

    #[test]
    fn cancelled_writes_emit_nothing() {
        let (a, b) = pair();

        let mut tx = a.begin_write(5).unwrap();
        tx.write_all(b"discard me").unwrap();
        drop(tx);

        let mut tx = a.begin_write(6).unwrap();
        tx.write_all(b"kept").unwrap();
        tx.end().unwrap();

        let rx = b.begin_read().unwrap();
        assert_eq!(rx.seq(), 6);
    }

    #[test]
    fn restart_discards_the_buffer_but_keeps_the_sequence() {
        let (a, b) = pair();

        let mut tx = a.begin_write(9).unwrap();
        tx.write_all(b"partial success payload").unwrap();
        tx.restart();
        tx.write_all(b"error reply").unwrap();
        tx.end().unwrap();

        let mut rx = b.begin_read().unwrap();
        assert_eq!(rx.seq(), 9);
        let mut out = Vec::new();
        rx.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"error reply");
    }

    #[test]
    fn begin_is_not_reentrant() {
        let (a, b) = pair();

        let mut tx = a.begin_write(1).unwrap();
        tx.write_all(b"x").unwrap();
        assert!(matches!(a.begin_write(2), Err(TransportError::Reentrant("write"))));
        tx.end().unwrap();

        let rx = b.begin_read().unwrap();
        assert!(matches!(b.begin_read(), Err(TransportError::Reentrant("read"))));
        drop(rx);
    }

    #[test]
    fn clean_close_reads_as_eof() {
        let (a, b) = pair();
        drop(a);
        assert!(matches!(b.begin_read(), Err(TransportError::Eof)));
    }

    #[test]
    fn closing_mid_packet_fails_the_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut raw = TcpStream::connect(addr).unwrap();
        let (inbound, _) = listener.accept().unwrap();
        let b = SocketTransport::from_stream(inbound).unwrap();

        // Header claims 100 payload bytes but only 10 arrive.
        raw.write_all(PacketHeader::new(1, 100, 0).as_bytes()).unwrap();
        raw.write_all(&[0u8; 10]).unwrap();
        raw.flush().unwrap();
        drop(raw);

        let mut rx = b.begin_read().unwrap();
        let mut buf = [0u8; 100];
        let err = rx.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn compressed_payloads_round_trip() {
        let (a, b) = pair();
        a.set_compression_threshold(100);

        let payload = vec![b'A'; 4096];
        let mut tx = a.begin_write(11).unwrap();
        tx.write_all(&payload).unwrap();
        tx.end().unwrap();

        let mut rx = b.begin_read().unwrap();
        let mut out = Vec::new();
        rx.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn compressed_header_carries_both_lengths() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let outbound = TcpStream::connect(addr).unwrap();
        let (inbound, _) = listener.accept().unwrap();
        let a = SocketTransport::from_stream(outbound).unwrap();
        a.set_compression_threshold(100);

        let mut tx = a.begin_write(12).unwrap();
        tx.write_all(&[b'A'; 4096]).unwrap();
        tx.end().unwrap();

        let mut raw = inbound;
        let mut header = [0u8; PacketHeader::SIZE];
        raw.read_exact(&mut header).unwrap();
        let header = PacketHeader::parse(header).unwrap();
        assert_eq!(header.seq(), 12);
        assert_eq!(header.uncompressed_len(), 4096);
        assert!(header.payload_len() < 4096);
        assert!(header.is_compressed());

        let mut deflated = vec![0u8; header.payload_len() as usize];
        raw.read_exact(&mut deflated).unwrap();
        let mut inflated = Vec::new();
        flate2::read::ZlibDecoder::new(&deflated[..]).read_to_end(&mut inflated).unwrap();
        assert_eq!(inflated, vec![b'A'; 4096]);
    }

    #[test]
    fn threshold_off_means_plain_payloads() {
        let (a, b) = pair();
        a.disable_compression();

        let payload = vec![b'A'; 4096];
        let mut tx = a.begin_write(13).unwrap();
        tx.write_all(&payload).unwrap();
        tx.end().unwrap();

        let mut rx = b.begin_read().unwrap();
        let mut out = Vec::new();
        rx.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn sequence_numbers_pass_through_unordered() {
        let (a, b) = pair();

        for seq in [5, 3, 44] {
            let mut tx = a.begin_write(seq).unwrap();
            tx.write_all(b".").unwrap();
            tx.end().unwrap();
        }
        for seq in [5, 3, 44] {
            assert_eq!(b.begin_read().unwrap().seq(), seq);
        }
    }
}
