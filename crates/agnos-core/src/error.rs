//! Transport error types.
//!
//! A clean close by the peer ([`TransportError::Eof`]) is expected at session
//! end and handled as termination; everything else is unrecoverable for the
//! connection that raised it.

use std::io;

use agnos_proto::HeaderError;
use thiserror::Error;

/// Errors raised by the framing transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("peer closed the connection")]
    Eof,

    /// I/O fault on the underlying stream.
    #[error("transport i/o: {0}")]
    Io(#[from] io::Error),

    /// The peer sent a header this protocol cannot have produced.
    #[error("malformed packet header: {0}")]
    Frame(#[from] HeaderError),

    /// A thread tried to open a transaction it already holds.
    #[error("{0} transaction is not reentrant")]
    Reentrant(&'static str),

    /// A payload does not fit the wire's signed 32-bit length field.
    #[error("packet payload too large: {0} bytes")]
    Oversize(usize),

    /// A subprocess server failed the startup handshake.
    #[error("subprocess handshake failed: {0}")]
    Handshake(String),
}

impl TransportError {
    /// Whether this is the expected clean end of a session.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}
