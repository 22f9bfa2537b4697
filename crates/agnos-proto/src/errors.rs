//! Wire-level error types.
//!
//! Strongly-typed errors for the serialization layer. [`PackerError`] covers
//! internal decode invariants (short reads, tag mismatches, hostile counts);
//! the dispatch boundary maps it to [`ProtocolError`] before anything is
//! reported to the peer. [`ProtocolError`], [`PackedException`] and
//! [`GenericError`] correspond one-to-one to reply codes 1, 2 and 3.

use std::io;

use thiserror::Error;

use crate::value::Value;

/// Errors raised while encoding or decoding values.
#[derive(Error, Debug)]
pub enum PackerError {
    /// The payload ended in the middle of a value.
    #[error("unexpected end of packet payload")]
    Eof,

    /// Underlying read or write failed.
    #[error("i/o error while packing: {0}")]
    Io(io::Error),

    /// The value's runtime tag does not match the packer.
    #[error("type mismatch: {packer} packer cannot carry a {value} value")]
    TypeMismatch {
        /// Name of the packer that was applied.
        packer: &'static str,
        /// Tag of the value it was applied to.
        value: &'static str,
    },

    /// A container prefix declared a negative element count.
    #[error("negative element count: {0}")]
    NegativeCount(i32),

    /// A length does not fit the wire's signed 32-bit prefix.
    #[error("value too large for wire: {0} bytes")]
    Oversize(usize),

    /// A HeteroMap payload referenced an id absent from the registry.
    #[error("unknown packer id: {0}")]
    UnknownPackerId(i32),

    /// A HeteroMap key, or its declared packer, is outside the permitted
    /// key set {bool, int32, int64, float, string, datetime}.
    #[error("invalid hetero-map key: {0}")]
    InvalidKey(&'static str),

    /// A record value's field count does not match its declared shape.
    #[error("record {name} expects {expected} fields, got {found}")]
    FieldCount {
        /// Record type name.
        name: String,
        /// Declared field count.
        expected: usize,
        /// Fields actually present.
        found: usize,
    },

    /// The packer has no wire id and cannot be used where one is required.
    #[error("{0} packer has no wire id; wrap it in a registered custom id")]
    Unidentified(&'static str),

    /// A string payload was not valid UTF-8.
    #[error("string payload is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl From<io::Error> for PackerError {
    fn from(err: io::Error) -> Self {
        // read_exact reports a bounded payload running dry as UnexpectedEof;
        // that is a short read, not an I/O fault.
        if err.kind() == io::ErrorKind::UnexpectedEof { Self::Eof } else { Self::Io(err) }
    }
}

/// Malformed packet header.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// The payload length field is negative.
    #[error("negative payload length: {0}")]
    NegativeLength(i32),

    /// The uncompressed length field is negative.
    #[error("negative uncompressed length: {0}")]
    NegativeUncompressed(i32),
}

/// A protocol violation, carried to the peer as reply code 1.
///
/// Malformed commands, unknown packer ids, invalid object references and
/// sequence mismatches all surface as this type. It terminates the offending
/// transaction but not the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("protocol error: {0}")]
pub struct ProtocolError(pub String);

impl ProtocolError {
    /// Build from anything displayable.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<PackerError> for ProtocolError {
    fn from(err: PackerError) -> Self {
        Self(err.to_string())
    }
}

/// An unmodeled handler failure, carried as reply code 3.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}, with remote traceback:\n{traceback}")]
pub struct GenericError {
    /// Human-readable failure description.
    pub message: String,
    /// Stack rendered on the remote side.
    pub traceback: String,
}

impl GenericError {
    /// Build from a message and a rendered remote stack.
    pub fn new(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self { message: message.into(), traceback: traceback.into() }
    }
}

/// A user-defined throwable record, carried as reply code 2.
///
/// `class_id` is the record packer's wire id; `value` holds the record's
/// fields. The receiving side resolves the id in its registry to decode and
/// re-raise the exception.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("remote exception (class id {class_id})")]
pub struct PackedException {
    /// Wire id of the exception's record packer.
    pub class_id: i32,
    /// The exception's fields as a record value.
    pub value: Value,
}

impl PackedException {
    /// Build from a class id and a record value.
    pub fn new(class_id: i32, value: Value) -> Self {
        Self { class_id, value }
    }
}
