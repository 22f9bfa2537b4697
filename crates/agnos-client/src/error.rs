//! Client-side call errors.

use agnos_core::TransportError;
use agnos_proto::{GenericError, PackedException, PackerError, ProtocolError};
use thiserror::Error;

/// Everything a call site can observe when a call does not return a value.
#[derive(Error, Debug)]
pub enum CallError {
    /// The peer reported a protocol violation (reply code 1), or this side
    /// detected one while decoding.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The handler raised a schema exception (reply code 2).
    #[error(transparent)]
    Packed(#[from] PackedException),

    /// The handler failed outside the schema (reply code 3).
    #[error(transparent)]
    Generic(#[from] GenericError),

    /// Encoding the request failed locally.
    #[error(transparent)]
    Packer(#[from] PackerError),

    /// The transport failed while issuing the call.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection died while the call was outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The reply wait timed out; the slot was discarded and the eventual
    /// reply will be absorbed by the pump.
    #[error("timed out waiting for reply {seq}")]
    Timeout {
        /// Sequence number of the abandoned call.
        seq: i32,
    },

    /// The peer is a different service than this stub was generated for.
    #[error("wrong service: expected {expected:?}, got {found:?}")]
    WrongService {
        /// Name the stub expects.
        expected: String,
        /// Name the server reported.
        found: String,
    },

    /// The peer's IDL does not match this stub's.
    #[error("incompatible IDL magic: expected {expected:?}, got {found:?}")]
    WrongMagic {
        /// Magic the stub expects.
        expected: String,
        /// Magic the server reported.
        found: String,
    },
}
