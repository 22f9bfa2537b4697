//! Framing transport for the Agnos RPC protocol.
//!
//! A transport presents a reliable byte stream through two transactional
//! scopes, read and write, each carrying exactly one packet. The transport
//! never interprets payloads; packers from `agnos-proto` read and write
//! through the transaction guards, which implement `std::io::{Read, Write}`.
//!
//! Each side of a transport is serialized by a lock with single-thread
//! ownership semantics: re-entry from the owning thread is an error, never a
//! deadlock. Payloads above a per-transport threshold are transparently
//! zlib-compressed on the way out and inflated on the way in.

pub mod error;
pub mod proc;
pub mod transport;

pub use error::TransportError;
pub use proc::ProcTransport;
pub use transport::{ReadTransaction, SocketTransport, WriteTransaction};
