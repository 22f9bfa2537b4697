//! Wire model for the Agnos RPC protocol.
//!
//! Everything on an Agnos connection is a *packet*: a fixed 12-byte header
//! (sequence number, payload length, uncompressed length) followed by a
//! payload serialized by *packers*, small codecs identified by dense numeric
//! ids. This crate defines the packet header, the command and reply codes,
//! the tagged [`Value`] runtime model, the packer set, the self-describing
//! [`HeteroMap`], and the registry that resolves packer ids at decode time.
//!
//! The crate performs no I/O of its own; packers read and write through
//! `std::io::{Read, Write}`, which the transport layer's transactions
//! implement.

pub mod command;
pub mod errors;
pub mod heteromap;
pub mod packers;
pub mod packet;
pub mod registry;
pub mod time;
pub mod value;

pub use command::{Command, ReplyCode};
pub use errors::{GenericError, HeaderError, PackedException, PackerError, ProtocolError};
pub use heteromap::{HKey, HeteroMap};
pub use packers::{Packer, RecordType};
pub use packet::PacketHeader;
pub use registry::PackerRegistry;
pub use time::DateTime;
pub use value::Value;
