//! Server side of the Agnos RPC protocol.
//!
//! The [`Processor`] runs the per-connection command loop: decode a command
//! header, dispatch to the generated [`Service`] (or the built-in ping /
//! info / ref-count handlers), encode a reply. Host objects handed out as
//! proxies live in the server-wide [`ObjectTable`] until their reference
//! counts drain.
//!
//! Three serve modes wrap the loop: [`SimpleServer`] (one client at a time),
//! [`ThreadedServer`] (one thread per connection) and [`LibraryModeServer`]
//! (ephemeral port, handshake on stdout, exactly one client). The
//! [`cmdline`] module selects between them from `-m/-h/-p` switches.

pub mod cmdline;
pub mod error;
pub mod objects;
pub mod processor;
pub mod servers;

pub use cmdline::{Args, Mode};
pub use error::ServerError;
pub use objects::ObjectTable;
pub use processor::{CallContext, DispatchError, Processor, Service};
pub use servers::{LibraryModeServer, ServiceFactory, SimpleServer, ThreadedServer};
