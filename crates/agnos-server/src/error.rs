//! Server error types.

use std::io;

use agnos_core::TransportError;
use thiserror::Error;

/// Errors that can occur while standing up or running a server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid command-line switch combination.
    #[error("invalid command line: {0}")]
    Switch(String),

    /// Binding the listen socket failed.
    #[error("bind failed: {0}")]
    Bind(io::Error),

    /// Accepting or serving a connection failed at the transport level.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Other I/O failure (accept loop, handshake output).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
