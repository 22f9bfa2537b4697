//! Subprocess transport.
//!
//! Launches a server executable in library mode and connects to it through
//! the startup handshake: the child prints three newline-terminated lines to
//! its standard output (the literal `AGNOS`, a host, and a port) and then
//! serves exactly one connection on that endpoint.

use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use crate::error::TransportError;
use crate::transport::SocketTransport;

/// A socket transport bound to the lifetime of a child server process.
///
/// Closing (or dropping) the transport also terminates the child.
pub struct ProcTransport {
    child: Child,
    transport: Arc<SocketTransport>,
    closed: bool,
}

impl std::fmt::Debug for ProcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcTransport")
            .field("child", &self.child.id())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ProcTransport {
    /// Launch `executable -m lib` and connect to it.
    pub fn connect(executable: impl AsRef<OsStr>) -> Result<Self, TransportError> {
        Self::connect_with_args(executable, ["-m", "lib"])
    }

    /// Launch `executable` with explicit arguments and connect to it.
    ///
    /// The child's standard error is inherited so server-side diagnostics
    /// stay visible; standard output belongs to the handshake.
    pub fn connect_with_args(
        executable: impl AsRef<OsStr>,
        args: impl IntoIterator<Item: AsRef<OsStr>>,
    ) -> Result<Self, TransportError> {
        let child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        Self::from_child(child)
    }

    /// Perform the handshake against an already-spawned child.
    pub fn from_child(mut child: Child) -> Result<Self, TransportError> {
        match Self::handshake(&mut child) {
            Ok(transport) => {
                Ok(Self { child, transport: Arc::new(transport), closed: false })
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(err)
            }
        }
    }

    fn handshake(child: &mut Child) -> Result<SocketTransport, TransportError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Handshake("child stdout was not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut next_line = |what: &str| -> Result<String, TransportError> {
            match lines.next() {
                Some(Ok(line)) => Ok(line),
                Some(Err(err)) => Err(TransportError::Handshake(format!(
                    "reading {what} from child stdout: {err}"
                ))),
                None => Err(TransportError::Handshake(format!(
                    "server exited before printing {what}"
                ))),
            }
        };

        let banner = next_line("the banner")?;
        if banner != "AGNOS" {
            return Err(TransportError::Handshake(format!(
                "process is not an agnos server (first line {banner:?})"
            )));
        }
        let host = next_line("the host")?;
        let port_line = next_line("the port")?;
        let port: u16 = port_line.parse().map_err(|_| {
            TransportError::Handshake(format!("unparsable port {port_line:?}"))
        })?;

        tracing::debug!(%host, port, "subprocess handshake complete");
        SocketTransport::connect(&host, port)
    }

    /// The transport connected to the child server.
    pub fn transport(&self) -> Arc<SocketTransport> {
        Arc::clone(&self.transport)
    }

    /// Close the connection and terminate the child process.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!(pid = self.child.id(), "closing subprocess transport");
        self.transport.close();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ProcTransport {
    fn drop(&mut self) {
        self.close();
    }
}
