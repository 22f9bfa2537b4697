//! Serve modes.
//!
//! All three modes drive the same [`Processor`] loop; they differ only in
//! how connections are accepted and scheduled. The object table and packer
//! registry are shared across every connection of one server.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use agnos_core::SocketTransport;
use agnos_proto::PackerRegistry;

use crate::error::ServerError;
use crate::objects::ObjectTable;
use crate::processor::{Processor, Service};

/// Creates one [`Service`] instance per accepted connection.
pub trait ServiceFactory: Send + Sync {
    /// Build the service for a new session.
    fn create(&self) -> Box<dyn Service>;
}

impl<F> ServiceFactory for F
where
    F: Fn() -> Box<dyn Service> + Send + Sync,
{
    fn create(&self) -> Box<dyn Service> {
        self()
    }
}

/// State shared by every serve mode.
struct Listener {
    listener: TcpListener,
    factory: Arc<dyn ServiceFactory>,
    registry: Arc<PackerRegistry>,
    objects: Arc<ObjectTable>,
    compression_threshold: i32,
}

impl Listener {
    fn bind(
        host: &str,
        port: u16,
        factory: Arc<dyn ServiceFactory>,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((host, port)).map_err(ServerError::Bind)?;
        tracing::info!(addr = %listener.local_addr()?, "server listening");
        Ok(Self {
            listener,
            factory,
            registry,
            objects: Arc::new(ObjectTable::new()),
            compression_threshold: -1,
        })
    }

    fn accept(&self) -> Result<Processor, ServerError> {
        let (stream, peer) = self.listener.accept()?;
        tracing::info!(%peer, "client connected");
        Ok(self.processor(stream)?)
    }

    fn processor(&self, stream: TcpStream) -> Result<Processor, agnos_core::TransportError> {
        let transport = SocketTransport::from_stream(stream)?;
        transport.set_compression_threshold(self.compression_threshold);
        Ok(Processor::new(
            Arc::new(transport),
            self.factory.create(),
            Arc::clone(&self.objects),
            Arc::clone(&self.registry),
        ))
    }
}

/// Serves one client at a time; the next `accept` happens only after the
/// current session terminates.
pub struct SimpleServer {
    inner: Listener,
}

impl SimpleServer {
    /// Bind the listen socket.
    pub fn bind(
        host: &str,
        port: u16,
        factory: Arc<dyn ServiceFactory>,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, ServerError> {
        Ok(Self { inner: Listener::bind(host, port, factory, registry)? })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.inner.listener.local_addr()?)
    }

    /// Compress replies larger than `threshold` bytes.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.inner.compression_threshold = threshold;
    }

    /// Accept and serve clients forever.
    pub fn serve(&self) -> Result<(), ServerError> {
        loop {
            self.inner.accept()?.serve();
        }
    }
}

/// Spawns one worker thread per accepted connection.
pub struct ThreadedServer {
    inner: Listener,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadedServer {
    /// Bind the listen socket.
    pub fn bind(
        host: &str,
        port: u16,
        factory: Arc<dyn ServiceFactory>,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, ServerError> {
        Ok(Self { inner: Listener::bind(host, port, factory, registry)?, workers: Vec::new() })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.inner.listener.local_addr()?)
    }

    /// Compress replies larger than `threshold` bytes.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.inner.compression_threshold = threshold;
    }

    /// Accept clients forever, one worker thread each.
    pub fn serve(&mut self) -> Result<(), ServerError> {
        loop {
            let mut processor = self.inner.accept()?;
            self.workers.retain(|worker| !worker.is_finished());
            let worker = thread::Builder::new()
                .name("agnos-worker".into())
                .spawn(move || processor.serve())?;
            self.workers.push(worker);
        }
    }
}

/// Library mode: bind an ephemeral local port, print the handshake to
/// standard output, serve exactly one client, then return.
pub struct LibraryModeServer {
    inner: Listener,
}

impl LibraryModeServer {
    /// Bind to an ephemeral port on the loopback interface.
    pub fn bind(
        factory: Arc<dyn ServiceFactory>,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, ServerError> {
        Self::bind_to("127.0.0.1", 0, factory, registry)
    }

    /// Bind to an explicit endpoint (port 0 lets the OS pick).
    pub fn bind_to(
        host: &str,
        port: u16,
        factory: Arc<dyn ServiceFactory>,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, ServerError> {
        Ok(Self { inner: Listener::bind(host, port, factory, registry)? })
    }

    /// Emit the `AGNOS\nhost\nport\n` handshake, then serve one session.
    ///
    /// The parent process reads the three lines from our standard output and
    /// connects to the printed endpoint.
    pub fn serve(&self) -> Result<(), ServerError> {
        let addr = self.inner.listener.local_addr()?;
        let mut stdout = std::io::stdout();
        write!(stdout, "AGNOS\n{}\n{}\n", addr.ip(), addr.port())?;
        stdout.flush()?;

        let processor = self.inner.accept();
        processor?.serve();
        tracing::info!("library-mode session ended");
        Ok(())
    }
}
