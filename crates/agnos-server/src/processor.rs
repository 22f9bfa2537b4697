//! The per-connection command loop.
//!
//! One iteration: open the read transaction, decode the command byte, open
//! the write transaction under the same sequence number, dispatch, emit the
//! reply. Errors raised between `begin_write` and `end` follow the reply
//! policy: the write buffer is reset (the transaction and its sequence are
//! kept) and an error reply takes the payload's place. Only a write-side
//! I/O fault abandons the transaction and with it the connection.

use std::backtrace::Backtrace;
use std::fmt;
use std::io;
use std::sync::Arc;

use agnos_core::{ReadTransaction, SocketTransport, TransportError, WriteTransaction};
use agnos_proto::command::{INFO_FUNCCODES, INFO_FUNCTIONS, INFO_GENERAL, INFO_META};
use agnos_proto::packers::{self, Packer};
use agnos_proto::{
    Command, GenericError, HeteroMap, PackedException, PackerError, PackerRegistry, ProtocolError,
    ReplyCode, Value,
};

use crate::objects::ObjectTable;

/// A dispatch that could not complete, mapped onto the three error replies.
#[derive(Debug)]
pub enum DispatchError {
    /// Protocol violation; emitted as reply code 1.
    Protocol(ProtocolError),
    /// User-defined exception; emitted as reply code 2.
    Packed(PackedException),
    /// Unmodeled handler failure; emitted as reply code 3.
    Generic(GenericError),
}

impl DispatchError {
    /// Wrap an arbitrary handler failure, rendering the current stack as
    /// the remote traceback.
    pub fn generic(err: &dyn fmt::Display) -> Self {
        Self::Generic(GenericError::new(
            err.to_string(),
            Backtrace::force_capture().to_string(),
        ))
    }
}

impl From<ProtocolError> for DispatchError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<PackedException> for DispatchError {
    fn from(err: PackedException) -> Self {
        Self::Packed(err)
    }
}

impl From<GenericError> for DispatchError {
    fn from(err: GenericError) -> Self {
        Self::Generic(err)
    }
}

impl From<PackerError> for DispatchError {
    // Decode invariants become protocol errors at the dispatch boundary.
    fn from(err: PackerError) -> Self {
        Self::Protocol(err.into())
    }
}

/// Everything a generated `invoke` needs to decode arguments, resolve
/// proxies and encode its reply.
pub struct CallContext<'t, 'a> {
    /// The request payload, positioned after funcid.
    pub args: &'a mut ReadTransaction<'t>,
    /// The reply buffer; write the success byte before the return value.
    pub reply: &'a mut WriteTransaction<'t>,
    /// The server's object table.
    pub objects: &'a ObjectTable,
    /// The service's packer registry.
    pub registry: &'a PackerRegistry,
}

impl CallContext<'_, '_> {
    /// Decode one argument.
    pub fn unpack(&mut self, packer: &Packer) -> Result<Value, DispatchError> {
        Ok(packer.unpack(self.args, self.registry)?)
    }

    /// Decode a proxy argument and resolve it in the object table.
    ///
    /// # Errors
    ///
    /// An id that does not resolve is the protocol error
    /// `invalid object reference`.
    pub fn unpack_proxy(&mut self) -> Result<crate::objects::HostObject, DispatchError> {
        let oid = packers::unpack_i64(self.args)?;
        self.objects
            .load(oid)
            .ok_or_else(|| ProtocolError::new(format!("invalid object reference: {oid}")).into())
    }

    /// Write the success byte; the packed return value follows.
    pub fn success(&mut self) -> Result<(), DispatchError> {
        Ok(packers::pack_i8(ReplyCode::Success.to_wire(), self.reply)?)
    }

    /// Encode the return value.
    pub fn pack(&mut self, packer: &Packer, value: &Value) -> Result<(), DispatchError> {
        Ok(packer.pack(value, self.reply)?)
    }

    /// Store a host object and encode the resulting proxy id.
    pub fn pack_proxy(&mut self, obj: crate::objects::HostObject) -> Result<(), DispatchError> {
        let oid = self.objects.store(obj);
        Ok(packers::pack_i64(oid, self.reply)?)
    }
}

/// The generated half of a server: function dispatch and service metadata.
///
/// Implementations read their arguments from the [`CallContext`], run the
/// handler, then write the success byte and the packed return value. Any
/// error returned is translated to the matching error reply by the
/// processor.
pub trait Service: Send {
    /// Dispatch function `funcid`.
    fn invoke(&mut self, funcid: i32, call: &mut CallContext<'_, '_>) -> Result<(), DispatchError>;

    /// Fill the `INFO_GENERAL` map: service name, version, IDL magic.
    fn general_info(&self, info: &mut HeteroMap);

    /// Fill the `INFO_FUNCTIONS` map: per-function descriptions.
    fn functions_info(&self, info: &mut HeteroMap);

    /// Fill the `INFO_FUNCCODES` map: function name to numeric code.
    fn function_codes(&self, info: &mut HeteroMap);
}

/// Runs the command loop for one connection.
pub struct Processor {
    transport: Arc<SocketTransport>,
    service: Box<dyn Service>,
    objects: Arc<ObjectTable>,
    registry: Arc<PackerRegistry>,
}

impl Processor {
    /// Build a processor around an accepted connection.
    pub fn new(
        transport: Arc<SocketTransport>,
        service: Box<dyn Service>,
        objects: Arc<ObjectTable>,
        registry: Arc<PackerRegistry>,
    ) -> Self {
        Self { transport, service, objects, registry }
    }

    /// Serve until the peer disconnects, then close the transport.
    pub fn serve(&mut self) {
        loop {
            match self.process() {
                Ok(()) => {}
                Err(err) if err.is_eof() => {
                    tracing::debug!(transport = %self.transport, "session ended");
                    break;
                }
                Err(err) => {
                    tracing::warn!(transport = %self.transport, error = %err, "session aborted");
                    break;
                }
            }
        }
        self.transport.close();
    }

    /// Run one request/reply transaction.
    pub fn process(&mut self) -> Result<(), TransportError> {
        let transport = Arc::clone(&self.transport);
        let mut rt = transport.begin_read()?;
        let seq = rt.seq();
        let raw_cmd = read_command_byte(&mut rt)?;

        let mut wt = transport.begin_write(seq)?;
        match self.dispatch(raw_cmd, &mut rt, &mut wt) {
            Ok(()) => {}
            Err(err) => {
                // Reset the buffer but keep the transaction: the error reply
                // goes out under the same sequence number.
                wt.restart();
                self.write_error_reply(&mut wt, err)?;
            }
        }
        wt.end()
        // `rt` drops here, discarding any unread request bytes.
    }

    fn dispatch<'a>(
        &mut self,
        raw_cmd: i8,
        rt: &mut ReadTransaction<'a>,
        wt: &mut WriteTransaction<'a>,
    ) -> Result<(), DispatchError> {
        let Some(cmd) = Command::from_wire(raw_cmd) else {
            return Err(ProtocolError::new(format!("unknown command code: {raw_cmd}")).into());
        };
        tracing::debug!(seq = rt.seq(), ?cmd, "dispatch");

        match cmd {
            Command::Invoke => {
                let funcid = packers::unpack_i32(rt)?;
                let mut call = CallContext {
                    args: rt,
                    reply: wt,
                    objects: &self.objects,
                    registry: &self.registry,
                };
                self.service.invoke(funcid, &mut call)
            }
            Command::Ping => {
                let payload = packers::unpack_str(rt)?;
                packers::pack_i8(ReplyCode::Success.to_wire(), wt)?;
                packers::pack_str(&payload, wt)?;
                Ok(())
            }
            // Fire-and-forget: nothing is buffered, so `end` emits nothing.
            Command::Quit => Ok(()),
            Command::Decref => {
                let oid = packers::unpack_i64(rt)?;
                self.objects.decref(oid);
                Ok(())
            }
            Command::Incref => {
                let oid = packers::unpack_i64(rt)?;
                self.objects.incref(oid);
                Ok(())
            }
            Command::GetInfo => {
                let code = packers::unpack_i32(rt)?;
                let info = self.collect_info(code);
                packers::pack_i8(ReplyCode::Success.to_wire(), wt)?;
                Packer::HeteroMap.pack(&Value::Hetero(info), wt)?;
                Ok(())
            }
        }
    }

    fn collect_info(&self, code: i32) -> HeteroMap {
        let mut info = HeteroMap::new();
        match code {
            INFO_GENERAL => self.service.general_info(&mut info),
            INFO_FUNCTIONS => self.service.functions_info(&mut info),
            INFO_FUNCCODES => self.service.function_codes(&mut info),
            // The meta map answers INFO_META and any code this server does
            // not recognize: the known codes plus capability flags.
            _ => {
                info.put_i32("INFO_META", INFO_META);
                info.put_i32("INFO_GENERAL", INFO_GENERAL);
                info.put_i32("INFO_FUNCTIONS", INFO_FUNCTIONS);
                info.put_i32("INFO_FUNCCODES", INFO_FUNCCODES);
                info.put_bool("COMPRESSION", true);
            }
        }
        info
    }

    fn write_error_reply(
        &self,
        wt: &mut WriteTransaction<'_>,
        err: DispatchError,
    ) -> Result<(), TransportError> {
        let result = match err {
            DispatchError::Protocol(err) => {
                tracing::warn!(transport = %self.transport, error = %err, "protocol error");
                write_protocol_error(wt, &err)
            }
            DispatchError::Packed(exc) => {
                tracing::debug!(class_id = exc.class_id, "handler raised a packed exception");
                match self.registry.resolve(exc.class_id) {
                    Some(packer) => write_packed_exception(wt, &packer, &exc),
                    None => {
                        // The stub never registered this class; all the peer
                        // can make sense of is a protocol error.
                        let err = ProtocolError::new(format!(
                            "unregistered exception class: {}",
                            exc.class_id
                        ));
                        write_protocol_error(wt, &err)
                    }
                }
            }
            DispatchError::Generic(exc) => {
                tracing::debug!(error = %exc.message, "handler raised");
                write_generic_exception(wt, &exc)
            }
        };
        result.map_err(|err| TransportError::Io(io::Error::other(err.to_string())))
    }
}

fn write_protocol_error(
    wt: &mut WriteTransaction<'_>,
    err: &ProtocolError,
) -> Result<(), PackerError> {
    packers::pack_i8(ReplyCode::ProtocolError.to_wire(), wt)?;
    packers::pack_str(&err.0, wt)
}

fn write_packed_exception(
    wt: &mut WriteTransaction<'_>,
    packer: &Packer,
    exc: &PackedException,
) -> Result<(), PackerError> {
    packers::pack_i8(ReplyCode::PackedException.to_wire(), wt)?;
    packers::pack_i32(exc.class_id, wt)?;
    packer.pack(&exc.value, wt)
}

fn write_generic_exception(
    wt: &mut WriteTransaction<'_>,
    exc: &GenericError,
) -> Result<(), PackerError> {
    packers::pack_i8(ReplyCode::GenericException.to_wire(), wt)?;
    packers::pack_str(&exc.message, wt)?;
    packers::pack_str(&exc.traceback, wt)
}

/// A packet too short to carry its command byte means the peer is gone or
/// broken; either way the session ends.
fn read_command_byte(rt: &mut ReadTransaction<'_>) -> Result<i8, TransportError> {
    match packers::unpack_i8(rt) {
        Ok(raw) => Ok(raw),
        Err(PackerError::Eof) => Err(TransportError::Eof),
        Err(PackerError::Io(err)) => Err(TransportError::Io(err)),
        Err(other) => Err(TransportError::Io(io::Error::other(other.to_string()))),
    }
}
