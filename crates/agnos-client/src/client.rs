//! The reply correlator.
//!
//! Callers allocate a sequence number, write their command inside a write
//! transaction, install a reply slot, and block until the slot reaches a
//! terminal state. A dedicated pump thread owns the read side: it decodes
//! each incoming packet with the packer the slot declared and wakes the
//! waiting caller. The pump also absorbs replies whose callers have lost
//! interest (see [`Client::discard_reply`]) and fails every pending slot
//! when the connection dies, so no caller is left blocked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use agnos_core::{ReadTransaction, SocketTransport, TransportError};
use agnos_proto::command::{INFO_GENERAL, KEY_IDL_MAGIC, KEY_SERVICE_NAME};
use agnos_proto::packers::{self, Packer};
use agnos_proto::{
    Command, GenericError, HeteroMap, PackedException, PackerRegistry, ProtocolError, ReplyCode,
    Value,
};

use crate::error::CallError;
use crate::proxy::ProxyCache;

/// Terminal states a reply slot can reach.
enum ReplyOutcome {
    Value(Value),
    Protocol(ProtocolError),
    Packed(PackedException),
    Generic(GenericError),
    Failed(String),
}

/// One outstanding call.
enum Slot {
    /// Waiting for the reply; `packer` decodes a success payload (`None`
    /// for void returns).
    Pending { packer: Option<Packer> },
    /// The caller gave up; the pump decodes and drops the eventual reply.
    Discarded { packer: Option<Packer> },
    /// The reply arrived (or the connection failed) and nobody has
    /// consumed it yet.
    Ready(ReplyOutcome),
}

struct SlotTable {
    slots: HashMap<i32, Slot>,
    /// Set once when the pump exits; every later wait observes it.
    dead: Option<String>,
}

struct Shared {
    slots: Mutex<SlotTable>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connected Agnos client.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`. Sequence
/// numbers start at 1 and increase atomically, so two calls issued by one
/// client always observe distinct sequence numbers.
pub struct Client {
    transport: Arc<SocketTransport>,
    registry: Arc<PackerRegistry>,
    shared: Arc<Shared>,
    proxies: ProxyCache,
    seq: AtomicI32,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Wrap an established transport and start the pump thread.
    pub fn new(
        transport: Arc<SocketTransport>,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, TransportError> {
        let shared = Arc::new(Shared {
            slots: Mutex::new(SlotTable { slots: HashMap::new(), dead: None }),
            ready: Condvar::new(),
        });

        let pump = thread::Builder::new().name("agnos-pump".into()).spawn({
            let transport = Arc::clone(&transport);
            let registry = Arc::clone(&registry);
            let shared = Arc::clone(&shared);
            move || pump_loop(&transport, &registry, &shared)
        })?;

        Ok(Self {
            transport,
            registry,
            shared,
            proxies: ProxyCache::new(),
            seq: AtomicI32::new(0),
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Connect to a listening server.
    pub fn connect(
        host: &str,
        port: u16,
        registry: Arc<PackerRegistry>,
    ) -> Result<Self, TransportError> {
        let transport = Arc::new(SocketTransport::connect(host, port)?);
        Self::new(transport, registry)
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<SocketTransport> {
        &self.transport
    }

    /// The registry used to decode replies.
    pub fn registry(&self) -> &Arc<PackerRegistry> {
        &self.registry
    }

    /// The per-connection proxy cache.
    pub fn proxies(&self) -> &ProxyCache {
        &self.proxies
    }

    /// Number of outstanding reply slots.
    pub fn pending_replies(&self) -> usize {
        self.shared.lock().slots.len()
    }

    fn next_seq(&self) -> i32 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Open an INVOKE call: allocates the sequence number, writes the
    /// command byte and function id, and installs the reply slot.
    ///
    /// Pack the arguments with [`Call::arg`], then [`Call::send`]. Dropping
    /// the [`Call`] unsent cancels the write and removes the slot.
    pub fn begin_call(&self, funcid: i32, ret: Option<Packer>) -> Result<Call<'_>, CallError> {
        let seq = self.next_seq();
        let mut tx = self.transport.begin_write(seq)?;
        packers::pack_i8(Command::Invoke.to_wire(), &mut tx)?;
        packers::pack_i32(funcid, &mut tx)?;

        self.shared.lock().slots.insert(seq, Slot::Pending { packer: ret });
        tracing::debug!(seq, funcid, "call opened");
        Ok(Call { client: self, seq, tx: Some(tx) })
    }

    /// Issue a complete call and wait for its reply.
    pub fn invoke(
        &self,
        funcid: i32,
        args: &[(Packer, Value)],
        ret: Option<Packer>,
    ) -> Result<Value, CallError> {
        let mut call = self.begin_call(funcid, ret)?;
        for (packer, value) in args {
            call.arg(packer, value)?;
        }
        let seq = call.send()?;
        self.get_reply(seq, None)
    }

    /// Block until the reply for `seq` is terminal, then deliver it.
    ///
    /// On timeout the slot is marked discarded (the pump will absorb the
    /// late reply) and the caller observes [`CallError::Timeout`]. Error
    /// replies surface as the matching [`CallError`] variant.
    pub fn get_reply(&self, seq: i32, timeout: Option<Duration>) -> Result<Value, CallError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut table = self.shared.lock();
        loop {
            if matches!(table.slots.get(&seq), Some(Slot::Ready(_))) {
                let Some(Slot::Ready(outcome)) = table.slots.remove(&seq) else {
                    continue;
                };
                drop(table);
                return match outcome {
                    ReplyOutcome::Value(value) => Ok(value),
                    ReplyOutcome::Protocol(err) => Err(err.into()),
                    ReplyOutcome::Packed(exc) => Err(exc.into()),
                    ReplyOutcome::Generic(exc) => Err(exc.into()),
                    ReplyOutcome::Failed(reason) => Err(CallError::ConnectionLost(reason)),
                };
            }

            if !table.slots.contains_key(&seq) {
                return Err(
                    ProtocolError::new(format!("no outstanding call with sequence {seq}")).into()
                );
            }

            if let Some(reason) = table.dead.clone() {
                table.slots.remove(&seq);
                return Err(CallError::ConnectionLost(reason));
            }

            table = match deadline {
                None => self.shared.ready.wait(table).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        if let Some(slot) = table.slots.get_mut(&seq)
                            && let Slot::Pending { packer } = slot
                        {
                            let packer = packer.take();
                            *slot = Slot::Discarded { packer };
                        }
                        return Err(CallError::Timeout { seq });
                    }
                    self.shared
                        .ready
                        .wait_timeout(table, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Whether the reply for `seq` has reached a terminal state.
    pub fn is_reply_ready(&self, seq: i32) -> bool {
        matches!(self.shared.lock().slots.get(&seq), Some(Slot::Ready(_)))
    }

    /// Abandon interest in a reply. An already-arrived reply is removed
    /// immediately; otherwise the slot is marked discarded and the pump
    /// silently consumes the eventual reply.
    pub fn discard_reply(&self, seq: i32) {
        let mut table = self.shared.lock();
        match table.slots.get_mut(&seq) {
            Some(Slot::Ready(_)) => {
                table.slots.remove(&seq);
            }
            Some(slot) => {
                if let Slot::Pending { packer } = slot {
                    let packer = packer.take();
                    *slot = Slot::Discarded { packer };
                }
            }
            None => {}
        }
    }

    /// Round-trip a payload through CMD_PING.
    ///
    /// # Errors
    ///
    /// A reply that does not match the payload is a protocol error.
    pub fn ping(&self, payload: &str, timeout: Option<Duration>) -> Result<(), CallError> {
        let seq = self.next_seq();
        let mut tx = self.transport.begin_write(seq)?;
        packers::pack_i8(Command::Ping.to_wire(), &mut tx)?;
        packers::pack_str(payload, &mut tx)?;
        self.shared.lock().slots.insert(seq, Slot::Pending { packer: Some(Packer::Str) });
        if let Err(err) = tx.end() {
            self.remove_slot(seq);
            return Err(err.into());
        }

        let reply = self.get_reply(seq, timeout)?;
        if reply.as_str() == Some(payload) {
            Ok(())
        } else {
            Err(ProtocolError::new("ping reply does not match payload").into())
        }
    }

    /// Fetch one of the service's GETINFO maps.
    pub fn get_service_info(&self, code: i32) -> Result<HeteroMap, CallError> {
        let seq = self.next_seq();
        let mut tx = self.transport.begin_write(seq)?;
        packers::pack_i8(Command::GetInfo.to_wire(), &mut tx)?;
        packers::pack_i32(code, &mut tx)?;
        self.shared.lock().slots.insert(seq, Slot::Pending { packer: Some(Packer::HeteroMap) });
        if let Err(err) = tx.end() {
            self.remove_slot(seq);
            return Err(err.into());
        }

        match self.get_reply(seq, None)? {
            Value::Hetero(map) => Ok(map),
            other => Err(ProtocolError::new(format!(
                "GETINFO returned a {} instead of a heteromap",
                other.kind()
            ))
            .into()),
        }
    }

    /// Check the server's identity against this stub's expectations.
    pub fn verify_service(&self, name: &str, idl_magic: &str) -> Result<(), CallError> {
        let info = self.get_service_info(INFO_GENERAL)?;
        let found = info.get_str(KEY_SERVICE_NAME).unwrap_or_default();
        if found != name {
            return Err(CallError::WrongService {
                expected: name.to_owned(),
                found: found.to_owned(),
            });
        }
        let found = info.get_str(KEY_IDL_MAGIC).unwrap_or_default();
        if found != idl_magic {
            return Err(CallError::WrongMagic {
                expected: idl_magic.to_owned(),
                found: found.to_owned(),
            });
        }
        Ok(())
    }

    /// Tell the server this client holds one more reference to `oid`.
    /// Stubs call this before transmitting a proxy they copied.
    pub fn incref(&self, oid: i64) -> Result<(), CallError> {
        self.send_ref_command(Command::Incref, oid)
    }

    /// Tell the server to drop one reference to `oid`. Fire-and-forget:
    /// neither command produces a reply.
    pub fn decref(&self, oid: i64) -> Result<(), CallError> {
        self.send_ref_command(Command::Decref, oid)
    }

    fn send_ref_command(&self, cmd: Command, oid: i64) -> Result<(), CallError> {
        let mut tx = self.transport.begin_write(self.next_seq())?;
        packers::pack_i8(cmd.to_wire(), &mut tx)?;
        packers::pack_i64(oid, &mut tx)?;
        tx.end()?;
        Ok(())
    }

    fn remove_slot(&self, seq: i32) {
        self.shared.lock().slots.remove(&seq);
    }

    /// Close the connection and stop the pump. Pending callers observe
    /// [`CallError::ConnectionLost`].
    pub fn close(&self) {
        self.transport.close();
        let handle = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// An INVOKE call being assembled.
pub struct Call<'a> {
    client: &'a Client,
    seq: i32,
    tx: Option<agnos_core::WriteTransaction<'a>>,
}

impl Call<'_> {
    /// The sequence number this call was issued under.
    pub fn seq(&self) -> i32 {
        self.seq
    }

    /// Pack one argument.
    pub fn arg(&mut self, packer: &Packer, value: &Value) -> Result<(), CallError> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(ProtocolError::new("call was already sent").into());
        };
        Ok(packer.pack(value, tx)?)
    }

    /// Flush the request; the reply slot stays installed for
    /// [`Client::get_reply`].
    pub fn send(mut self) -> Result<i32, CallError> {
        let Some(tx) = self.tx.take() else {
            return Err(ProtocolError::new("call was already sent").into());
        };
        match tx.end() {
            Ok(()) => Ok(self.seq),
            Err(err) => {
                self.client.remove_slot(self.seq);
                Err(err.into())
            }
        }
    }
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Dropping the transaction cancels the buffered write.
            drop(tx);
            self.client.remove_slot(self.seq);
        }
    }
}

/// The dedicated reader: routes every incoming packet to its slot until the
/// transport fails, then fails all pending slots so no caller hangs.
fn pump_loop(transport: &SocketTransport, registry: &PackerRegistry, shared: &Shared) {
    loop {
        let mut rt = match transport.begin_read() {
            Ok(rt) => rt,
            Err(err) => {
                let reason = if err.is_eof() {
                    "peer closed the connection".to_owned()
                } else {
                    err.to_string()
                };
                tracing::debug!(%reason, "pump exiting");
                fail_all(shared, &reason);
                return;
            }
        };

        let seq = rt.seq();
        if let Err(err) = pump_one(&mut rt, registry, shared, seq) {
            tracing::warn!(seq, error = %err, "failed to route reply");
            let mut table = shared.lock();
            match table.slots.get(&seq) {
                Some(Slot::Discarded { .. }) => {
                    table.slots.remove(&seq);
                }
                Some(Slot::Pending { .. }) => {
                    table.slots.insert(seq, Slot::Ready(ReplyOutcome::Failed(err.to_string())));
                    shared.ready.notify_all();
                }
                Some(Slot::Ready(_)) | None => {}
            }
        }
        // `rt` drops here, discarding whatever the decode did not consume.
    }
}

/// Decode one reply packet and transition its slot.
fn pump_one(
    rt: &mut ReadTransaction<'_>,
    registry: &PackerRegistry,
    shared: &Shared,
    seq: i32,
) -> Result<(), CallError> {
    let raw = packers::unpack_i8(rt)?;

    // Snapshot the slot's packer without holding the lock across the
    // payload decode.
    let (discarded, packer) = match shared.lock().slots.get(&seq) {
        Some(Slot::Pending { packer }) => (false, packer.clone()),
        Some(Slot::Discarded { packer }) => (true, packer.clone()),
        Some(Slot::Ready(_)) => {
            return Err(ProtocolError::new(format!("duplicate reply for sequence {seq}")).into());
        }
        None => {
            return Err(ProtocolError::new(format!("invalid reply sequence: {seq}")).into());
        }
    };

    let outcome = match ReplyCode::from_wire(raw) {
        Some(ReplyCode::Success) => ReplyOutcome::Value(match packer {
            Some(packer) => packer.unpack(rt, registry)?,
            None => Value::Null,
        }),
        Some(ReplyCode::ProtocolError) => {
            ReplyOutcome::Protocol(ProtocolError(packers::unpack_str(rt)?))
        }
        Some(ReplyCode::PackedException) => {
            let class_id = packers::unpack_i32(rt)?;
            let packer = registry.resolve(class_id).ok_or_else(|| {
                ProtocolError::new(format!("unknown exception class id: {class_id}"))
            })?;
            ReplyOutcome::Packed(PackedException::new(class_id, packer.unpack(rt, registry)?))
        }
        Some(ReplyCode::GenericException) => {
            let message = packers::unpack_str(rt)?;
            let traceback = packers::unpack_str(rt)?;
            ReplyOutcome::Generic(GenericError { message, traceback })
        }
        None => {
            return Err(ProtocolError::new(format!("unknown reply code: {raw}")).into());
        }
    };

    let mut table = shared.lock();
    if discarded || matches!(table.slots.get(&seq), Some(Slot::Discarded { .. })) {
        tracing::debug!(seq, "absorbed discarded reply");
        table.slots.remove(&seq);
    } else {
        table.slots.insert(seq, Slot::Ready(outcome));
        shared.ready.notify_all();
    }
    Ok(())
}

/// Mark the connection dead and wake every waiting caller.
fn fail_all(shared: &Shared, reason: &str) {
    let mut table = shared.lock();
    table.dead = Some(reason.to_owned());
    shared.ready.notify_all();
}
