//! Client half of the sample service: typed wrappers and proxies.

use std::sync::Arc;

use agnos_client::{CallError, Client};
use agnos_core::{SocketTransport, TransportError};
use agnos_proto::packers::Packer;
use agnos_proto::{DateTime, ProtocolError, Value};
use bytes::Bytes;

use crate::{
    F_CREATE_PERSON, F_ECHO_BUFFER, F_PERSON_DOB, F_PERSON_MARRY, F_PERSON_NAME, F_PERSON_SPOUSE,
    F_SLEEP, F_THINK, ID_PERSON_PROXY, IDL_MAGIC, SERVICE_NAME, registry,
};

/// Typed client for the sample service, the shape a generator would emit.
pub struct FeatureTestClient {
    inner: Arc<Client>,
}

impl FeatureTestClient {
    /// Connect to a listening server.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        Ok(Self { inner: Arc::new(Client::connect(host, port, registry())?) })
    }

    /// Wrap an established transport.
    pub fn from_transport(transport: Arc<SocketTransport>) -> Result<Self, TransportError> {
        Ok(Self { inner: Arc::new(Client::new(transport, registry())?) })
    }

    /// The underlying correlator.
    pub fn client(&self) -> &Arc<Client> {
        &self.inner
    }

    /// Check that the peer is the service these stubs were written for.
    pub fn verify(&self) -> Result<(), CallError> {
        self.inner.verify_service(SERVICE_NAME, IDL_MAGIC)
    }

    /// Divide `a` by `b` remotely.
    pub fn think(&self, a: f64, b: f64) -> Result<f64, CallError> {
        let reply = self.inner.invoke(
            F_THINK,
            &[(Packer::Float, Value::Float(a)), (Packer::Float, Value::Float(b))],
            Some(Packer::Float),
        )?;
        expect_f64(reply)
    }

    /// Create a person on the server.
    pub fn create_person(&self, name: &str) -> Result<Arc<PersonProxy>, CallError> {
        let reply = self.inner.invoke(
            F_CREATE_PERSON,
            &[(Packer::Str, Value::Str(name.to_owned()))],
            Some(Packer::ObjRef(ID_PERSON_PROXY)),
        )?;
        person_from_value(&self.inner, &reply)
    }

    /// Echo a buffer through the server.
    pub fn echo_buffer(&self, payload: Bytes) -> Result<Bytes, CallError> {
        let reply = self.inner.invoke(
            F_ECHO_BUFFER,
            &[(Packer::Buffer, Value::Buffer(payload))],
            Some(Packer::Buffer),
        )?;
        match reply {
            Value::Buffer(echoed) => Ok(echoed),
            other => Err(unexpected("buffer", &other)),
        }
    }

    /// Ask the server to sleep `millis`, then echo `token`.
    pub fn sleep(&self, millis: i32, token: i32) -> Result<i32, CallError> {
        let reply = self.inner.invoke(
            F_SLEEP,
            &[(Packer::Int32, Value::Int32(millis)), (Packer::Int32, Value::Int32(token))],
            Some(Packer::Int32),
        )?;
        reply.as_i32().ok_or_else(|| unexpected("int32", &reply))
    }
}

/// Client-side handle to a server-resident person.
///
/// Instances are cached per connection so repeated unpacks of the same id
/// share one proxy; dropping the last handle sends the final DECREF.
pub struct PersonProxy {
    client: Arc<Client>,
    oid: i64,
}

impl std::fmt::Debug for PersonProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonProxy").field("oid", &self.oid).finish()
    }
}

impl PersonProxy {
    /// The raw object id.
    pub fn oid(&self) -> i64 {
        self.oid
    }

    /// The person's name.
    pub fn name(&self) -> Result<String, CallError> {
        let reply = self.client.invoke(F_PERSON_NAME, &[self.as_arg()], Some(Packer::Str))?;
        match reply {
            Value::Str(name) => Ok(name),
            other => Err(unexpected("string", &other)),
        }
    }

    /// The person's date of birth.
    pub fn date_of_birth(&self) -> Result<DateTime, CallError> {
        let reply = self.client.invoke(F_PERSON_DOB, &[self.as_arg()], Some(Packer::Date))?;
        match reply {
            Value::Date(dob) => Ok(dob),
            other => Err(unexpected("datetime", &other)),
        }
    }

    /// Marry this person to `partner`.
    pub fn marry(&self, partner: &PersonProxy) -> Result<(), CallError> {
        self.client.invoke(F_PERSON_MARRY, &[self.as_arg(), partner.as_arg()], None)?;
        Ok(())
    }

    /// This person's spouse.
    pub fn spouse(&self) -> Result<Arc<PersonProxy>, CallError> {
        let reply = self.client.invoke(
            F_PERSON_SPOUSE,
            &[self.as_arg()],
            Some(Packer::ObjRef(ID_PERSON_PROXY)),
        )?;
        person_from_value(&self.client, &reply)
    }

    fn as_arg(&self) -> (Packer, Value) {
        (Packer::ObjRef(ID_PERSON_PROXY), Value::ObjRef(self.oid))
    }
}

impl Drop for PersonProxy {
    fn drop(&mut self) {
        // The server-side cell drops one count; errors here mean the
        // connection is already gone.
        let _ = self.client.decref(self.oid);
    }
}

/// Resolve a decoded object reference to the cached proxy, or mint one.
fn person_from_value(client: &Arc<Client>, value: &Value) -> Result<Arc<PersonProxy>, CallError> {
    let Some(oid) = value.as_objref() else {
        return Err(unexpected("object reference", value));
    };
    if let Some(proxy) = client.proxies().get::<PersonProxy>(oid) {
        return Ok(proxy);
    }
    let proxy = Arc::new(PersonProxy { client: Arc::clone(client), oid });
    client.proxies().insert(oid, &proxy);
    Ok(proxy)
}

fn unexpected(wanted: &str, got: &Value) -> CallError {
    ProtocolError::new(format!("expected a {wanted}, got a {}", got.kind())).into()
}

fn expect_f64(value: Value) -> Result<f64, CallError> {
    value.as_f64().ok_or_else(|| unexpected("float", &value))
}
