//! A hand-written sample service.
//!
//! Everything the IDL compiler would normally generate for a small service,
//! function ids, a packer registry, the server-side dispatcher and the
//! client-side proxies, written by hand. The end-to-end tests drive the
//! runtime through this crate exactly the way generated stubs would.
//!
//! The service models a minimal "feature test" surface: arithmetic that can
//! fail, persons that can marry (and refuse to, with a schema exception),
//! a buffer echo for compression tests and a sleep call for reply-ordering
//! tests.

pub mod service;
pub mod stub;

use std::sync::Arc;

use agnos_proto::packers::Packer;
use agnos_proto::{PackerRegistry, RecordType};

pub use service::{FeatureTestService, Person, factory};
pub use stub::{FeatureTestClient, PersonProxy};

/// Service name reported under `INFO_GENERAL`.
pub const SERVICE_NAME: &str = "FeatureTest";
/// Service version reported under `INFO_GENERAL`.
pub const SERVICE_VERSION: &str = "1.0";
/// Digest of the IDL both stubs were "generated" from.
pub const IDL_MAGIC: &str = "agnos-featuretest-8c4a";

/// Divide two floats; raises a generic exception on a zero divisor.
pub const F_THINK: i32 = 1;
/// Create a person and return a proxy to it.
pub const F_CREATE_PERSON: i32 = 2;
/// Person accessor: name.
pub const F_PERSON_NAME: i32 = 3;
/// Marry two persons; raises `MartialStatusError` when either refuses.
pub const F_PERSON_MARRY: i32 = 4;
/// Person accessor: spouse proxy.
pub const F_PERSON_SPOUSE: i32 = 5;
/// Echo a byte buffer unchanged.
pub const F_ECHO_BUFFER: i32 = 6;
/// Sleep for the given milliseconds, then echo the token.
pub const F_SLEEP: i32 = 7;
/// Person accessor: date of birth.
pub const F_PERSON_DOB: i32 = 8;

/// Wire id of the person proxy packer.
pub const ID_PERSON_PROXY: i32 = 1100;
/// Class id of the marital-status exception.
pub const CLS_MARTIAL_STATUS: i32 = 1500;

/// The registry this service's stubs share: the well-known table plus the
/// person proxy and the one throwable record.
pub fn registry() -> Arc<PackerRegistry> {
    let mut registry = PackerRegistry::new();
    #[allow(clippy::expect_used)]
    {
        registry
            .register(Packer::ObjRef(ID_PERSON_PROXY))
            .expect("person proxy packer has a fixed id");
        registry
            .register(Packer::Record(martial_status_error()))
            .expect("exception record has a fixed id");
    }
    Arc::new(registry)
}

/// Shape of the `MartialStatusError` packed exception: a single message
/// field.
pub fn martial_status_error() -> Arc<RecordType> {
    RecordType::throwable(CLS_MARTIAL_STATUS, "MartialStatusError", vec![Packer::Str])
}
