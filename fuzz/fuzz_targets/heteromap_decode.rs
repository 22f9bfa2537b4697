//! Fuzz target for the self-describing map decoder.
//!
//! HeteroMap payloads carry packer ids inline, so this is the decoder most
//! exposed to attacker-chosen type tags. Unknown ids and malformed entries
//! must abort with an error, never a crash.

#![no_main]

use std::io::Cursor;

use agnos_proto::packers::Packer;
use agnos_proto::PackerRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let registry = PackerRegistry::new();
    if let Ok(value) = Packer::HeteroMap.unpack(&mut Cursor::new(data), &registry) {
        // Whatever decoded must re-encode without panicking.
        let mut buf = Vec::new();
        let _ = Packer::HeteroMap.pack(&value, &mut buf);
    }
});
