//! Fuzz target for the packer decoders.
//!
//! Feeds arbitrary bytes to every well-known packer. Decoding hostile input
//! must only ever return an error: no panics, no runaway allocations sized
//! from a length prefix.

#![no_main]

use std::io::Cursor;

use agnos_proto::registry::well_known;
use agnos_proto::PackerRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let registry = PackerRegistry::new();
    let ids = (1..=10).chain(800..=808).chain(820..=828).chain(850..=853);
    for id in ids {
        if let Some(packer) = well_known(id) {
            let _ = packer.unpack(&mut Cursor::new(data), &registry);
        }
    }
});
