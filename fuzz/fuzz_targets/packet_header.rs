//! Fuzz target for packet header parsing.

#![no_main]

use agnos_proto::PacketHeader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() >= PacketHeader::SIZE {
        let mut raw = [0u8; PacketHeader::SIZE];
        raw.copy_from_slice(&data[..PacketHeader::SIZE]);
        let _ = PacketHeader::parse(raw);
    }
});
