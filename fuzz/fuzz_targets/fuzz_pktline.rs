//! Fuzz target for pkt-line tokenizing.
//!
//! Tests that the tokenizer handles arbitrary input without panicking and
//! never reads past the buffer.

#![no_main]

use gitrelay_git::{strip_flush, Packet, PktLineTokenizer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut tokenizer = PktLineTokenizer::new(data);
    let mut seen = 0;
    for packet in tokenizer.by_ref() {
        match packet {
            Ok(Packet::Data(payload)) => assert!(payload.len() <= data.len()),
            Ok(_) => {}
            Err(_) => break,
        }
        seen += 1;
        if seen > 10_000 {
            break;
        }
    }
    assert!(tokenizer.position() <= data.len());

    let stripped = strip_flush(data);
    assert!(data.starts_with(stripped));
});
