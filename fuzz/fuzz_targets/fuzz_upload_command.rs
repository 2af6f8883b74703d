//! Fuzz target for upload-pack v2 command decoding.

#![no_main]

use gitrelay_git::{command_section_complete, parse_upload_pack_command, split_params};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parsed = parse_upload_pack_command(data);
    for (key, value) in split_params(&parsed.params) {
        assert!(key.len() + value.len() < parsed.params.len());
    }
    let _ = command_section_complete(data);
});
