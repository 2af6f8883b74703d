//! Fuzz target for receive-pack command header parsing.

#![no_main]

use gitrelay_git::parse_push_header;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let header = parse_push_header(data);
    for update in &header.updates {
        assert_eq!(update.before.len(), 40);
        assert_eq!(update.after.len(), 40);
        assert!(update.ref_name.starts_with("refs/"));
        assert_eq!(update.is_delete, gitrelay_git::is_zero_sha(&update.after));
    }
    let _ = header.branch_created_notice();
});
