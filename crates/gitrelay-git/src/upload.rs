//! Upload-pack request decoding for observability.
//!
//! Extracts the protocol v2 command and its shallow/filter arguments from the
//! leading bytes of an upload-pack request. Used only to label telemetry;
//! serving never depends on it.

use crate::pktline::{Packet, PktLineTokenizer};
use std::collections::BTreeMap;

/// Command and parameters decoded from an upload-pack request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPackCommand {
    /// Value of the `command=` line, empty when absent.
    pub command: String,
    /// Key-sorted, space-joined `key=value` pairs, empty when none.
    pub params: String,
}

/// Request line prefixes that are recorded, with the key they are stored under.
const RECOGNIZED: [(&str, &str); 5] = [
    ("command=", "command"),
    ("deepen-since ", "deepen-since"),
    ("deepen-not ", "deepen-not"),
    ("deepen ", "deepen"),
    ("filter ", "filter"),
];

/// Decodes the command of an upload-pack request prefix.
///
/// Flush and delimiter packets are skipped. Decoding stops without error at
/// the end of the buffer or at the first malformed length, keeping whatever
/// was decoded before it.
pub fn parse_upload_pack_command(buf: &[u8]) -> UploadPackCommand {
    let mut command = String::new();
    let mut params: BTreeMap<&'static str, String> = BTreeMap::new();

    for packet in PktLineTokenizer::new(buf) {
        let payload = match packet {
            Ok(Packet::Data(payload)) => payload,
            Ok(_) => continue,
            Err(_) => break,
        };
        let line = payload_line(payload);

        for (prefix, key) in RECOGNIZED {
            if let Some(value) = line.strip_prefix(prefix) {
                if key == "command" {
                    command = value.to_string();
                } else {
                    params.insert(key, value.to_string());
                }
                break;
            }
        }
    }

    let params = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    UploadPackCommand { command, params }
}

/// Whether `buf` already holds a full request section (up to a flush-pkt).
pub fn command_section_complete(buf: &[u8]) -> bool {
    PktLineTokenizer::new(buf).any(|p| matches!(p, Ok(Packet::Flush)))
}

/// Payload text with any NUL-separated capability suffix and trailing newline removed.
fn payload_line(payload: &[u8]) -> std::borrow::Cow<'_, str> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    let mut line = &payload[..end];
    while let Some(stripped) = line.strip_suffix(b"\n") {
        line = stripped;
    }
    String::from_utf8_lossy(line)
}

/// Splits a params string back into key/value pairs.
pub fn split_params(params: &str) -> impl Iterator<Item = (&str, &str)> {
    params
        .split(' ')
        .filter_map(|pair| pair.split_once('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::PktLine;
    use proptest::prelude::*;

    fn request(lines: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            buf.extend(PktLine::from_string(line).encode());
            if i == 1 {
                buf.extend_from_slice(b"0001");
            }
        }
        buf.extend_from_slice(b"0000");
        buf
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_upload_pack_command(b""), UploadPackCommand::default());
        let parsed = parse_upload_pack_command(&[]);
        assert_eq!(parsed.command, "");
        assert_eq!(parsed.params, "");
    }

    #[test]
    fn test_fetch_with_depth_and_filter() {
        let buf = request(&[
            "command=fetch\n",
            "agent=git/2.43.0\n",
            "thin-pack\n",
            "filter blob:none\n",
            "deepen 1\n",
            "want 1111111111111111111111111111111111111111\n",
            "done\n",
        ]);
        let parsed = parse_upload_pack_command(&buf);
        assert_eq!(parsed.command, "fetch");
        assert_eq!(parsed.params, "deepen=1 filter=blob:none");
    }

    #[test]
    fn test_ls_refs_without_params() {
        let buf = request(&["command=ls-refs\n", "object-format=sha1\n", "peel\n"]);
        let parsed = parse_upload_pack_command(&buf);
        assert_eq!(parsed.command, "ls-refs");
        assert_eq!(parsed.params, "");
    }

    #[test]
    fn test_deepen_variants() {
        let buf = request(&[
            "command=fetch\n",
            "agent=git/2.43.0\n",
            "deepen-since 1700000000\n",
            "deepen-not refs/heads/old\n",
        ]);
        let parsed = parse_upload_pack_command(&buf);
        assert_eq!(
            parsed.params,
            "deepen-not=refs/heads/old deepen-since=1700000000"
        );
    }

    #[test]
    fn test_capability_suffix_stripped() {
        let mut buf = PktLine::Data(b"command=fetch\0ignored caps\n".to_vec()).encode();
        buf.extend_from_slice(b"0000");
        assert_eq!(parse_upload_pack_command(&buf).command, "fetch");
    }

    #[test]
    fn test_stops_at_malformed_length() {
        let mut buf = PktLine::from_string("command=fetch\n").encode();
        buf.extend_from_slice(b"xyz!");
        buf.extend(PktLine::from_string("deepen 5\n").encode());
        let parsed = parse_upload_pack_command(&buf);
        assert_eq!(parsed.command, "fetch");
        assert_eq!(parsed.params, "");
    }

    #[test]
    fn test_truncated_capture() {
        let full = request(&["command=fetch\n", "agent=git\n", "deepen 2\n"]);
        let parsed = parse_upload_pack_command(&full[..full.len() - 8]);
        assert_eq!(parsed.command, "fetch");
    }

    #[test]
    fn test_command_section_complete() {
        let full = request(&["command=fetch\n", "agent=git\n"]);
        assert!(command_section_complete(&full));
        assert!(!command_section_complete(&full[..full.len() - 4]));
        assert!(!command_section_complete(b""));
    }

    #[test]
    fn test_split_params() {
        let pairs: Vec<_> = split_params("deepen=1 filter=blob:none").collect();
        assert_eq!(pairs, vec![("deepen", "1"), ("filter", "blob:none")]);
        assert_eq!(split_params("").count(), 0);
    }

    proptest! {
        #[test]
        fn prop_params_sorted_and_deterministic(
            deepen in proptest::option::of("[0-9]{1,3}"),
            filter in proptest::option::of("blob:none|tree:0"),
            since in proptest::option::of("[0-9]{10}"),
        ) {
            let mut lines = vec!["command=fetch\n".to_string(), "agent=git\n".to_string()];
            if let Some(f) = &filter { lines.push(format!("filter {}\n", f)); }
            if let Some(s) = &since { lines.push(format!("deepen-since {}\n", s)); }
            if let Some(d) = &deepen { lines.push(format!("deepen {}\n", d)); }
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let buf = request(&refs);

            let first = parse_upload_pack_command(&buf);
            let second = parse_upload_pack_command(&buf);
            prop_assert_eq!(&first, &second);

            let keys: Vec<&str> = split_params(&first.params).map(|(k, _)| k).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }

        #[test]
        fn prop_never_panics(buf in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse_upload_pack_command(&buf);
        }
    }
}
