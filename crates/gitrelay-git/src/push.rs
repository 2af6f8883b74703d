//! Receive-pack command header parsing.
//!
//! A push request body starts with a pkt-line section of ref update
//! commands (`<old> <new> <ref>`, the first one carrying capabilities after a
//! NUL byte), terminated by a flush-pkt and followed by pack data. The parser
//! here only reads that section; the caller forwards the original bytes to
//! `git receive-pack` untouched.

use crate::pktline::{strip_flush, Packet, PktLine, PktLineTokenizer};
use serde::Serialize;

/// The all-zero object id used for ref creation and deletion.
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Side-band channel carrying progress messages.
const SIDEBAND_PROGRESS: u8 = 2;

/// A single ref update command from a push header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefUpdate {
    /// Object id the ref pointed to before the push.
    pub before: String,
    /// Object id the ref points to after the push.
    pub after: String,
    /// Full reference name, e.g. `refs/heads/main`.
    pub ref_name: String,
    /// Whether the ref is under `refs/tags/`.
    pub is_tag: bool,
    /// Whether the update deletes the ref.
    pub is_delete: bool,
}

impl RefUpdate {
    /// Whether the update creates a new ref.
    pub fn is_create(&self) -> bool {
        is_zero_sha(&self.before)
    }

    /// The short name of the ref (`main` for `refs/heads/main`).
    pub fn short_name(&self) -> &str {
        self.ref_name
            .splitn(3, '/')
            .nth(2)
            .unwrap_or(&self.ref_name)
    }
}

/// One ref update enriched with who pushed it, handed to push hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushEvent {
    /// Object id before the push.
    pub before: String,
    /// Object id after the push.
    pub after: String,
    /// Full reference name.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Whether the ref is a tag.
    pub is_tag: bool,
    /// Whether the ref was deleted.
    pub is_delete: bool,
    /// User that performed the push.
    pub pusher: String,
    /// Number of commits introduced by the update.
    pub total_commits_count: u64,
}

impl PushEvent {
    /// Builds the event for `update`.
    pub fn new(update: &RefUpdate, pusher: impl Into<String>, total_commits_count: u64) -> Self {
        Self {
            before: update.before.clone(),
            after: update.after.clone(),
            ref_name: update.ref_name.clone(),
            is_tag: update.is_tag,
            is_delete: update.is_delete,
            pusher: pusher.into(),
            total_commits_count,
        }
    }
}

/// Ref updates and capabilities decoded from a push header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushHeader {
    /// Ref updates in header order.
    pub updates: Vec<RefUpdate>,
    /// Capabilities announced on the first command line.
    pub capabilities: Vec<String>,
}

impl PushHeader {
    /// Whether the client negotiated a side-band channel.
    pub fn has_sideband(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == "side-band" || c == "side-band-64k")
    }

    /// The update when the push consists of exactly one branch creation.
    pub fn single_branch_creation(&self) -> Option<&RefUpdate> {
        match self.updates.as_slice() {
            [update] if !update.is_tag && !update.is_delete && update.is_create() => Some(update),
            _ => None,
        }
    }

    /// Progress message announcing a freshly created branch.
    ///
    /// Encoded on side-band channel 2 so git prints it as `remote: ...`.
    /// Returns `None` unless the push is a single branch creation over a
    /// side-band capable connection.
    pub fn branch_created_notice(&self) -> Option<Vec<u8>> {
        let update = self.single_branch_creation()?;
        if !self.has_sideband() {
            return None;
        }
        let message = format!("branch {} created\n", update.short_name());
        Some(PktLine::sideband(SIDEBAND_PROGRESS, message.as_bytes()).encode())
    }
}

/// Parses the command section of a receive-pack request body.
///
/// `header` is the raw section as read from the client, normally ending in a
/// flush-pkt. Malformed packets or lines are skipped or end parsing; they
/// never produce an error.
pub fn parse_push_header(header: &[u8]) -> PushHeader {
    let mut parsed = PushHeader::default();

    for packet in PktLineTokenizer::new(strip_flush(header)) {
        let payload = match packet {
            Ok(Packet::Data(payload)) => payload,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Stopped parsing push header");
                break;
            }
        };

        let (line, caps) = match payload.iter().position(|&b| b == 0) {
            Some(nul) => (&payload[..nul], Some(&payload[nul + 1..])),
            None => (payload, None),
        };
        if let Some(caps) = caps {
            if parsed.capabilities.is_empty() {
                parsed.capabilities = String::from_utf8_lossy(caps)
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
            }
        }

        if let Some(update) = parse_update_line(line) {
            parsed.updates.push(update);
        }
    }

    parsed
}

/// Parses `<old-sha> <new-sha> refs/(heads|tags)/<name>`.
fn parse_update_line(line: &[u8]) -> Option<RefUpdate> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.trim_end_matches('\n');

    let mut parts = line.splitn(3, ' ');
    let before = parts.next()?;
    let after = parts.next()?;
    let ref_name = parts.next()?;
    if !is_sha(before) || !is_sha(after) {
        return None;
    }

    let (namespace, name) = ref_name.strip_prefix("refs/").and_then(|r| r.split_once('/'))?;
    let is_tag = if namespace.eq_ignore_ascii_case("tags") {
        true
    } else if namespace.eq_ignore_ascii_case("heads") {
        false
    } else {
        return None;
    };
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }

    Some(RefUpdate {
        before: before.to_string(),
        after: after.to_string(),
        ref_name: ref_name.to_string(),
        is_tag,
        is_delete: is_zero_sha(after),
    })
}

fn is_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Whether `sha` is the all-zero object id.
pub fn is_zero_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}
