//! Git smart HTTP plumbing for gitrelay.
//!
//! This crate holds everything that touches the git wire protocol or the git
//! binary: pkt-line tokenizing, push header and upload-pack command decoding,
//! byte counting and bounded capture of request bodies, and the subprocess
//! executor that streams a request through `git <service> --stateless-rpc`.

mod capture;
mod counting;
mod error;
mod executor;
mod pktline;
mod push;
mod reaper;
mod service;
mod upload;

pub use capture::{CaptureReader, LimitedCapture, DEFAULT_CAPTURE_BYTES};
pub use counting::{ByteCounter, CountingReader, CountingWriter};
pub use error::GitError;
pub use executor::{GitProcess, GitProcessExecutor, InputSource};
pub use pktline::{
    parse_length, read_pkt_section, strip_flush, Packet, PktLine, PktLineTokenizer, PktSection,
    FLUSH_PKT, MAX_PKT_LEN,
};
pub use push::{is_zero_sha, parse_push_header, PushEvent, PushHeader, RefUpdate, ZERO_SHA};
#[cfg(unix)]
pub use reaper::{reap_all, spawn_reaper};
pub use reaper::{is_init_process, ProcessTracker};
pub use service::{Phase, Service};
pub use upload::{command_section_complete, parse_upload_pack_command, split_params, UploadPackCommand};

/// Result type for git relay operations.
pub type Result<T> = std::result::Result<T, GitError>;
