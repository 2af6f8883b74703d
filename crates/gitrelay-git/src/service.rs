//! Smart HTTP service and phase identifiers.

use crate::pktline::PktLine;
use crate::{GitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A git smart HTTP service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    /// Fetch and clone.
    UploadPack,
    /// Push.
    ReceivePack,
}

impl Service {
    /// Parses `upload-pack`, `git-upload-pack`, `receive-pack` or `git-receive-pack`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.strip_prefix("git-").unwrap_or(s) {
            "upload-pack" => Ok(Service::UploadPack),
            "receive-pack" => Ok(Service::ReceivePack),
            _ => Err(GitError::UnsupportedService(s.to_string())),
        }
    }

    /// Short name without the `git-` prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    /// Content type of the ref advertisement response.
    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Content type of the RPC request body.
    pub fn request_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-request",
            Service::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    /// Content type of the RPC response.
    pub fn result_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    /// Packets preceding the advertisement, unless protocol v2 was requested.
    ///
    /// Protocol v2 clients expect the capability advertisement directly.
    pub fn advertisement_preamble(&self, git_protocol: Option<&str>) -> Option<Vec<u8>> {
        if git_protocol.is_some_and(|p| p.split(':').any(|kv| kv == "version=2")) {
            return None;
        }
        let mut out = PktLine::from_string(&format!("# service=git-{}\n", self.as_str())).encode();
        out.extend(PktLine::Flush.encode());
        Some(out)
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a smart HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// `GET info/refs` ref advertisement.
    Advertise,
    /// `POST git-<service>` pack exchange.
    Rpc,
}

impl Phase {
    /// Parses `advertise` or `rpc`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "advertise" => Some(Phase::Advertise),
            "rpc" => Some(Phase::Rpc),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Advertise => "advertise",
            Phase::Rpc => "rpc",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
