//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length, or "0000" for flush.

use crate::{GitError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// The flush-pkt marker terminating a pkt-line section.
pub const FLUSH_PKT: &[u8; 4] = b"0000";

/// Largest length a pkt-line header may announce.
pub const MAX_PKT_LEN: usize = 65520;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a side-band packet: the channel byte followed by the payload.
    pub fn sideband(channel: u8, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(payload.len() + 1);
        data.push(channel);
        data.extend_from_slice(payload);
        Self::Data(data)
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data(data) => {
                let len = data.len() + 4; // 4 bytes for the length prefix
                let mut result = format!("{:04x}", len).into_bytes();
                result.extend_from_slice(data);
                result
            }
            Self::Flush => FLUSH_PKT.to_vec(),
            Self::Delimiter => b"0001".to_vec(),
            Self::ResponseEnd => b"0002".to_vec(),
        }
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }
}

/// A packet borrowed from an input buffer by [`PktLineTokenizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Payload of a data line, length prefix removed.
    Data(&'a [u8]),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

/// Parses a 4-byte hex length prefix.
pub fn parse_length(prefix: &[u8]) -> Result<usize> {
    if prefix.len() != 4 || !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(GitError::InvalidPktLine("invalid length prefix".to_string()));
    }
    // All four bytes are ASCII hex digits, so this cannot fail.
    let text = std::str::from_utf8(prefix)
        .map_err(|_| GitError::InvalidPktLine("invalid length prefix".to_string()))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| GitError::InvalidPktLine("invalid length".to_string()))
}

/// State-machine tokenizer over an in-memory pkt-line stream.
///
/// Alternates between reading a 4-byte length prefix and the payload it
/// announces. The first malformed or truncated packet yields an error and the
/// tokenizer stops.
pub struct PktLineTokenizer<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> PktLineTokenizer<'a> {
    /// Creates a tokenizer over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            done: false,
        }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn next_packet(&mut self) -> Result<Option<Packet<'a>>> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < 4 {
            return Err(GitError::InvalidPktLine("truncated length prefix".to_string()));
        }

        let len = parse_length(&rest[..4])?;
        let packet = match len {
            0 => Packet::Flush,
            1 => Packet::Delimiter,
            2 => Packet::ResponseEnd,
            3 => return Err(GitError::InvalidPktLine("length too small".to_string())),
            _ if len > MAX_PKT_LEN => {
                return Err(GitError::InvalidPktLine("length too large".to_string()))
            }
            _ => {
                if rest.len() < len {
                    return Err(GitError::InvalidPktLine("truncated payload".to_string()));
                }
                Packet::Data(&rest[4..len])
            }
        };

        self.pos += match packet {
            Packet::Data(_) => len,
            _ => 4,
        };
        Ok(Some(packet))
    }
}

impl<'a> Iterator for PktLineTokenizer<'a> {
    type Item = Result<Packet<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Returns `buf` without its trailing flush-pkt, if it has one.
///
/// Operates on raw bytes: exactly the last four bytes are removed when they
/// are `0000`, nothing else is touched.
pub fn strip_flush(buf: &[u8]) -> &[u8] {
    buf.strip_suffix(FLUSH_PKT.as_slice()).unwrap_or(buf)
}

/// Raw bytes of a pkt-line section read from a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PktSection {
    /// Every byte consumed from the stream, unmodified.
    pub bytes: Vec<u8>,
    /// Whether the section ended with a flush-pkt.
    pub complete: bool,
}

/// Reads one pkt-line section, up to and including its flush-pkt.
///
/// Reading stops early at end of input, on a malformed length, or once
/// `max_bytes` would be exceeded. Every byte taken from `reader` is returned
/// in [`PktSection::bytes`] so the caller can forward it unchanged.
pub async fn read_pkt_section<R>(reader: &mut R, max_bytes: usize) -> std::io::Result<PktSection>
where
    R: AsyncRead + Unpin,
{
    let mut section = PktSection::default();
    loop {
        let mut prefix = [0u8; 4];
        let n = read_full(reader, &mut prefix).await?;
        section.bytes.extend_from_slice(&prefix[..n]);
        if n < 4 {
            return Ok(section);
        }

        let len = match parse_length(&prefix) {
            Ok(len) => len,
            Err(_) => return Ok(section),
        };
        if len == 0 {
            section.complete = true;
            return Ok(section);
        }
        if len < 4 || len > MAX_PKT_LEN || section.bytes.len() + len - 4 > max_bytes {
            return Ok(section);
        }

        let start = section.bytes.len();
        section.bytes.resize(start + len - 4, 0);
        let n = read_full(reader, &mut section.bytes[start..]).await?;
        section.bytes.truncate(start + n);
        if n < len - 4 {
            return Ok(section);
        }
    }
}

/// Fills `buf` as far as the reader allows, returning the number of bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
