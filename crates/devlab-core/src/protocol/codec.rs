//! Codec for the ADB server's host-side "smart socket" protocol.
//!
//! Wire format:
//! ```text
//! request:  [len:4 ascii lowercase hex][service:len]
//! reply:    "OKAY"                      (request accepted)
//!         | "FAIL" [len:4 hex][msg:len] (request rejected)
//! payload:  [len:4 hex][body:len]       (one block per tracker update)
//! ```
//! Everything is plain ASCII/UTF-8 text; there are no binary fields.  A
//! `host:track-devices` subscription, for example, is the 22 bytes
//! `0012host:track-devices`, answered by `OKAY` and then a stream of
//! hex-framed blocks, each containing zero or more `serial\tstate` lines.
//!
//! All decoders operate on the front of a byte slice and report how many bytes
//! they consumed, so a streaming reader can accumulate TCP reads in a buffer
//! and peel off complete frames as they arrive.  A short buffer is signalled
//! with [`ProtocolError::InsufficientData`], which callers treat as "read more
//! bytes", never as a failure.

use thiserror::Error;
use tracing::warn;

use crate::domain::device::{AdbDeviceState, DeviceId};

/// Length of the hex framing prefix and of a reply status, both 4 bytes.
const PREFIX_LEN: usize = 4;

/// Largest payload expressible in a 4-digit hex prefix.
const MAX_PAYLOAD_LEN: usize = 0xFFFF;

/// Errors that can occur while encoding requests or decoding server replies.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it starts.  Not a protocol
    /// violation: the caller should read more bytes and retry.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The service string cannot be framed in a 4-digit hex length.
    #[error("service string too long: {len} bytes (max {MAX_PAYLOAD_LEN})")]
    ServiceTooLong { len: usize },

    /// The 4 bytes where a hex length prefix was expected are not hex digits.
    #[error("bad length prefix: {found:?}")]
    BadLengthPrefix { found: String },

    /// The 4 bytes where a reply status was expected are neither OKAY nor FAIL.
    #[error("bad reply status: {found:?}")]
    BadStatus { found: String },

    /// The server answered FAIL; the attached message explains why.
    #[error("server rejected request: {0}")]
    ServerFail(String),

    /// A frame body that must be text is not valid UTF-8.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a service request with its 4-digit hex length prefix.
///
/// # Errors
///
/// Returns [`ProtocolError::ServiceTooLong`] if `service` exceeds 65535 bytes.
///
/// # Examples
///
/// ```rust
/// use devlab_core::protocol::encode_request;
///
/// let bytes = encode_request("host:track-devices").unwrap();
/// assert_eq!(bytes, b"0012host:track-devices");
/// ```
pub fn encode_request(service: &str) -> Result<Vec<u8>, ProtocolError> {
    let len = service.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::ServiceTooLong { len });
    }

    let mut buf = Vec::with_capacity(PREFIX_LEN + len);
    buf.extend_from_slice(format!("{len:04x}").as_bytes());
    buf.extend_from_slice(service.as_bytes());
    Ok(buf)
}

/// Decodes the reply status at the front of `buf`.
///
/// On `OKAY`, returns the number of bytes consumed (always 4).  On a complete
/// `FAIL` reply, returns [`ProtocolError::ServerFail`] carrying the server's
/// error message.  A partial reply (status or FAIL message still in flight)
/// returns [`ProtocolError::InsufficientData`].
///
/// # Errors
///
/// Returns [`ProtocolError`] as described above; [`ProtocolError::BadStatus`]
/// if the first 4 bytes are neither `OKAY` nor `FAIL`.
pub fn decode_status(buf: &[u8]) -> Result<usize, ProtocolError> {
    if buf.len() < PREFIX_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: PREFIX_LEN,
            available: buf.len(),
        });
    }

    match &buf[..PREFIX_LEN] {
        b"OKAY" => Ok(PREFIX_LEN),
        b"FAIL" => match decode_block(&buf[PREFIX_LEN..]) {
            Ok((message, _)) => Err(ProtocolError::ServerFail(message)),
            // Report the shortfall relative to the whole buffer so callers
            // can keep accumulating.
            Err(ProtocolError::InsufficientData { needed, .. }) => {
                Err(ProtocolError::InsufficientData {
                    needed: needed + PREFIX_LEN,
                    available: buf.len(),
                })
            }
            Err(other) => Err(other),
        },
        found => Err(ProtocolError::BadStatus {
            found: String::from_utf8_lossy(found).into_owned(),
        }),
    }
}

/// Decodes one hex-length-framed block from the front of `buf`.
///
/// Returns the block body as text and the total number of bytes consumed
/// (prefix + body), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] while the block is incomplete,
/// [`ProtocolError::BadLengthPrefix`] if the prefix is not 4 hex digits, and
/// [`ProtocolError::MalformedPayload`] if the body is not valid UTF-8.
///
/// # Examples
///
/// ```rust
/// use devlab_core::protocol::decode_block;
///
/// let (body, consumed) = decode_block(b"0005hello...trailing").unwrap();
/// assert_eq!(body, "hello");
/// assert_eq!(consumed, 9);
/// ```
pub fn decode_block(buf: &[u8]) -> Result<(String, usize), ProtocolError> {
    if buf.len() < PREFIX_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: PREFIX_LEN,
            available: buf.len(),
        });
    }

    let prefix = &buf[..PREFIX_LEN];
    let body_len = std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| ProtocolError::BadLengthPrefix {
            found: String::from_utf8_lossy(prefix).into_owned(),
        })?;

    let total = PREFIX_LEN + body_len;
    if buf.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: buf.len(),
        });
    }

    let body = std::str::from_utf8(&buf[PREFIX_LEN..total])
        .map_err(|e| ProtocolError::MalformedPayload(format!("block body is not UTF-8: {e}")))?;
    Ok((body.to_string(), total))
}

/// Parses a tracker block into `(serial, state)` pairs.
///
/// Each line of a `host:track-devices` block is `serial\tstate`.  Blank lines
/// are skipped; a line without a tab separator is logged and skipped rather
/// than failing the whole block.  State parsing itself never fails (unknown
/// states are preserved as [`AdbDeviceState::Unknown`]).
pub fn parse_device_list(text: &str) -> Vec<(DeviceId, AdbDeviceState)> {
    let mut devices = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((serial, state)) if !serial.is_empty() => {
                devices.push((DeviceId::from(serial), AdbDeviceState::from_wire(state)));
            }
            _ => {
                warn!("skipping malformed device line: {line:?}");
            }
        }
    }
    devices
}

// ── Tests ─────────────────────────────────────────────────────────────────────
