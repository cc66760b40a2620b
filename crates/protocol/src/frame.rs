//! Binary fast path for terminal byte streams.
//!
//! Terminal output dominates bandwidth, so it bypasses JSON entirely.
//!
//! # Wire format
//!
//! ```text
//! [16 bytes: session id, raw UUID bytes][1 byte: 0x00][payload bytes...]
//! ```
//!
//! The single zero byte after the id guards against misframed data: a frame
//! without it is rejected before any payload is touched. Payload bytes are
//! opaque; the relay forwards them without inspection.

use crate::types::SessionId;

/// Bytes preceding the payload: 16 id bytes plus the separator.
pub const FRAME_HEADER_LEN: usize = 17;

/// Builds a binary frame for the given session.
pub fn encode_frame(session_id: SessionId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(session_id.as_bytes());
    buf.push(0x00);
    buf.extend_from_slice(payload);
    buf
}

/// Splits a binary frame into its session id and payload.
pub fn decode_frame(data: &[u8]) -> Result<(SessionId, &[u8]), FrameError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TooShort(data.len()));
    }
    if data[16] != 0x00 {
        return Err(FrameError::MissingSeparator);
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&data[..16]);
    Ok((SessionId::from_bytes(id), &data[FRAME_HEADER_LEN..]))
}

/// Errors from binary frame decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("binary frame too short: {0} bytes (need at least {FRAME_HEADER_LEN})")]
    TooShort(usize),

    #[error("binary frame missing separator byte after session id")]
    MissingSeparator,
}
