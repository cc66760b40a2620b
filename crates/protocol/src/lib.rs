//! Wire protocol for termlink: the relay, the Mac agent, and browser viewers.
//!
//! Text frames carry UTF-8 JSON objects discriminated by a snake_case `type`
//! field; payload fields are camelCase (`sessionId`, `tabId`). There is one
//! message catalog per direction (see [`messages`]). Terminal byte streams
//! travel as binary WebSocket frames with a fixed 17-byte header (see
//! [`frame`]); the relay never interprets their payload bytes.

pub mod code;
pub mod constants;
pub mod frame;
pub mod messages;
pub mod types;

pub use code::{CODE_ALPHABET, CODE_LEN, CodeError, SessionCode};
pub use frame::{FrameError, decode_frame, encode_frame};
pub use messages::{
    BrowserToRelay, ErrorCode, RelayToAgent, RelayToBrowser, SessionData, SessionInfo, TabInfo,
};
pub use types::SessionId;
