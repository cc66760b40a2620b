//! Message catalogs, one per direction.
//!
//! Every text frame is a JSON object discriminated by a `type` field. Tags
//! are snake_case, payload fields camelCase; that style is canonical in both
//! directions and round-trips bit-stable. Unknown tags and ill-typed payloads
//! fail deserialization, which the relay answers with `INVALID_MESSAGE`.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::code::SessionCode;
use crate::types::SessionId;

/// A terminal tab as reported by the agent. Opaque to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub active: bool,
}

/// A terminal session as reported by the agent. Opaque to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Error codes carried in `error{code,message}` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCode,
    ExpiredCode,
    AlreadyJoined,
    NotFound,
    MacDisconnected,
    InvalidMessage,
    SessionNotFound,
}

impl ErrorCode {
    /// Human-readable default text for each code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::InvalidCode => "no session with that pairing code",
            Self::ExpiredCode => "pairing code has expired",
            Self::AlreadyJoined => "session already has a viewer",
            Self::NotFound => "no such session",
            Self::MacDisconnected => "the agent for this session has disconnected",
            Self::InvalidMessage => "malformed or unexpected message",
            Self::SessionNotFound => "message addressed an unknown session",
        }
    }
}

/// Messages a browser viewer may send to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BrowserToRelay {
    /// First message on a fresh connection: claim a pairing code.
    ///
    /// The code travels as a raw string so malformed input reaches the
    /// registry and earns `INVALID_CODE` rather than a schema error.
    Join { code: String },
    /// First message after a page reload: re-attach to a known session.
    Rejoin { session_id: String },
    TerminalInput {
        session_id: SessionId,
        payload: String,
    },
    TerminalResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    RequestScreenRefresh { session_id: SessionId },
    TabSwitch { tab_id: String },
    TabCreate,
    TabClose { tab_id: String },
    Ping,
}

/// Messages the relay may send to a browser viewer.
///
/// Everything except `joined`, `error`, and `pong` originates at the agent
/// and reaches the relay wrapped in [`SessionData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayToBrowser {
    Joined { session_id: SessionId },
    Error { code: ErrorCode, message: String },
    TerminalData {
        session_id: SessionId,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    InitialTerminalData {
        session_id: SessionId,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    /// Terminal display settings, passed through verbatim.
    Config {
        #[serde(flatten)]
        settings: serde_json::Map<String, serde_json::Value>,
    },
    TabList { tabs: Vec<TabInfo> },
    TabSwitch { tab_id: String },
    TabCreated { tab: TabInfo },
    TabClosed { tab_id: String },
    SessionResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    SessionConnected {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    SessionDisconnected { session_id: SessionId },
    SessionList { sessions: Vec<SessionInfo> },
    Pong,
}

impl RelayToBrowser {
    /// Builds an `error` frame with the code's default message.
    pub fn error(code: ErrorCode) -> Self {
        Self::Error {
            code,
            message: code.default_message().to_owned(),
        }
    }

    /// Whether this kind originates at the agent and may appear inside a
    /// [`SessionData`] wrapper. `joined`, `error`, and `pong` are minted by
    /// the relay itself.
    pub fn is_agent_originated(&self) -> bool {
        !matches!(self, Self::Joined { .. } | Self::Error { .. } | Self::Pong)
    }
}

/// Messages the relay may send to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayToAgent {
    /// First frame after the `/mac` upgrade: the pair exists, here is its
    /// code (for the user to read out) and session id (for framing terminal
    /// bytes).
    Registered {
        code: SessionCode,
        session_id: SessionId,
    },
    BrowserConnected,
    BrowserDisconnected,
    TerminalInput {
        session_id: SessionId,
        payload: String,
    },
    TerminalResize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    RequestScreenRefresh { session_id: SessionId },
    TabSwitch { tab_id: String },
    TabCreate,
    TabClose { tab_id: String },
}

impl RelayToAgent {
    /// Maps a browser command onto the agent-facing catalog.
    ///
    /// Returns `None` for the kinds the relay answers itself (`join`,
    /// `rejoin`, `ping`).
    pub fn from_browser(msg: BrowserToRelay) -> Option<Self> {
        match msg {
            BrowserToRelay::TerminalInput {
                session_id,
                payload,
            } => Some(Self::TerminalInput {
                session_id,
                payload,
            }),
            BrowserToRelay::TerminalResize {
                session_id,
                cols,
                rows,
            } => Some(Self::TerminalResize {
                session_id,
                cols,
                rows,
            }),
            BrowserToRelay::RequestScreenRefresh { session_id } => {
                Some(Self::RequestScreenRefresh { session_id })
            }
            BrowserToRelay::TabSwitch { tab_id } => Some(Self::TabSwitch { tab_id }),
            BrowserToRelay::TabCreate => Some(Self::TabCreate),
            BrowserToRelay::TabClose { tab_id } => Some(Self::TabClose { tab_id }),
            BrowserToRelay::Join { .. } | BrowserToRelay::Rejoin { .. } | BrowserToRelay::Ping => {
                None
            }
        }
    }
}

/// The one text message an agent sends: a tagged wrapper whose payload is a
/// complete relay-to-browser message produced at the agent.
///
/// The payload stays a [`RawValue`] so the relay can validate the inner kind
/// and then forward the original bytes untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(rename = "type")]
    kind: SessionDataTag,
    pub payload: Box<RawValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SessionDataTag {
    #[serde(rename = "session_data")]
    SessionData,
}

impl SessionData {
    /// Wraps an agent-originated event for transmission.
    pub fn wrap(event: &RelayToBrowser) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(event)?;
        Ok(Self {
            kind: SessionDataTag::SessionData,
            payload: RawValue::from_string(json)?,
        })
    }

    /// Parses the wrapped payload into a typed event.
    pub fn event(&self) -> Result<RelayToBrowser, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }

    /// The raw payload JSON, exactly as received.
    pub fn payload_json(&self) -> &str {
        self.payload.get()
    }
}

/// Serde adapter embedding raw bytes in JSON as standard base64.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_wire_shape() {
        let msg: BrowserToRelay =
            serde_json::from_str(r#"{"type":"join","code":"abc234"}"#).unwrap();
        assert_eq!(
            msg,
            BrowserToRelay::Join {
                code: "abc234".into()
            }
        );
    }

    #[test]
    fn terminal_input_uses_camel_case_fields() {
        let id = SessionId::new();
        let msg = BrowserToRelay::TerminalInput {
            session_id: id,
            payload: "ls\r".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"terminal_input\""));
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"payload\":\"ls\\r\""));
        assert!(!json.contains("session_id"));
    }

    #[test]
    fn browser_catalog_rejects_unknown_kind() {
        let result = serde_json::from_str::<BrowserToRelay>(r#"{"type":"open_file"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn browser_catalog_rejects_relay_kinds() {
        // Role-inappropriate: `joined` is relay-to-browser only.
        let id = SessionId::new();
        let json = format!(r#"{{"type":"joined","sessionId":"{id}"}}"#);
        assert!(serde_json::from_str::<BrowserToRelay>(&json).is_err());
    }

    #[test]
    fn browser_catalog_rejects_ill_typed_payload() {
        let result =
            serde_json::from_str::<BrowserToRelay>(r#"{"type":"terminal_resize","cols":"80"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn joined_roundtrip() {
        let id = SessionId::new();
        let msg = RelayToBrowser::Joined { session_id: id };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, format!(r#"{{"type":"joined","sessionId":"{id}"}}"#));
        let parsed: RelayToBrowser = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn error_code_wire_form() {
        let msg = RelayToBrowser::error(ErrorCode::MacDisconnected);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":\"MAC_DISCONNECTED\""));
        assert!(json.contains("\"message\""));

        let codes = serde_json::to_string(&[
            ErrorCode::InvalidCode,
            ErrorCode::ExpiredCode,
            ErrorCode::AlreadyJoined,
            ErrorCode::NotFound,
            ErrorCode::InvalidMessage,
            ErrorCode::SessionNotFound,
        ])
        .unwrap();
        assert_eq!(
            codes,
            r#"["INVALID_CODE","EXPIRED_CODE","ALREADY_JOINED","NOT_FOUND","INVALID_MESSAGE","SESSION_NOT_FOUND"]"#
        );
    }

    #[test]
    fn terminal_data_is_base64() {
        let id = SessionId::new();
        let msg = RelayToBrowser::TerminalData {
            session_id: id,
            payload: b"Hello".to_vec(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("SGVsbG8="));
        let parsed: RelayToBrowser = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn config_passes_unknown_settings_through() {
        let json = r#"{"type":"config","fontSize":14,"theme":"solarized"}"#;
        let msg: RelayToBrowser = serde_json::from_str(json).unwrap();
        let reencoded = serde_json::to_string(&msg).unwrap();
        let a: serde_json::Value = serde_json::from_str(json).unwrap();
        let b: serde_json::Value = serde_json::from_str(&reencoded).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn registered_carries_code_and_session() {
        let code = SessionCode::parse("ABC234").unwrap();
        let id = SessionId::new();
        let msg = RelayToAgent::Registered {
            code,
            session_id: id,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"registered\""));
        assert!(json.contains("\"code\":\"ABC234\""));
        assert!(json.contains(&format!("\"sessionId\":\"{id}\"")));
    }

    #[test]
    fn from_browser_maps_command_kinds() {
        let id = SessionId::new();
        let mapped = RelayToAgent::from_browser(BrowserToRelay::TerminalInput {
            session_id: id,
            payload: "ls\r".into(),
        });
        assert_eq!(
            mapped,
            Some(RelayToAgent::TerminalInput {
                session_id: id,
                payload: "ls\r".into()
            })
        );

        assert_eq!(
            RelayToAgent::from_browser(BrowserToRelay::TabCreate),
            Some(RelayToAgent::TabCreate)
        );
    }

    #[test]
    fn from_browser_rejects_relay_answered_kinds() {
        assert_eq!(RelayToAgent::from_browser(BrowserToRelay::Ping), None);
        assert_eq!(
            RelayToAgent::from_browser(BrowserToRelay::Join { code: "x".into() }),
            None
        );
        assert_eq!(
            RelayToAgent::from_browser(BrowserToRelay::Rejoin {
                session_id: "x".into()
            }),
            None
        );
    }

    #[test]
    fn session_data_wrap_and_parse() {
        let event = RelayToBrowser::TabSwitch { tab_id: "t1".into() };
        let wrapped = SessionData::wrap(&event).unwrap();

        let json = serde_json::to_string(&wrapped).unwrap();
        assert!(json.contains("\"type\":\"session_data\""));

        let parsed: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event().unwrap(), event);
    }

    #[test]
    fn session_data_payload_preserved_verbatim() {
        // The raw payload text must come back byte-identical for forwarding.
        let json = r#"{"type":"session_data","payload":{"type":"tab_list","tabs":[{"id":"t1","title":"zsh","active":true}]}}"#;
        let parsed: SessionData = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.payload_json(),
            r#"{"type":"tab_list","tabs":[{"id":"t1","title":"zsh","active":true}]}"#
        );
        assert!(parsed.event().unwrap().is_agent_originated());
    }

    #[test]
    fn session_data_rejects_other_tags() {
        let result = serde_json::from_str::<SessionData>(r#"{"type":"tab_list","payload":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn relay_minted_kinds_are_not_agent_originated() {
        let id = SessionId::new();
        assert!(!RelayToBrowser::Joined { session_id: id }.is_agent_originated());
        assert!(!RelayToBrowser::error(ErrorCode::InvalidCode).is_agent_originated());
        assert!(!RelayToBrowser::Pong.is_agent_originated());
        assert!(RelayToBrowser::SessionDisconnected { session_id: id }.is_agent_originated());
    }

    #[test]
    fn reencode_is_bit_stable() {
        // Parse then re-encode must produce identical text for relay-built
        // frames, since forwarding relies on it.
        let id = SessionId::new();
        let original =
            format!(r#"{{"type":"session_resize","sessionId":"{id}","cols":120,"rows":40}}"#);
        let parsed: RelayToBrowser = serde_json::from_str(&original).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), original);
    }
}
