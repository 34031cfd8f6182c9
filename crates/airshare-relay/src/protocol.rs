//! Control-channel messages exchanged between participants and the relay
//!
//! Every frame is a JSON object tagged by `type`. Negotiation records
//! (`offer`, `answer`, `ice-candidate`) are opaque to the relay: they are
//! forwarded as received, with a `fromClient` field added.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, RelayError};

/// Length of a shareable session code
pub const SESSION_CODE_LEN: usize = 6;

/// Characters a session code is drawn from
pub const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random session code such as `AB12CD`
pub fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_CODE_LEN)
        .map(|_| SESSION_CODE_ALPHABET[rng.gen_range(0..SESSION_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Check that a code has the shareable format (6 uppercase letters or digits)
pub fn is_valid_session_code(code: &str) -> bool {
    code.len() == SESSION_CODE_LEN && code.bytes().all(|b| SESSION_CODE_ALPHABET.contains(&b))
}

/// Normalise user input into a session code (trimmed, uppercased)
pub fn normalize_session_code(input: &str) -> String {
    input.trim().to_uppercase()
}

/// Generate an opaque client id: `client_<9 base36 chars>_<unix millis>`
pub fn generate_client_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
        .collect();
    format!("client_{}_{}", suffix, Utc::now().timestamp_millis())
}

/// Messages sent by participants to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "create-session")]
    CreateSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "join-session")]
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "offer")]
    Offer {
        offer: Value,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    #[serde(rename = "answer")]
    Answer {
        answer: Value,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: Value,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    #[serde(rename = "leave-session")]
    LeaveSession {},
    #[serde(rename = "ping")]
    Ping {},
}

impl ClientMessage {
    pub const TYPES: &'static [&'static str] = &[
        "create-session",
        "join-session",
        "offer",
        "answer",
        "ice-candidate",
        "leave-session",
        "ping",
    ];

    pub fn msg_type(&self) -> &'static str {
        match self {
            ClientMessage::CreateSession { .. } => "create-session",
            ClientMessage::JoinSession { .. } => "join-session",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::LeaveSession {} => "leave-session",
            ClientMessage::Ping {} => "ping",
        }
    }

    /// Whether this is a negotiation record forwarded to the other member
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            ClientMessage::Offer { .. } | ClientMessage::Answer { .. } | ClientMessage::IceCandidate { .. }
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A parsed inbound frame together with its raw JSON object
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub message: ClientMessage,
    pub raw: Map<String, Value>,
}

/// Parse a text frame from a participant.
///
/// Unparsable frames and frames of a known type with bad fields are
/// `MalformedMessage`; well-formed frames of an unrecognised type are
/// `UnknownMessageType`.
pub fn parse_client_frame(text: &str) -> Result<InboundFrame, RelayError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

    let raw = match value {
        Value::Object(map) => map,
        other => {
            return Err(RelayError::MalformedMessage(format!(
                "expected JSON object, got {}",
                other
            )))
        }
    };

    let msg_type = raw
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| RelayError::MalformedMessage("missing type".to_string()))?;

    if !ClientMessage::TYPES.contains(&msg_type) {
        return Err(RelayError::UnknownMessageType(msg_type.to_string()));
    }

    let message = serde_json::from_value(Value::Object(raw.clone()))
        .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

    Ok(InboundFrame { message, raw })
}

/// Tag a raw negotiation record with its sender, leaving everything else as received
pub fn tag_relayed(mut raw: Map<String, Value>, from_client: &str) -> String {
    raw.insert("fromClient".to_string(), Value::String(from_client.to_string()));
    Value::Object(raw).to_string()
}

/// Messages sent by the relay to participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "clientId")]
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "session-created")]
    SessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "session-joined")]
    SessionJoined {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "clientCount")]
        client_count: usize,
    },
    #[serde(rename = "peer-joined")]
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "clientCount")]
        client_count: usize,
    },
    #[serde(rename = "peer-left")]
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(rename = "clientCount")]
        client_count: usize,
    },
    #[serde(rename = "offer")]
    Offer {
        offer: Value,
        #[serde(rename = "fromClient", default)]
        from_client: Option<String>,
    },
    #[serde(rename = "answer")]
    Answer {
        answer: Value,
        #[serde(rename = "fromClient", default)]
        from_client: Option<String>,
    },
    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: Value,
        #[serde(rename = "fromClient", default)]
        from_client: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong {},
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn error(err: &RelayError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
            kind: Some(err.kind()),
            timestamp: Utc::now(),
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::SessionCreated { .. } => "session-created",
            ServerMessage::SessionJoined { .. } => "session-joined",
            ServerMessage::PeerJoined { .. } => "peer-joined",
            ServerMessage::PeerLeft { .. } => "peer-left",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate { .. } => "ice-candidate",
            ServerMessage::Pong {} => "pong",
            ServerMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_code_format() {
        for _ in 0..100 {
            let code = generate_session_code();
            assert!(is_valid_session_code(&code), "bad code {}", code);
        }
        assert!(is_valid_session_code("AB12CD"));
        assert!(!is_valid_session_code("ab12cd"));
        assert!(!is_valid_session_code("AB12C"));
        assert!(!is_valid_session_code("AB12CD7"));
        assert!(!is_valid_session_code("AB-2CD"));
        assert_eq!(normalize_session_code("  ab12cd\n"), "AB12CD");
    }

    #[test]
    fn test_client_id_format() {
        let id = generate_client_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "client");
        assert_eq!(parts[1].len(), 9);
        assert!(parts[2].parse::<i64>().is_ok());
    }

    #[test]
    fn test_client_message_format() {
        let msg = ClientMessage::CreateSession { session_id: "AB12CD".to_string() };
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"create-session\""));
        assert!(json.contains("\"sessionId\":\"AB12CD\""));

        let msg = ClientMessage::LeaveSession {};
        assert_eq!(msg.to_json(), r#"{"type":"leave-session"}"#);

        let msg = ClientMessage::IceCandidate {
            candidate: json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
            session_id: None,
        };
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"ice-candidate\""));
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn test_parse_client_frame() {
        let frame = parse_client_frame(r#"{"type":"join-session","sessionId":"AB12CD"}"#).unwrap();
        assert_eq!(frame.message, ClientMessage::JoinSession { session_id: "AB12CD".to_string() });

        // Extra fields on empty variants are tolerated
        let frame = parse_client_frame(r#"{"type":"leave-session","sessionId":"AB12CD"}"#).unwrap();
        assert_eq!(frame.message, ClientMessage::LeaveSession {});

        let frame = parse_client_frame(r#"{"type":"offer","offer":{"type":"offer","sdp":"v=0"},"sessionId":"AB12CD"}"#).unwrap();
        assert!(frame.message.is_signal());
        assert_eq!(frame.raw["sessionId"], "AB12CD");
    }

    #[test]
    fn test_parse_client_frame_errors() {
        assert!(matches!(parse_client_frame("not json"), Err(RelayError::MalformedMessage(_))));
        assert!(matches!(parse_client_frame("[1,2,3]"), Err(RelayError::MalformedMessage(_))));
        assert!(matches!(parse_client_frame(r#"{"sessionId":"X"}"#), Err(RelayError::MalformedMessage(_))));
        assert!(matches!(
            parse_client_frame(r#"{"type":"create-session"}"#),
            Err(RelayError::MalformedMessage(_))
        ));
        assert_eq!(
            parse_client_frame(r#"{"type":"dance"}"#).unwrap_err(),
            RelayError::UnknownMessageType("dance".to_string())
        );
    }

    #[test]
    fn test_tag_relayed_keeps_payload() {
        let frame = parse_client_frame(
            r#"{"type":"answer","answer":{"type":"answer","sdp":"v=0\r\n"},"extra":[1,2]}"#,
        )
        .unwrap();
        let tagged: Value = serde_json::from_str(&tag_relayed(frame.raw, "client_a")).unwrap();
        assert_eq!(tagged["type"], "answer");
        assert_eq!(tagged["answer"]["sdp"], "v=0\r\n");
        assert_eq!(tagged["extra"], json!([1, 2]));
        assert_eq!(tagged["fromClient"], "client_a");
    }

    #[test]
    fn test_server_message_format() {
        let msg = ServerMessage::PeerJoined { peer_id: "client_b".to_string(), client_count: 2 };
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"peer-joined\""));
        assert!(json.contains("\"peerId\":\"client_b\""));
        assert!(json.contains("\"clientCount\":2"));

        let msg = ServerMessage::error(&RelayError::SessionFull("AB12CD".to_string()));
        let value: Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Session is full");
        assert_eq!(value["kind"], "session-full");
        assert!(value["timestamp"].is_string());

        assert_eq!(ServerMessage::Pong {}.to_json(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_server_message_parses_relayed_record() {
        let text = r#"{"type":"offer","offer":{"type":"offer","sdp":"v=0"},"sessionId":"AB12CD","fromClient":"client_a"}"#;
        let msg: ServerMessage = serde_json::from_str(text).unwrap();
        match msg {
            ServerMessage::Offer { offer, from_client } => {
                assert_eq!(offer["sdp"], "v=0");
                assert_eq!(from_client.as_deref(), Some("client_a"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
