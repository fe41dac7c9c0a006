//! Frames exchanged between the relay server and the browser bridge.
//!
//! The browser tab (the primary bridge) receives eye expressions wrapped as
//! `EYE_CMD:<id>:<expr>` and structured tool calls as `MCP_CMD:<json>`. It
//! answers with `EYE:<reply>` and `MCP_RESP:<reqId>:<json>` respectively.

use crate::protocol::frame::Submission;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// First frame a healthy eye endpoint sends.
pub const READY: &str = ":ready";

/// Greeting sent to a freshly registered browser bridge.
pub const BRIDGE_READY: &str = "EYE_BRIDGE:ready";

/// Sent to an eye client when the user has no bridge; the socket closes after.
pub const NO_BRIDGE: &str = "!:No browser connected";

pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Field carrying the correlation ID inside a structured command.
pub const STRUCTURED_ID_FIELD: &str = "_mcpReqId";

const EYE_CMD_PREFIX: &str = "EYE_CMD:";
const EYE_REPLY_PREFIX: &str = "EYE:";
const STRUCTURED_CMD_PREFIX: &str = "MCP_CMD:";
const STRUCTURED_REPLY_PREFIX: &str = "MCP_RESP:";

/// Wrap a caller submission for the browser; fire-and-forget keeps an empty id.
pub fn eye_command(submission: &Submission) -> String {
    let id = submission.id().map(|id| id.as_str()).unwrap_or("");
    format!("{EYE_CMD_PREFIX}{id}:{}", submission.expression())
}

/// Wrap an already-serialized structured command.
pub fn structured_command(json: &str) -> String {
    format!("{STRUCTURED_CMD_PREFIX}{json}")
}

/// Classification of a frame read from the browser bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeFrame<'a> {
    /// `EYE:<reply>`, fanned out to the user's eye subscribers.
    EyeReply(&'a str),
    /// `MCP_RESP:<reqId>:<json>`, completes a structured request.
    StructuredReply { request_id: &'a str, body: &'a str },
    Ping,
    Other(&'a str),
}

impl<'a> BridgeFrame<'a> {
    pub fn parse(frame: &'a str) -> Self {
        if let Some(reply) = frame.strip_prefix(EYE_REPLY_PREFIX) {
            return BridgeFrame::EyeReply(reply);
        }
        if let Some(rest) = frame.strip_prefix(STRUCTURED_REPLY_PREFIX)
            && let Some((request_id, body)) = rest.split_once(':')
        {
            return BridgeFrame::StructuredReply { request_id, body };
        }
        if frame == PING {
            return BridgeFrame::Ping;
        }
        BridgeFrame::Other(frame)
    }
}

/// A structured call into the browser-side bridge API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeCommand {
    #[serde(rename = "_bridge")]
    pub method: String,
    #[serde(rename = "_args")]
    pub args: Vec<Value>,
}

impl BridgeCommand {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Flatten into the JSON object the bridge expects.
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("_bridge".to_string(), Value::String(self.method));
        map.insert("_args".to_string(), Value::Array(self.args));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_command_keeps_empty_id_for_fire() {
        assert_eq!(
            eye_command(&Submission::parse("console.log(1)")),
            "EYE_CMD::console.log(1)"
        );
        assert_eq!(
            eye_command(&Submission::parse("a:document.title")),
            "EYE_CMD:a:document.title"
        );
    }

    #[test]
    fn test_parse_bridge_frames() {
        assert_eq!(BridgeFrame::parse("EYE:a:42"), BridgeFrame::EyeReply("a:42"));
        assert_eq!(
            BridgeFrame::parse("MCP_RESP:17:{\"ok\":true}"),
            BridgeFrame::StructuredReply {
                request_id: "17",
                body: "{\"ok\":true}"
            }
        );
        assert_eq!(BridgeFrame::parse("ping"), BridgeFrame::Ping);
        assert_eq!(BridgeFrame::parse("MCP_RESP:broken"), BridgeFrame::Other("MCP_RESP:broken"));
    }

    #[test]
    fn test_bridge_command_shape() {
        let map = BridgeCommand::new("query", vec![Value::from("#main")]).into_map();
        assert_eq!(
            Value::Object(map),
            serde_json::json!({"_bridge": "query", "_args": ["#main"]})
        );
    }
}
