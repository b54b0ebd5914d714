//! Wings console socket frames
//!
//! Every frame is `{"event": "<name>", "args": [...]}` in both directions.

use serde::{Deserialize, Serialize};

/// Frames sent TO the node
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "args")]
pub enum OutboundFrame {
    #[serde(rename = "auth")]
    Auth(Vec<String>),

    /// Written to the server process stdin
    #[serde(rename = "send command")]
    SendCommand(Vec<String>),
}

impl OutboundFrame {
    pub fn auth(token: &str) -> Self {
        OutboundFrame::Auth(vec![token.to_string()])
    }

    pub fn command(command: &str) -> Self {
        OutboundFrame::SendCommand(vec![command.to_string()])
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

/// Frames received FROM the node
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    AuthSuccess,
    /// May carry several newline separated lines
    ConsoleOutput(String),
    Status(String),
    TokenExpiring,
    TokenExpired,
    JwtError(String),
    DaemonError(String),
    DaemonMessage(String),
    Stats,
    Other(String),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let first = first_arg(&raw.args);

        let frame = match raw.event.as_str() {
            "auth success" => InboundFrame::AuthSuccess,
            "console output" => InboundFrame::ConsoleOutput(first),
            "status" => InboundFrame::Status(first),
            "token expiring" => InboundFrame::TokenExpiring,
            "token expired" => InboundFrame::TokenExpired,
            "jwt error" => InboundFrame::JwtError(first),
            "daemon error" => InboundFrame::DaemonError(first),
            "daemon message" => InboundFrame::DaemonMessage(first),
            "stats" => InboundFrame::Stats,
            _ => InboundFrame::Other(raw.event),
        };
        Ok(frame)
    }
}

fn first_arg(args: &[serde_json::Value]) -> String {
    match args.first() {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_shape() {
        assert_eq!(
            OutboundFrame::auth("jwt").to_json().unwrap(),
            r#"{"event":"auth","args":["jwt"]}"#
        );
        assert_eq!(
            OutboundFrame::command("whitelist add Steve").to_json().unwrap(),
            r#"{"event":"send command","args":["whitelist add Steve"]}"#
        );
    }

    #[test]
    fn test_inbound_events() {
        assert_eq!(InboundFrame::parse(r#"{"event":"auth success"}"#).unwrap(), InboundFrame::AuthSuccess);
        assert_eq!(
            InboundFrame::parse(r#"{"event":"console output","args":["Done (3.1s)!"]}"#).unwrap(),
            InboundFrame::ConsoleOutput("Done (3.1s)!".to_string())
        );
        assert_eq!(
            InboundFrame::parse(r#"{"event":"jwt error","args":["signature is invalid"]}"#).unwrap(),
            InboundFrame::JwtError("signature is invalid".to_string())
        );
        assert_eq!(
            InboundFrame::parse(r#"{"event":"token expiring"}"#).unwrap(),
            InboundFrame::TokenExpiring
        );
        assert_eq!(
            InboundFrame::parse(r#"{"event":"install output","args":["x"]}"#).unwrap(),
            InboundFrame::Other("install output".to_string())
        );
    }

    #[test]
    fn test_non_string_args_and_garbage() {
        assert_eq!(
            InboundFrame::parse(r#"{"event":"status","args":[3]}"#).unwrap(),
            InboundFrame::Status("3".to_string())
        );
        assert!(InboundFrame::parse("not json").is_err());
    }
}
