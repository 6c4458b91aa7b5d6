//! Minimal STOMP 1.2 frame codec.
//!
//! Only what an editor client needs: CONNECT, SUBSCRIBE, SEND and
//! DISCONNECT outbound; CONNECTED, MESSAGE, RECEIPT and ERROR inbound.
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```

use crate::CodecError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Send => "SEND",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
            StompCommand::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompCommand {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" | "STOMP" => Ok(StompCommand::Connect),
            "CONNECTED" => Ok(StompCommand::Connected),
            "SUBSCRIBE" => Ok(StompCommand::Subscribe),
            "UNSUBSCRIBE" => Ok(StompCommand::Unsubscribe),
            "SEND" => Ok(StompCommand::Send),
            "MESSAGE" => Ok(StompCommand::Message),
            "RECEIPT" => Ok(StompCommand::Receipt),
            "ERROR" => Ok(StompCommand::Error),
            "DISCONNECT" => Ok(StompCommand::Disconnect),
            other => Err(CodecError::Stomp(format!("unknown command {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(CodecError::Stomp(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; STOMP gives repeated headers first-wins.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT frame carrying a bearer token and heart-beat intervals in ms.
    pub fn connect(host: &str, access_token: &str, heartbeat_ms: (u64, u64)) -> Self {
        Self::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat_ms.0, heartbeat_ms.1))
            .header("Authorization", format!("Bearer {}", access_token))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send(destination: &str, json_body: impl Into<String>) -> Self {
        let body = json_body.into();
        Self::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    /// Serialize to wire text, NUL terminated.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push_str(self.command.as_str());
        out.push('\n');
        // CONNECT headers are not escaped in STOMP 1.2.
        let raw = self.command == StompCommand::Connect;
        for (name, value) in &self.headers {
            if raw {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            } else {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. Returns `Ok(None)` for heart-beat (EOL-only) text.
    pub fn decode(text: &str) -> Result<Option<Self>, CodecError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() || text == "\0" {
            return Ok(None);
        }
        let text = text.trim_end_matches(['\r', '\n']);
        let text = text
            .strip_suffix('\0')
            .ok_or_else(|| CodecError::Stomp("frame is not NUL terminated".into()))?;

        let (head, body) = match text.find("\n\n") {
            Some(split) => (&text[..split], &text[split + 2..]),
            None => match text.find("\r\n\r\n") {
                Some(split) => (&text[..split], &text[split + 4..]),
                None => (text, ""),
            },
        };

        let mut lines = head.lines();
        let command: StompCommand = lines
            .next()
            .map(str::trim_end)
            .ok_or_else(|| CodecError::Stomp("missing command".into()))?
            .parse()?;

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| CodecError::Stomp(format!("malformed header {:?}", line)))?;
            headers.push((unescape(name)?, unescape(value)?));
        }

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}
