//! Line protocol spoken on the daemon's local socket.
//!
//! Caller → daemon: `VERSION:<build>` then any number of `EVAL:<frame>`.
//! Daemon → caller: `OK`, `RESTART`, `OK:<payload>`, `ERR:<payload>`,
//! `RESP:<raw frame>`. One message per line: payloads escape `\\`, `\n`
//! and `\r` so multi-line results survive the trip.

use std::borrow::Cow;

/// Escape a payload for a single protocol line.
pub fn escape_payload(payload: &str) -> Cow<'_, str> {
    if !payload.contains(['\\', '\n', '\r']) {
        return Cow::Borrowed(payload);
    }
    let mut out = String::with_capacity(payload.len() + 8);
    for c in payload.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape_payload`]. Unknown escapes are kept as written.
pub fn unescape_payload(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A line sent by a local caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRequest {
    Version(String),
    Eval(String),
    Unknown(String),
}

impl LocalRequest {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if let Some(version) = line.strip_prefix("VERSION:") {
            LocalRequest::Version(version.to_string())
        } else if let Some(frame) = line.strip_prefix("EVAL:") {
            LocalRequest::Eval(unescape_payload(frame))
        } else {
            LocalRequest::Unknown(line.to_string())
        }
    }
}

impl std::fmt::Display for LocalRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalRequest::Version(v) => write!(f, "VERSION:{v}"),
            LocalRequest::Eval(frame) => write!(f, "EVAL:{}", escape_payload(frame)),
            LocalRequest::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

/// A line sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalResponse {
    /// `OK`: version accepted.
    Accepted,
    /// `RESTART`: version rejected, daemon is retiring.
    Restart,
    /// `OK:<payload>`: correlated success.
    Result(String),
    /// `ERR:<payload>`: correlated failure or timeout.
    Error(String),
    /// `RESP:<frame>`: broadcast copy of an upstream frame.
    Broadcast(String),
    Unknown(String),
}

impl LocalResponse {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line {
            "OK" => LocalResponse::Accepted,
            "RESTART" => LocalResponse::Restart,
            _ => {
                if let Some(payload) = line.strip_prefix("OK:") {
                    LocalResponse::Result(unescape_payload(payload))
                } else if let Some(payload) = line.strip_prefix("ERR:") {
                    LocalResponse::Error(unescape_payload(payload))
                } else if let Some(frame) = line.strip_prefix("RESP:") {
                    LocalResponse::Broadcast(unescape_payload(frame))
                } else {
                    LocalResponse::Unknown(line.to_string())
                }
            }
        }
    }
}

impl std::fmt::Display for LocalResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalResponse::Accepted => write!(f, "OK"),
            LocalResponse::Restart => write!(f, "RESTART"),
            LocalResponse::Result(payload) => write!(f, "OK:{}", escape_payload(payload)),
            LocalResponse::Error(payload) => write!(f, "ERR:{}", escape_payload(payload)),
            LocalResponse::Broadcast(frame) => write!(f, "RESP:{}", escape_payload(frame)),
            LocalResponse::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            LocalRequest::parse("VERSION:1700000000\n"),
            LocalRequest::Version("1700000000".into())
        );
        assert_eq!(
            LocalRequest::parse("EVAL:a:document.title"),
            LocalRequest::Eval("a:document.title".into())
        );
        assert_eq!(
            LocalRequest::parse("HELLO"),
            LocalRequest::Unknown("HELLO".into())
        );
    }

    #[test]
    fn test_ok_is_distinct_from_ok_payload() {
        assert_eq!(LocalResponse::parse("OK\n"), LocalResponse::Accepted);
        assert_eq!(LocalResponse::parse("OK:"), LocalResponse::Result(String::new()));
        assert_eq!(LocalResponse::parse("OK:42"), LocalResponse::Result("42".into()));
    }

    #[test]
    fn test_broadcast_keeps_raw_frame() {
        let line = LocalResponse::Broadcast("z:hello".into()).to_string();
        assert_eq!(line, "RESP:z:hello");
        assert_eq!(
            LocalResponse::parse(&line),
            LocalResponse::Broadcast("z:hello".into())
        );
    }

    #[test]
    fn test_restart_and_error_lines() {
        assert_eq!(LocalResponse::parse("RESTART"), LocalResponse::Restart);
        assert_eq!(
            LocalResponse::parse("ERR:timeout"),
            LocalResponse::Error("timeout".into())
        );
        assert_eq!(LocalRequest::Version("v1".into()).to_string(), "VERSION:v1");
    }

    #[test]
    fn test_multiline_payload_is_one_line() {
        let line = LocalResponse::Result("line1\nline2\\n".into()).to_string();
        assert_eq!(line, "OK:line1\\nline2\\\\n");
        assert!(!line.contains('\n'));
        assert_eq!(
            LocalResponse::parse(&line),
            LocalResponse::Result("line1\nline2\\n".into())
        );

        let eval = LocalRequest::Eval("a:`x\ny`".into()).to_string();
        assert_eq!(eval, "EVAL:a:`x\\ny`");
        assert_eq!(LocalRequest::parse(&eval), LocalRequest::Eval("a:`x\ny`".into()));
    }

    #[test]
    fn test_unknown_escapes_are_kept() {
        assert_eq!(unescape_payload(r"a\tb\"), r"a\tb\");
    }
}
