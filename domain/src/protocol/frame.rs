//! Request/reply framing shared by every transport.
//!
//! A frame is a single line of text. Callers submit either a bare
//! `expression` (fire-and-forget) or `id:expression`; the evaluator answers
//! `id:result` or `id!:error`. Anything whose prefix before the first colon
//! is not a valid [`RequestId`] is treated as unstructured text.

use serde::{Deserialize, Serialize};

/// Longest accepted request ID, in bytes.
pub const MAX_ID_LEN: usize = 19;

/// Caller-chosen correlation token: `[A-Za-z0-9_]{1,19}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Validate `raw` against the ID grammar.
    pub fn parse(raw: &str) -> Option<Self> {
        if is_valid_id(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Build a relay-generated ID from a short prefix and a counter, e.g. `m1f`.
    ///
    /// The counter is rendered in hex so any `u64` fits the length limit
    /// behind a prefix of up to three characters.
    pub fn sequenced(prefix: &str, n: u64) -> Option<Self> {
        Self::parse(&format!("{prefix}{n:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RequestId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_id(&value) {
            Ok(Self(value))
        } else {
            Err(format!("invalid request id: {value}"))
        }
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

fn is_valid_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// What a caller sent towards the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// No ID prefix: forwarded, nothing is waited for.
    Fire(String),
    /// `id:expression`: a reply is expected under `id`.
    Request { id: RequestId, expression: String },
}

impl Submission {
    /// Classify a raw caller frame.
    pub fn parse(frame: &str) -> Self {
        if let Some((prefix, expression)) = frame.split_once(':')
            && let Some(id) = RequestId::parse(prefix)
        {
            return Submission::Request {
                id,
                expression: expression.to_string(),
            };
        }
        Submission::Fire(frame.to_string())
    }

    /// The correlation ID, if the caller expects a reply.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Submission::Fire(_) => None,
            Submission::Request { id, .. } => Some(id),
        }
    }

    pub fn expression(&self) -> &str {
        match self {
            Submission::Fire(expression) | Submission::Request { expression, .. } => expression,
        }
    }

    /// Render back to wire form.
    pub fn encode(&self) -> String {
        match self {
            Submission::Fire(expression) => expression.clone(),
            Submission::Request { id, expression } => format!("{id}:{expression}"),
        }
    }
}

/// Success or failure marker of a structured reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    Failure,
}

/// A frame coming back from the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `id:payload` or `id!:payload`.
    Structured {
        id: RequestId,
        status: ReplyStatus,
        payload: String,
    },
    /// Anything else; only eligible for broadcast.
    Unstructured(String),
}

impl Reply {
    /// Classify an evaluator frame; one trailing `!` on the prefix marks failure.
    pub fn parse(frame: &str) -> Self {
        if let Some((prefix, payload)) = frame.split_once(':') {
            let (raw_id, status) = match prefix.strip_suffix('!') {
                Some(stripped) => (stripped, ReplyStatus::Failure),
                None => (prefix, ReplyStatus::Success),
            };
            if let Some(id) = RequestId::parse(raw_id) {
                return Reply::Structured {
                    id,
                    status,
                    payload: payload.to_string(),
                };
            }
        }
        Reply::Unstructured(frame.to_string())
    }

    pub fn success(id: RequestId, payload: impl Into<String>) -> Self {
        Reply::Structured {
            id,
            status: ReplyStatus::Success,
            payload: payload.into(),
        }
    }

    pub fn failure(id: RequestId, payload: impl Into<String>) -> Self {
        Reply::Structured {
            id,
            status: ReplyStatus::Failure,
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Reply::Structured { id, .. } => Some(id),
            Reply::Unstructured(_) => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Reply::Structured {
                id,
                status: ReplyStatus::Success,
                payload,
            } => format!("{id}:{payload}"),
            Reply::Structured {
                id,
                status: ReplyStatus::Failure,
                payload,
            } => format!("{id}!:{payload}"),
            Reply::Unstructured(raw) => raw.clone(),
        }
    }
}
