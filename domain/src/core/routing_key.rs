//! Routing key value object

use serde::{Deserialize, Serialize};

/// Opaque per-tenant identifier partitioning all relay state.
///
/// Produced by identity verification; the relay only hashes and compares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(s: &str) -> Self {
        RoutingKey::new(s)
    }
}

impl From<String> for RoutingKey {
    fn from(s: String) -> Self {
        RoutingKey(s)
    }
}
