//! Identity verification port
//!
//! Token issuance and validation belong to an external collaborator; the
//! relay only needs the routing key a token maps to.

use eye_domain::RoutingKey;

pub trait IdentityVerifier: Send + Sync {
    /// Resolve a session token to its routing key, or `None` if invalid.
    fn verify(&self, token: &str) -> Option<RoutingKey>;
}
