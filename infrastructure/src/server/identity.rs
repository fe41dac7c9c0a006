//! Static token table implementing [`IdentityVerifier`].

use eye_application::ports::identity::IdentityVerifier;
use eye_domain::RoutingKey;
use std::collections::HashMap;

/// Maps pre-shared session tokens to users. Token issuance lives elsewhere.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, RoutingKey>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token, RoutingKey::new(user)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<RoutingKey> {
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let verifier = StaticTokenVerifier::new([("s3cret".to_string(), "alice".to_string())]);
        assert_eq!(verifier.verify("s3cret"), Some(RoutingKey::from("alice")));
        assert_eq!(verifier.verify("nope"), None);
        assert_eq!(verifier.verify(""), None);
    }
}
