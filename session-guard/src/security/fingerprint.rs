//! Request fingerprinting for session-hijack detection.
//!
//! A fingerprint is the hex SHA-256 of the client's user agent, language and
//! encoding preferences. It is captured when a token is issued and compared
//! on later requests carrying that token. The comparison is advisory: this
//! module only reports a match or mismatch and never rejects by itself.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Request headers that feed the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
}

impl RequestMetadata {
    pub fn new(
        user_agent: Option<&str>,
        accept_language: Option<&str>,
        accept_encoding: Option<&str>,
    ) -> Self {
        Self {
            user_agent: user_agent.map(String::from),
            accept_language: accept_language.map(String::from),
            accept_encoding: accept_encoding.map(String::from),
        }
    }
}

/// Derive the fingerprint digest for a request.
pub fn generate_fingerprint(meta: &RequestMetadata) -> String {
    let mut hasher = Sha256::new();
    // Newline separators keep ("ab", "c") distinct from ("a", "bc")
    for part in [&meta.user_agent, &meta.accept_language, &meta.accept_encoding] {
        hasher.update(part.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Compare a request against a stored fingerprint in constant time.
pub fn verify_fingerprint(meta: &RequestMetadata, stored: &str) -> bool {
    let current = generate_fingerprint(meta);
    if current.len() != stored.len() {
        return false;
    }
    current.as_bytes().ct_eq(stored.as_bytes()).into()
}
