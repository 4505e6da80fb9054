//! Secure session ID and secret generation.
//!
//! Session IDs correlate a login or refresh with its audit trail and key
//! the per-session CSRF secret. They must be unique and unpredictable.
//!
//! ## Format
//!
//! Session IDs use the format: `{prefix}-{timestamp_hex}-{random_hex}`
//!
//! Example: `sess-18d4f2a3b4c-a7f3e2d1c0b9a8f7c6d5e4f3a2b1c0d9e8`
//!
//! - `prefix`: identifies the issuing flow
//! - `timestamp_hex`: nanosecond timestamp for ordering and debugging
//! - `random_hex`: 128 bits of cryptographic randomness

use std::time::{SystemTime, UNIX_EPOCH};

const SESSION_PREFIX: &str = "sess";

/// Random bytes in a session ID
const SESSION_RANDOM_BYTES: usize = 16;

/// Generate a session ID for a new login or refresh.
pub fn generate_session_id() -> String {
    generate_prefixed_id(SESSION_PREFIX)
}

/// Generate a prefixed, time-ordered, unpredictable identifier.
///
/// # Example
///
/// ```
/// use session_guard::security::session::generate_prefixed_id;
///
/// let id = generate_prefixed_id("sess");
/// assert!(id.starts_with("sess-"));
/// ```
pub fn generate_prefixed_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let random: [u8; SESSION_RANDOM_BYTES] = generate_secret();

    format!("{}-{:x}-{}", prefix, timestamp, hex::encode(random))
}

/// Fill an array with CSPRNG output.
///
/// # Panics
///
/// Panics if the operating system RNG fails. Predictable session IDs or
/// CSRF secrets would silently defeat the guards, so no fallback exists.
pub fn generate_secret<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).expect(
        "secure random number generation failed - \
         system may be misconfigured or compromised",
    );
    bytes
}
