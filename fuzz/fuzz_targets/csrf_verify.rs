//! Fuzz target for CSRF token verification
//!
//! Header and cookie values are client-controlled. Verification must never
//! panic, and in server mode must only succeed for the token actually issued.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use session_guard::config::CsrfStorage;
use session_guard::security::{CsrfCheck, CsrfGuard};
use session_guard::{GuardConfig, MemoryStore};
use std::sync::Arc;

#[derive(Arbitrary, Debug)]
struct FuzzCsrfInput {
    cookie_mode: bool,
    method: String,
    header_token: Option<String>,
    cookie_token: Option<String>,
}

fuzz_target!(|input: FuzzCsrfInput| {
    let mut config = GuardConfig::new("fuzz-access", "fuzz-refresh");
    if input.cookie_mode {
        config.csrf.storage = CsrfStorage::Cookie;
    }
    let guard = CsrfGuard::new(&config, Arc::new(MemoryStore::new()));
    let Ok(Some(issued)) = guard.issue("sess-fuzz") else {
        return;
    };

    let check = CsrfCheck {
        method: &input.method,
        path: "/api/projects",
        session_id: Some("sess-fuzz"),
        header_token: input.header_token.as_deref(),
        cookie_token: input.cookie_token.as_deref(),
    };

    let verified = guard.verify(&check).is_ok();

    // Cookie mode compares two client values; only server mode binds to the issued token
    if verified && !input.cookie_mode && guard.requires_check(&input.method, "/api/projects") {
        let presented = input.header_token.as_deref().map(|t| t.trim_end_matches('='));
        assert_eq!(presented, Some(issued.as_str()));
    }
});
