//! Fuzz target for access and refresh token verification
//!
//! Verification runs on attacker-controlled cookies and headers before any
//! other check: it must never panic and must never accept forged input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use session_guard::config::TokenConfig;
use session_guard::token::TokenService;
use std::time::Duration;

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    let service = TokenService::new(&TokenConfig {
        access_secret: "fuzz-access-secret".to_string(),
        refresh_secret: "fuzz-refresh-secret".to_string(),
        access_ttl: Duration::from_secs(900),
        refresh_ttl: Duration::from_secs(86_400),
        leeway_secs: 0,
    });

    // Nothing the fuzzer produces carries a valid HMAC
    assert!(service.verify_access(token).is_err());
    assert!(service.verify_refresh(token).is_err());
});
