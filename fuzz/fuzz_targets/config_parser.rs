//! Fuzz target for YAML configuration parsing
//!
//! Tests the robustness of config file parsing and validation against
//! malformed YAML.

#![no_main]

use libfuzzer_sys::fuzz_target;
use session_guard::GuardConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(yaml) = std::str::from_utf8(data) {
        if let Ok(config) = GuardConfig::from_yaml(yaml) {
            // Anything that parses must also pass validation
            assert!(config.validate().is_ok());
            assert!(!config.tokens.access_secret.is_empty());
        }
    }
});
