//! Fuzz target for TOML settings parsing.
//!
//! Ensures that malformed TOML input doesn't cause panics, and that any
//! document that parses also survives validation.

#![no_main]

use ccai::Settings;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(settings) = toml::from_str::<Settings>(s) {
            let _ = settings.validate();
        }
    }
});
