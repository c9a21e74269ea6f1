//! Fuzz target for the request sanitizer.
//!
//! Feeds arbitrary bytes through the JSON, form and path cleaners and
//! checks that no operator key or raw markup survives.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_sanitize -- -max_total_time=60
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use shop_gateway::sanitize::{is_operator_key, sanitize_form, sanitize_path, sanitize_value};

fn assert_clean(value: &Value) {
    match value {
        Value::String(s) => assert!(!s.contains('<') && !s.contains('>')),
        Value::Array(items) => items.iter().for_each(assert_clean),
        Value::Object(map) => {
            for (key, value) in map {
                assert!(!is_operator_key(key), "operator key survived: {key}");
                assert_clean(value);
            }
        }
        _ => {}
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(mut value) = serde_json::from_str::<Value>(input) {
        sanitize_value(&mut value);
        assert_clean(&value);

        // A second pass finds nothing left to remove
        let again = sanitize_value(&mut value.clone());
        assert_eq!(again.removed_keys, 0);
    }

    let _ = sanitize_form(input);
    let _ = sanitize_path(input);
});
