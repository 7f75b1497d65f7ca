//! Shared utility functions used across multiple modules.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix given to resource ids generated locally before the server assigns one.
pub const TEMP_ID_PREFIX: &str = "local-";

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Whether a resource id was generated locally and is awaiting a server id.
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// SHA-256 of the JSON encoding of `value`, hex encoded.
///
/// `serde_json` keeps object keys sorted, so equal documents hash equally.
pub fn checksum_json(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" Patient ".to_string())),
            Some("Patient".to_string())
        );
    }

    #[test]
    fn compact_text_limits_length() {
        let long = "x".repeat(500);
        assert_eq!(compact_text(&long).len(), 180);
        assert_eq!(compact_text("  short  "), "short");
    }

    #[test]
    fn temporary_ids_are_detected_by_prefix() {
        assert!(is_temporary_id("local-0190"));
        assert!(!is_temporary_id("123"));
    }

    #[test]
    fn checksum_ignores_key_order() {
        let a = json!({"a": 1, "b": [1, 2]});
        let b = json!({"b": [1, 2], "a": 1});
        assert_eq!(checksum_json(&a), checksum_json(&b));
        assert_ne!(checksum_json(&a), checksum_json(&json!({"a": 2, "b": [1, 2]})));
    }
}
