use std::time::{SystemTime, UNIX_EPOCH};

/// Returns current wall-clock time as milliseconds since UNIX epoch.
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Validate an identifier: non-empty, at most 128 chars, alphanumeric,
/// dashes, underscores and dots only.
pub fn validate_identifier(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("identifier must not be empty");
    }
    if value.len() > 128 {
        return Err("identifier must be at most 128 characters");
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err("identifier must contain only alphanumeric, dashes, underscores, dots");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_common_forms() {
        assert!(validate_identifier("s1").is_ok());
        assert!(validate_identifier("edge-router_01.dc2").is_ok());
    }

    #[test]
    fn identifier_rejects_bad_forms() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("has space").is_err());
        assert!(validate_identifier("slash/id").is_err());
        assert!(validate_identifier(&"x".repeat(129)).is_err());
    }

    #[test]
    fn timestamp_is_after_2020() {
        assert!(current_timestamp_ms() > 1_577_836_800_000);
    }
}
