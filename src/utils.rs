use chrono::{DateTime, Utc};

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Parses a server timestamp. Accepts RFC 3339 strings or unix milliseconds;
/// anything else falls back to the epoch so ordering stays total.
pub fn parse_timestamp(value: &serde_json::Value) -> DateTime<Utc> {
    if let Some(text) = value.as_str() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return parsed.with_timezone(&Utc);
        }
    }
    if let Some(millis) = value.as_i64() {
        if let Some(parsed) = DateTime::from_timestamp_millis(millis) {
            return parsed;
        }
    }
    DateTime::UNIX_EPOCH
}
