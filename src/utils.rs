use chrono::{DateTime, Utc};

/// Renders a digest the way it goes into an `ETag` header: hex in quotes
pub fn quoted_digest(digest: &[u8]) -> String {
    format!("\"{}\"", hex::encode(digest))
}

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
