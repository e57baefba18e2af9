pub mod persistence;

use time::OffsetDateTime;

/// Current wall-clock time as unix seconds.
///
/// All durable records carry unix-second timestamps; expiry logic takes an
/// explicit `now` so tests can advance virtual time.
pub fn now_unix() -> u64 {
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    if ts < 0 {
        0
    } else {
        ts as u64
    }
}

/// Mint a fresh id for sessions, results and notifications.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Human-readable age string for an elapsed number of seconds.
pub fn age_string(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
