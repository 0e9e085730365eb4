//! Unix-second clock helpers used for every expiry in the engine.

use chrono::Utc;

pub const FIVE_MINUTES: i64 = 5 * 60;
pub const ONE_DAY: i64 = 24 * 60 * 60;
pub const SEVEN_DAYS: i64 = 7 * ONE_DAY;
pub const THIRTY_DAYS: i64 = 30 * ONE_DAY;

/// Current time in unix seconds.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Absolute expiry `ttl_secs` from now.
pub fn calculate_expiry(ttl_secs: i64) -> i64 {
    now() + ttl_secs
}

/// A record is expired once its deadline lies strictly in the past.
pub fn is_expired(expiry: i64) -> bool {
    expiry < now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_in_the_future() {
        let expiry = calculate_expiry(FIVE_MINUTES);
        assert!(expiry > now());
        assert!(!is_expired(expiry));
    }

    #[test]
    fn past_deadline_is_expired() {
        assert!(is_expired(now() - 1));
        assert!(!is_expired(now() + 1));
    }
}
