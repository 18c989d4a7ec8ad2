//! Server-directed wait hints parsed from response headers.
//!
//! Used by [`crate::retry::Backoff::RetryAfter`] to wait exactly as long as a
//! throttling server asks before the next attempt.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RESET_HEADERS: [&str; 2] = ["x-ratelimit-reset", "ratelimit-reset"];

/// Rate limit hints extracted from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// How long to wait before retrying (`Retry-After`, seconds or HTTP date).
    pub retry_after: Option<Duration>,

    /// When the rate limit window resets (`X-RateLimit-Reset` or
    /// `RateLimit-Reset`, Unix seconds).
    pub reset_at: Option<SystemTime>,

    /// Requests remaining in the current window (`X-RateLimit-Remaining`).
    pub remaining: Option<u64>,
}

impl RateLimitInfo {
    /// Parses all known hint headers; unparseable values are ignored.
    ///
    /// ```
    /// use relay_http::rate_limit::RateLimitInfo;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "60".parse().unwrap());
    ///
    /// let info = RateLimitInfo::from_headers(&headers);
    /// assert_eq!(info.retry_after, Some(Duration::from_secs(60)));
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: header_str(headers, "retry-after").and_then(parse_retry_after),
            reset_at: RESET_HEADERS
                .iter()
                .find_map(|name| header_str(headers, name).and_then(parse_unix_seconds)),
            remaining: header_str(headers, "x-ratelimit-remaining")
                .and_then(|v| v.trim().parse().ok()),
        }
    }

    /// The wait the server asked for, capped at `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp; a reset time already in
    /// the past yields `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }
        let until_reset = self.reset_at?.duration_since(SystemTime::now()).ok()?;
        Some(until_reset.min(max_wait))
    }

    /// `true` if the server signalled throttling.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after.is_some() || self.remaining == Some(0)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    httpdate::parse_http_date(value)
        .ok()?
        .duration_since(SystemTime::now())
        .ok()
}

fn parse_unix_seconds(value: &str) -> Option<SystemTime> {
    let seconds = value.trim().parse::<u64>().ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_retry_after_seconds_and_cap() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("600"));

        let info = RateLimitInfo::from_headers(&headers);
        assert!(info.is_rate_limited());
        assert_eq!(info.delay(Duration::from_secs(300)), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_retry_after_http_date() {
        let when = SystemTime::now() + Duration::from_secs(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_str(&httpdate::fmt_http_date(when)).unwrap(),
        );

        let delay = RateLimitInfo::from_headers(&headers)
            .delay(Duration::from_secs(300))
            .unwrap();
        assert!(delay > Duration::from_secs(25) && delay <= Duration::from_secs(30));
    }

    #[test]
    fn test_reset_header_fallback_order() {
        let future = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 120;
        let mut headers = HeaderMap::new();
        headers.insert(
            "ratelimit-reset",
            HeaderValue::from_str(&future.to_string()).unwrap(),
        );
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));

        let info = RateLimitInfo::from_headers(&headers);
        assert!(info.reset_at.is_some());
        assert!(info.is_rate_limited());
        assert!(info.delay(Duration::from_secs(300)).unwrap() > Duration::from_secs(100));
    }

    #[test]
    fn test_no_hints() {
        let info = RateLimitInfo::from_headers(&HeaderMap::new());
        assert_eq!(info, RateLimitInfo::default());
        assert_eq!(info.delay(Duration::from_secs(1)), None);
    }
}
