use crate::twitter::RateLimitHeaders;
use chrono::{DateTime, Timelike, Utc};

/// Tracks the retweet endpoint's quota as reported by Twitter. The handler
/// never counts requests itself; every value comes from the
/// `x-rate-limit-*` response headers. Written only by the dispatch path on
/// the stream consumer task.
#[derive(Debug, Clone)]
pub struct RetweetLimitHandler {
    populated: bool,
    pub remaining: i64,
    pub limit: i64,
    pub reset_time: DateTime<Utc>,
}

impl RetweetLimitHandler {
    pub fn new() -> Self {
        RetweetLimitHandler {
            populated: false,
            remaining: -1,
            limit: 0,
            reset_time: Utc::now(),
        }
    }

    /// Whether any response has ever carried quota information into this
    /// handler.
    pub fn populated(&self) -> bool {
        self.populated
    }

    /// True once Twitter has told us the window is spent and the reset time
    /// has not yet passed. Before the first `update_limits` call this is
    /// always false, so the very first retweet attempt goes through.
    pub fn is_limit_exceeded(&self) -> bool {
        self.populated && self.remaining == 0 && self.reset_time > Utc::now()
    }

    /// Apply whatever subset of the three quota headers the response
    /// carried. A missing header leaves the previous value untouched; a
    /// present header is applied even when it says zero.
    pub fn update_limits(&mut self, headers: &RateLimitHeaders) {
        self.populated = true;
        if let Some(remaining) = headers.remaining {
            self.remaining = remaining;
        }
        if let Some(reset) = headers.reset {
            if let Some(reset_time) = DateTime::from_timestamp(reset, 0) {
                self.reset_time = reset_time;
            }
        }
        if let Some(limit) = headers.limit {
            self.limit = limit;
        }
    }

    /// Whole seconds until the reset timestamp; negative once the reset has
    /// already passed.
    pub fn seconds_until_reset(&self) -> i64 {
        let reset_time = self
            .reset_time
            .with_nanosecond(0)
            .unwrap_or(self.reset_time);
        (reset_time - Utc::now()).num_seconds()
    }
}

impl Default for RetweetLimitHandler {
    fn default() -> Self {
        Self::new()
    }
}
