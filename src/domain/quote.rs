//! Cache keys for brokerage quote lookups
//!
//! A key combines the symbol with a coarse time bucket so that bursts of
//! near-simultaneous lookups share one cached response: live quotes bucket
//! per minute, daily bars per trading day.

use chrono::NaiveDateTime;

/// Semantic cache key for a queued brokerage call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey(String);

impl QuoteKey {
    /// Live quote, bucketed per minute
    pub fn current(symbol: &str, now: NaiveDateTime) -> Self {
        Self(format!("current:{symbol}:{}", now.format("%Y%m%d%H%M")))
    }

    /// Daily bars, bucketed per calendar day
    pub fn daily(symbol: &str, now: NaiveDateTime) -> Self {
        Self(format!("daily:{symbol}:{}", now.format("%Y%m%d")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn current_buckets_per_minute() {
        let a = QuoteKey::current("005930", at(10, 30, 5));
        let b = QuoteKey::current("005930", at(10, 30, 59));
        let c = QuoteKey::current("005930", at(10, 31, 0));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "current:005930:202503141030");
    }

    #[test]
    fn daily_buckets_per_day() {
        let a = QuoteKey::daily("005930", at(9, 0, 0));
        let b = QuoteKey::daily("005930", at(15, 29, 59));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "daily:005930:20250314");
    }

    #[test]
    fn symbols_do_not_collide() {
        assert_ne!(
            QuoteKey::current("005930", at(10, 30, 0)),
            QuoteKey::current("000660", at(10, 30, 0))
        );
    }
}
