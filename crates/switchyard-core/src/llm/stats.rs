//! Per-provider usage statistics.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Counters updated after every completed attempt.
///
/// Average latency is derived from the cumulative time, never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderStatistics {
    pub request_count: u64,
    pub error_count: u64,
    pub total_response_time: Duration,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProviderStatistics {
    /// Record one attempt that took `elapsed`.
    pub fn record(&mut self, elapsed: Duration, success: bool) {
        self.request_count += 1;
        if !success {
            self.error_count += 1;
        }
        self.total_response_time += elapsed;
        self.last_used_at = Some(Utc::now());
    }

    pub fn average_response_time(&self) -> Duration {
        if self.request_count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_response_time.as_nanos() / u128::from(self.request_count);
        Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
    }

    pub fn average_response_ms(&self) -> u64 {
        self.average_response_time().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = ProviderStatistics::default();
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.average_response_time(), Duration::ZERO);
        assert!(stats.last_used_at.is_none());
    }

    #[test]
    fn test_record_counts_and_average() {
        let mut stats = ProviderStatistics::default();
        stats.record(Duration::from_millis(100), true);
        stats.record(Duration::from_millis(300), false);

        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.total_response_time, Duration::from_millis(400));
        assert_eq!(stats.average_response_ms(), 200);
        assert!(stats.last_used_at.is_some());
    }
}
