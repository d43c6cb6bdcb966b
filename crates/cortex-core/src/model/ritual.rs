//! Ritual.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RitualType {
    Pruning,
    Compression,
    Optimization,
    Evolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RitualFrequency {
    Hourly,
    Daily,
    Weekly,
}

impl RitualFrequency {
    /// Base interval until the next run.
    pub fn base_interval(self) -> chrono::Duration {
        match self {
            RitualFrequency::Hourly => chrono::Duration::hours(1),
            RitualFrequency::Daily => chrono::Duration::days(1),
            RitualFrequency::Weekly => chrono::Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RitualStatus {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RitualMetadata {
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ritual {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RitualType,
    pub frequency: RitualFrequency,
    pub status: RitualStatus,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: RitualMetadata,
}

/// Exponential backoff on top of the frequency's base interval, applied once
/// a ritual has failed at least once:
/// `backoff(n) = min(base, 2^(n-1) * 10min)` for `n >= 1`.
pub fn backoff(base: chrono::Duration, failure_count: u32) -> chrono::Duration {
    if failure_count == 0 {
        return chrono::Duration::zero();
    }
    let ten_min = chrono::Duration::minutes(10);
    let exp = i32::try_from(2u64.saturating_pow(failure_count.saturating_sub(1).min(32))).unwrap_or(i32::MAX);
    match ten_min.checked_mul(exp) {
        Some(scaled) => scaled.min(base),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_zero_with_no_failures() {
        assert_eq!(backoff(chrono::Duration::hours(1), 0), chrono::Duration::zero());
    }

    #[test]
    fn backoff_grows_exponentially_then_caps_at_base() {
        let base = chrono::Duration::hours(1);
        assert_eq!(backoff(base, 1), chrono::Duration::minutes(10));
        assert_eq!(backoff(base, 2), chrono::Duration::minutes(20));
        assert_eq!(backoff(base, 3), chrono::Duration::minutes(40));
        // 2^(7-1)*10min = 640min > 60min base -> capped
        assert_eq!(backoff(base, 7), base);
    }
}
