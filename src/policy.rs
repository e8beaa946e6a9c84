//! Institutional booking rules, checked on submission before conflict detection.

use serde::Serialize;

use crate::model::{DAY_MS, HOUR_MS, MINUTE_MS, Ms, TimeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "rule", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PolicyViolation {
    #[error("booking must start at least {} hours from now", .min_notice_ms / HOUR_MS)]
    TooSoon { min_notice_ms: Ms },
    #[error("booking cannot start more than {} days ahead", .max_advance_ms / DAY_MS)]
    TooFarAhead { max_advance_ms: Ms },
    #[error("booking must last at least {} minutes", .min_duration_ms / MINUTE_MS)]
    TooShort { min_duration_ms: Ms },
    #[error("booking cannot last more than {} hours", .max_duration_ms / HOUR_MS)]
    TooLong { max_duration_ms: Ms },
}

/// Each `None` disables that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub min_advance_notice: Option<Ms>,
    pub max_advance: Option<Ms>,
    pub min_duration: Option<Ms>,
    pub max_duration: Option<Ms>,
    /// Let the sweeper reject pending bookings whose start has passed.
    pub auto_reject_expired: bool,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            min_advance_notice: Some(24 * HOUR_MS),
            max_advance: Some(90 * DAY_MS),
            min_duration: Some(30 * MINUTE_MS),
            max_duration: Some(8 * HOUR_MS),
            auto_reject_expired: true,
        }
    }
}

impl BookingPolicy {
    pub fn unrestricted() -> Self {
        Self {
            min_advance_notice: None,
            max_advance: None,
            min_duration: None,
            max_duration: None,
            auto_reject_expired: false,
        }
    }

    /// First rule `range` breaks when requested at `now`.
    pub fn check(&self, range: &TimeRange, now: Ms) -> Result<(), PolicyViolation> {
        let lead = range.start() - now;
        if let Some(min_notice_ms) = self.min_advance_notice
            && lead < min_notice_ms {
                return Err(PolicyViolation::TooSoon { min_notice_ms });
            }
        if let Some(max_advance_ms) = self.max_advance
            && lead > max_advance_ms {
                return Err(PolicyViolation::TooFarAhead { max_advance_ms });
            }
        if let Some(min_duration_ms) = self.min_duration
            && range.duration_ms() < min_duration_ms {
                return Err(PolicyViolation::TooShort { min_duration_ms });
            }
        if let Some(max_duration_ms) = self.max_duration
            && range.duration_ms() > max_duration_ms {
                return Err(PolicyViolation::TooLong { max_duration_ms });
            }
        Ok(())
    }
}
