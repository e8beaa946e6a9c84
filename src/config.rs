use std::path::PathBuf;
use std::time::Duration;

use crate::model::{DAY_MS, HOUR_MS, MINUTE_MS, Ms};
use crate::passcode::DEFAULT_PASS_CODE_PREFIX;
use crate::policy::BookingPolicy;

pub const WAL_FILE_NAME: &str = "venuebook.wal";

/// Server settings, read from `VENUEBOOK_*` environment variables.
/// Missing or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub pass_code_prefix: String,
    pub policy: BookingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let text = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let defaults = BookingPolicy::default();
        // A rule reads "off" (or 0 for the upper bounds) to disable it.
        // Negative or overflowing values count as garbage.
        let window = |key: &str, unit: Ms, default: Option<Ms>| match lookup(key) {
            Some(s) if s.trim().eq_ignore_ascii_case("off") => None,
            Some(s) => s
                .trim()
                .parse::<Ms>()
                .ok()
                .filter(|n| *n >= 0)
                .and_then(|n| n.checked_mul(unit))
                .map_or(default, Some),
            None => default,
        };

        let policy = BookingPolicy {
            min_advance_notice: window("VENUEBOOK_MIN_ADVANCE_NOTICE_HOURS", HOUR_MS, defaults.min_advance_notice),
            max_advance: window("VENUEBOOK_MAX_ADVANCE_DAYS", DAY_MS, defaults.max_advance)
                .filter(|ms| *ms > 0),
            min_duration: window("VENUEBOOK_MIN_DURATION_MINUTES", MINUTE_MS, defaults.min_duration),
            max_duration: window("VENUEBOOK_MAX_DURATION_HOURS", HOUR_MS, defaults.max_duration)
                .filter(|ms| *ms > 0),
            auto_reject_expired: lookup("VENUEBOOK_AUTO_REJECT_EXPIRED")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.auto_reject_expired),
        };

        Self {
            port: parsed("VENUEBOOK_PORT")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(7480),
            bind: text("VENUEBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: text("VENUEBOOK_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            max_connections: parsed("VENUEBOOK_MAX_CONNECTIONS")
                .map_or(256, |n| n as usize)
                .max(1),
            compact_threshold: parsed("VENUEBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed("VENUEBOOK_METRICS_PORT").and_then(|p| u16::try_from(p).ok()),
            sweep_interval: Duration::from_secs(
                parsed("VENUEBOOK_SWEEP_INTERVAL_SECS").unwrap_or(60).max(1),
            ),
            pass_code_prefix: text("VENUEBOOK_PASS_CODE_PREFIX")
                .unwrap_or_else(|| DEFAULT_PASS_CODE_PREFIX.into()),
            policy,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
