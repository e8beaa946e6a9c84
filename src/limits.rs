use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// No single booking may span more than a year, regardless of policy.
pub const MAX_RANGE_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_EQUIPMENT_LINES: usize = 64;
pub const MAX_EXPECTED_ATTENDEES: u32 = 100_000;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_REASON_LEN: usize = 2_000;
pub const MAX_NOTES_LEN: usize = 2_000;

pub const MAX_VENUES: usize = 10_000;
pub const MAX_EQUIPMENT_ITEMS: usize = 100_000;
pub const MAX_EQUIPMENT_QUERY: usize = 1_000;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest single WAL record payload; anything bigger on replay is treated as corruption.
pub const MAX_WAL_RECORD_LEN: usize = 16 * 1024 * 1024;
