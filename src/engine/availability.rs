use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::ledger::{peak_reserved, reserved_quantity};

// ── Previews ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueAvailability {
    pub venue_id: Ulid,
    pub available: bool,
    pub conflicting_booking_ids: Vec<Ulid>,
    /// Parts of the queried range no live booking holds.
    pub free_windows: Vec<TimeRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentAvailability {
    pub equipment_id: Ulid,
    pub name: String,
    pub category: Option<String>,
    pub total_quantity: u32,
    pub reserved: u32,
    pub available: u32,
}

/// Whether `range` on `venue` could be booked right now, with the same overlap
/// rule the conflict detector uses. An inactive venue is never available.
pub fn venue_availability(venue: &Venue, range: &TimeRange, live: &[Booking]) -> VenueAvailability {
    let mut holders: Vec<&Booking> = live
        .iter()
        .filter(|b| b.is_live() && b.venue_id == venue.id && b.range.overlaps(range))
        .collect();
    holders.sort_by_key(|b| b.range.start());

    let taken: Vec<TimeRange> = holders.iter().map(|b| b.range).collect();
    let free_windows = if venue.is_active {
        subtract_intervals(&[*range], &merge_overlapping(&taken))
    } else {
        Vec::new()
    };

    VenueAvailability {
        venue_id: venue.id,
        available: venue.is_active && holders.is_empty(),
        conflicting_booking_ids: holders.iter().map(|b| b.id).collect(),
        free_windows,
    }
}

/// Per-item summary for `range`, evaluated as a fresh candidate (nothing excluded).
pub fn equipment_availability<'a>(
    items: impl IntoIterator<Item = &'a Equipment>,
    range: &TimeRange,
    live: &[Booking],
) -> Vec<EquipmentAvailability> {
    items
        .into_iter()
        .map(|item| {
            let reserved = reserved_quantity(item.id, range, live, None);
            EquipmentAvailability {
                equipment_id: item.id,
                name: item.name.clone(),
                category: item.category.clone(),
                total_quantity: item.quantity,
                reserved,
                available: item.quantity.saturating_sub(reserved),
            }
        })
        .collect()
}

// ── Reports ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueUsage {
    pub venue_id: Ulid,
    pub name: String,
    pub pending: usize,
    pub approved: usize,
    pub completed: usize,
    pub rejected: usize,
    pub cancelled: usize,
    /// Time inside the window held by approved or completed bookings.
    pub booked_ms: Ms,
    /// `booked_ms` as a fraction of the window.
    pub utilization: f64,
    /// Full approval-time cost of every approved or completed booking
    /// overlapping the window, in cents.
    pub revenue: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentUsage {
    pub equipment_id: Ulid,
    pub name: String,
    pub total_quantity: u32,
    /// Pending, approved and completed bookings that asked for this item.
    pub bookings: usize,
    /// Most units held at one instant by those bookings.
    pub peak_reserved: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub window: TimeRange,
    pub venues: Vec<VenueUsage>,
    pub equipment: Vec<EquipmentUsage>,
}

/// Venue utilization and equipment usage for bookings overlapping `window`.
/// Completed bookings count here even though they no longer hold capacity.
pub fn usage_report(
    window: &TimeRange,
    venues: &[Venue],
    equipment: &[Equipment],
    bookings: &[Booking],
) -> UsageReport {
    let in_window: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.range.overlaps(window))
        .collect();

    let venues = venues
        .iter()
        .map(|v| {
            let mut usage = VenueUsage {
                venue_id: v.id,
                name: v.name.clone(),
                pending: 0,
                approved: 0,
                completed: 0,
                rejected: 0,
                cancelled: 0,
                booked_ms: 0,
                utilization: 0.0,
                revenue: 0,
            };
            for b in in_window.iter().filter(|b| b.venue_id == v.id) {
                match b.status {
                    BookingStatus::Pending => usage.pending += 1,
                    BookingStatus::Approved => usage.approved += 1,
                    BookingStatus::Completed => usage.completed += 1,
                    BookingStatus::Rejected => usage.rejected += 1,
                    BookingStatus::Cancelled => usage.cancelled += 1,
                }
                if matches!(b.status, BookingStatus::Approved | BookingStatus::Completed) {
                    usage.revenue = usage.revenue.saturating_add(b.total_cost.unwrap_or(0));
                    if let Some(clamped) = b.range.clamp_to(window) {
                        usage.booked_ms += clamped.duration_ms();
                    }
                }
            }
            usage.utilization = usage.booked_ms as f64 / window.duration_ms() as f64;
            usage
        })
        .collect();

    let counted: Vec<&Booking> = in_window
        .iter()
        .copied()
        .filter(|b| {
            matches!(
                b.status,
                BookingStatus::Pending | BookingStatus::Approved | BookingStatus::Completed
            )
        })
        .collect();

    let equipment = equipment
        .iter()
        .map(|item| EquipmentUsage {
            equipment_id: item.id,
            name: item.name.clone(),
            total_quantity: item.quantity,
            bookings: counted.iter().filter(|b| b.quantity_of(item.id) > 0).count(),
            peak_reserved: peak_reserved(item.id, window, counted.iter().copied()),
        })
        .collect();

    UsageReport {
        window: *window,
        venues,
        equipment,
    }
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<(Ms, Ms)> = Vec::new();
    for r in sorted {
        if let Some(last) = merged.last_mut()
            && r.start() <= last.1 {
                last.1 = last.1.max(r.end());
                continue;
            }
        merged.push((r.start(), r.end()));
    }
    merged
        .into_iter()
        .filter_map(|(s, e)| TimeRange::new(s, e).ok())
        .collect()
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for b in base {
        let mut current_start = b.start();
        let current_end = b.end();

        while ri < to_remove.len() && to_remove[ri].end() <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start() < current_end {
            let r = &to_remove[j];
            if r.start() > current_start
                && let Ok(piece) = TimeRange::new(current_start, r.start()) {
                    result.push(piece);
                }
            current_start = current_start.max(r.end());
            j += 1;
        }

        if let Ok(rest) = TimeRange::new(current_start, current_end) {
            result.push(rest);
        }
    }

    result
}
