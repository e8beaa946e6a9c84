//! Quantity accounting for pooled equipment.
//!
//! Nothing here caches: every answer is derived from the bookings passed in,
//! so a caller holding the right locks always sees the current picture.

use ulid::Ulid;

use crate::model::*;

/// Units of `equipment_id` committed by live bookings overlapping `candidate`.
///
/// Non-live bookings and `exclude` (the booking being re-validated) are skipped,
/// so callers may pass an unfiltered slice.
pub fn reserved_quantity<'a>(
    equipment_id: Ulid,
    candidate: &TimeRange,
    bookings: impl IntoIterator<Item = &'a Booking>,
    exclude: Option<Ulid>,
) -> u32 {
    bookings
        .into_iter()
        .filter(|b| b.is_live())
        .filter(|b| Some(b.id) != exclude)
        .filter(|b| b.range.overlaps(candidate))
        .map(|b| b.quantity_of(equipment_id))
        .fold(0u32, u32::saturating_add)
}

/// `max(0, total - reserved)`.
pub fn available_quantity<'a>(
    equipment_id: Ulid,
    candidate: &TimeRange,
    total: u32,
    bookings: impl IntoIterator<Item = &'a Booking>,
    exclude: Option<Ulid>,
) -> u32 {
    total.saturating_sub(reserved_quantity(equipment_id, candidate, bookings, exclude))
}

/// Highest number of units of `equipment_id` held at any single instant inside
/// `window`. Unlike [`reserved_quantity`] this counts every booking it is given,
/// whatever its status; reports decide which statuses matter.
pub fn peak_reserved<'a>(
    equipment_id: Ulid,
    window: &TimeRange,
    bookings: impl IntoIterator<Item = &'a Booking>,
) -> u32 {
    // Sweep line: +q at start, -q at end, ends sort before starts at the same instant.
    let mut events: Vec<(Ms, i64)> = Vec::new();
    for b in bookings {
        let q = b.quantity_of(equipment_id);
        if q == 0 {
            continue;
        }
        let Some(clamped) = b.range.clamp_to(window) else {
            continue;
        };
        events.push((clamped.start(), q as i64));
        events.push((clamped.end(), -(q as i64)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut level: i64 = 0;
    let mut peak: i64 = 0;
    for (_, delta) in events {
        level += delta;
        peak = peak.max(level);
    }
    peak.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const H: Ms = HOUR_MS;

    fn range(start: Ms, end: Ms) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    fn booking_with(eq: Ulid, qty: u32, r: TimeRange, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            organizer_id: Ulid::new(),
            venue_id: Ulid::new(),
            range: r,
            expected_attendees: 1,
            title: None,
            equipment: vec![EquipmentLine { equipment_id: eq, quantity: qty }],
            status,
            rejection_reason: None,
            admin_notes: None,
            pass_code: None,
            total_cost: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn pooling_conservation() {
        let mic = Ulid::new();
        let live = vec![
            booking_with(mic, 4, range(9 * H, 12 * H), BookingStatus::Approved),
            booking_with(mic, 3, range(10 * H, 13 * H), BookingStatus::Pending),
        ];
        assert_eq!(reserved_quantity(mic, &range(9 * H, 13 * H), &live, None), 7);
        assert_eq!(available_quantity(mic, &range(9 * H, 13 * H), 10, &live, None), 3);
        assert_eq!(available_quantity(mic, &range(14 * H, 15 * H), 10, &live, None), 10);
    }

    #[test]
    fn non_live_bookings_reserve_nothing() {
        let mic = Ulid::new();
        let r = range(0, H);
        let bookings: Vec<_> = [
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ]
        .into_iter()
        .map(|s| booking_with(mic, 5, r, s))
        .collect();
        assert_eq!(reserved_quantity(mic, &r, &bookings, None), 0);
    }

    #[test]
    fn exclude_skips_own_reservation() {
        let mic = Ulid::new();
        let own = booking_with(mic, 5, range(0, H), BookingStatus::Pending);
        let live = vec![own.clone()];
        assert_eq!(available_quantity(mic, &own.range, 5, &live, None), 0);
        assert_eq!(available_quantity(mic, &own.range, 5, &live, Some(own.id)), 5);
    }

    #[test]
    fn touching_bookings_do_not_reserve() {
        let mic = Ulid::new();
        let live = vec![booking_with(mic, 5, range(9 * H, 10 * H), BookingStatus::Approved)];
        assert_eq!(available_quantity(mic, &range(10 * H, 11 * H), 5, &live, None), 5);
    }

    #[test]
    fn over_committed_equipment_clamps_to_zero() {
        let mic = Ulid::new();
        let live = vec![booking_with(mic, 8, range(0, H), BookingStatus::Approved)];
        // Inventory shrank after the booking was made.
        assert_eq!(available_quantity(mic, &range(0, H), 5, &live, None), 0);
    }

    #[test]
    fn other_equipment_ignored() {
        let mic = Ulid::new();
        let live = vec![booking_with(Ulid::new(), 5, range(0, H), BookingStatus::Approved)];
        assert_eq!(reserved_quantity(mic, &range(0, H), &live, None), 0);
    }

    #[test]
    fn peak_counts_concurrency_not_sum() {
        let mic = Ulid::new();
        let bookings = vec![
            booking_with(mic, 4, range(9 * H, 10 * H), BookingStatus::Completed),
            booking_with(mic, 3, range(10 * H, 11 * H), BookingStatus::Approved),
            booking_with(mic, 2, range(10 * H, 12 * H), BookingStatus::Approved),
        ];
        let window = range(8 * H, 13 * H);
        assert_eq!(peak_reserved(mic, &window, &bookings), 5);
        assert_eq!(peak_reserved(mic, &range(11 * H, 13 * H), &bookings), 2);
        assert_eq!(peak_reserved(mic, &range(20 * H, 21 * H), &bookings), 0);
    }

    proptest! {
        #[test]
        fn available_never_exceeds_total(
            total in 0u32..50,
            spans in prop::collection::vec((0i64..100, 1i64..50, 1u32..10), 0..20),
        ) {
            let mic = Ulid::new();
            let bookings: Vec<_> = spans
                .iter()
                .map(|(s, l, q)| booking_with(mic, *q, range(*s, s + l), BookingStatus::Pending))
                .collect();
            let candidate = range(20, 60);
            let avail = available_quantity(mic, &candidate, total, &bookings, None);
            let reserved = reserved_quantity(mic, &candidate, &bookings, None);
            prop_assert!(avail <= total);
            prop_assert_eq!(avail, total.saturating_sub(reserved));
            prop_assert!(peak_reserved(mic, &candidate, &bookings) <= reserved);
        }
    }
}
