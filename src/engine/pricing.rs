//! Booking prices. A booking's cost is fixed once, at approval, from the
//! catalog rates in force at that moment.

use crate::model::*;

use super::conflict::Inventory;

/// Venue time at its hourly rate, prorated to the millisecond and rounded to
/// the nearest cent, plus every equipment line at its per-unit rate.
/// An item without a rate, or missing from the inventory, costs nothing.
pub fn booking_cost(request: &BookingRequest, inventory: &Inventory) -> Cents {
    let venue = inventory
        .venue(&request.venue_id)
        .and_then(|v| v.hourly_rate)
        .map_or(0, |rate| prorate(rate, request.range.duration_ms()));
    request.equipment.iter().fold(venue, |total, line| {
        let rate = inventory
            .equipment(&line.equipment_id)
            .and_then(|e| e.rental_rate)
            .unwrap_or(0);
        total.saturating_add(rate.saturating_mul(Cents::from(line.quantity)))
    })
}

fn prorate(hourly: Cents, duration: Ms) -> Cents {
    let hour = HOUR_MS as u128;
    let cents = (u128::from(hourly) * duration.max(0) as u128 + hour / 2) / hour;
    Cents::try_from(cents).unwrap_or(Cents::MAX)
}
