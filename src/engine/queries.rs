use std::collections::HashSet;

use serde::Deserialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{
    equipment_availability, usage_report, venue_availability, EquipmentAvailability,
    UsageReport, VenueAvailability,
};
use super::conflict::validate_range;
use super::{Engine, EngineError};

/// All fields optional; an empty filter lists every booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingFilter {
    pub organizer_id: Option<Ulid>,
    pub venue_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    /// Bookings overlapping this range.
    pub range: Option<TimeRange>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.organizer_id.is_none_or(|id| b.organizer_id == id)
            && self.venue_id.is_none_or(|id| b.venue_id == id)
            && self.status.is_none_or(|s| b.status == s)
            && self.range.is_none_or(|r| b.range.overlaps(&r))
    }
}

impl Engine {
    pub fn get_venue(&self, id: &Ulid) -> Option<Venue> {
        self.venues.get(id).map(|v| v.value().clone())
    }

    pub fn get_equipment(&self, id: &Ulid) -> Option<Equipment> {
        self.equipment.get(id).map(|e| e.value().clone())
    }

    /// Sorted by name.
    pub fn list_venues(&self) -> Vec<Venue> {
        let mut out: Vec<Venue> = self.venues.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Sorted by name. `venue_id` narrows to items kept at that venue.
    pub fn list_equipment(&self, venue_id: Option<Ulid>) -> Vec<Equipment> {
        let mut out: Vec<Equipment> = self
            .equipment
            .iter()
            .filter(|e| venue_id.is_none() || e.venue_id == venue_id)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.value().clone())
    }

    /// Sorted by start, then id.
    pub fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| filter.matches(b.value()))
            .map(|b| b.value().clone())
            .collect();
        out.sort_by(|a, b| a.range.start().cmp(&b.range.start()).then(a.id.cmp(&b.id)));
        out
    }

    /// Live bookings on one resource's schedule overlapping `range`.
    async fn live_on(&self, resource_id: Ulid, range: &TimeRange) -> Result<Vec<Booking>, EngineError> {
        let schedule = self
            .schedule(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = schedule.lock().await;
        Ok(guard
            .overlapping(range)
            .filter_map(|r| self.bookings.get(&r.booking_id).map(|b| b.value().clone()))
            .collect())
    }

    pub async fn venue_availability(
        &self,
        venue_id: Ulid,
        range: TimeRange,
    ) -> Result<VenueAvailability, EngineError> {
        validate_range(&range)?;
        let venue = self.get_venue(&venue_id).ok_or(EngineError::NotFound(venue_id))?;
        let live = self.live_on(venue_id, &range).await?;
        Ok(venue_availability(&venue, &range, &live))
    }

    /// `ids` empty means every item in the catalog.
    pub async fn equipment_availability(
        &self,
        ids: &[Ulid],
        range: TimeRange,
    ) -> Result<Vec<EquipmentAvailability>, EngineError> {
        validate_range(&range)?;
        let items: Vec<Equipment> = if ids.is_empty() {
            self.list_equipment(None)
        } else {
            if ids.len() > MAX_EQUIPMENT_QUERY {
                return Err(EngineError::LimitExceeded("too many equipment ids"));
            }
            let mut seen = HashSet::new();
            ids.iter()
                .filter(|id| seen.insert(**id))
                .map(|id| self.get_equipment(id).ok_or(EngineError::NotFound(*id)))
                .collect::<Result<_, _>>()?
        };

        let mut rows = Vec::with_capacity(items.len());
        for item in &items {
            let live = self.live_on(item.id, &range).await?;
            rows.extend(equipment_availability([item], &range, &live));
        }
        Ok(rows)
    }

    /// Point-in-time snapshot; concurrent writes may or may not be included.
    pub fn usage_report(&self, window: TimeRange) -> Result<UsageReport, EngineError> {
        validate_range(&window)?;
        let venues = self.list_venues();
        let equipment = self.list_equipment(None);
        let bookings = self.list_bookings(&BookingFilter {
            range: Some(window),
            ..BookingFilter::default()
        });
        Ok(usage_report(&window, &venues, &equipment, &bookings))
    }
}
