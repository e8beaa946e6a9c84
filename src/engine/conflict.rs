use std::collections::{HashMap, HashSet};

use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;
use super::ledger::available_quantity;

pub(crate) fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.start() < MIN_VALID_TIMESTAMP_MS || range.end() > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if range.duration_ms() > MAX_RANGE_DURATION_MS {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(())
}

/// Shape checks that must pass before any conflict detection runs.
pub(crate) fn validate_request(request: &BookingRequest) -> Result<(), EngineError> {
    validate_range(&request.range)?;
    if request.equipment.len() > MAX_EQUIPMENT_LINES {
        return Err(EngineError::LimitExceeded("too many equipment lines"));
    }
    if request.expected_attendees > MAX_EXPECTED_ATTENDEES {
        return Err(EngineError::LimitExceeded("expected attendees too large"));
    }
    if let Some(ref t) = request.title
        && t.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
    let mut seen = HashSet::with_capacity(request.equipment.len());
    for line in &request.equipment {
        if line.quantity == 0 {
            return Err(EngineError::InvalidRequest(format!(
                "quantity for equipment {} must be positive",
                line.equipment_id
            )));
        }
        if !seen.insert(line.equipment_id) {
            return Err(EngineError::InvalidRequest(format!(
                "equipment {} listed more than once",
                line.equipment_id
            )));
        }
    }
    Ok(())
}

/// Catalog records a single check needs, resolved by the caller beforehand.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    venues: HashMap<Ulid, Venue>,
    equipment: HashMap<Ulid, Equipment>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_venue(mut self, venue: Venue) -> Self {
        self.add_venue(venue);
        self
    }

    pub fn with_equipment(mut self, item: Equipment) -> Self {
        self.add_equipment(item);
        self
    }

    pub fn add_venue(&mut self, venue: Venue) {
        self.venues.insert(venue.id, venue);
    }

    pub fn add_equipment(&mut self, item: Equipment) {
        self.equipment.insert(item.id, item);
    }

    pub fn venue(&self, id: &Ulid) -> Option<&Venue> {
        self.venues.get(id)
    }

    pub fn equipment(&self, id: &Ulid) -> Option<&Equipment> {
        self.equipment.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum VenueConflict {
    Inactive,
    OverCapacity { capacity: u32, expected_attendees: u32 },
    /// Live bookings already holding part of the requested range.
    Booked { booking_ids: Vec<Ulid> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Conflict {
    Venue {
        venue_id: Ulid,
        detail: VenueConflict,
    },
    Equipment {
        equipment_id: Ulid,
        requested: u32,
        available: u32,
        total: u32,
    },
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Venue { venue_id, detail } => match detail {
                VenueConflict::Inactive => write!(f, "venue {venue_id} is not active"),
                VenueConflict::OverCapacity { capacity, expected_attendees } => write!(
                    f,
                    "venue {venue_id} holds {capacity} attendees, {expected_attendees} expected"
                ),
                VenueConflict::Booked { booking_ids } => write!(
                    f,
                    "venue {venue_id} unavailable: overlaps {} live booking(s)",
                    booking_ids.len()
                ),
            },
            Conflict::Equipment { equipment_id, requested, available, total } => write!(
                f,
                "equipment {equipment_id}: only {available} of {total} available, {requested} requested"
            ),
        }
    }
}

/// Every check that failed, venue first, then equipment in line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn has_venue_conflict(&self) -> bool {
        self.conflicts.iter().any(|c| matches!(c, Conflict::Venue { .. }))
    }

    pub fn equipment_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts
            .iter()
            .filter(|c| matches!(c, Conflict::Equipment { .. }))
    }
}

impl std::fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, c) in self.conflicts.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Run the venue check and every equipment check for `request` against `live`.
///
/// `exclude` is the booking being re-validated, so it never conflicts with its
/// own earlier reservation. A venue missing from `inventory` is treated as
/// inactive and missing equipment as having zero units; callers are expected
/// to resolve ids (and report not-found) before getting here.
pub fn detect_conflicts(
    request: &BookingRequest,
    inventory: &Inventory,
    live: &[Booking],
    exclude: Option<Ulid>,
) -> Result<(), ConflictReport> {
    let mut conflicts = Vec::new();
    let venue_id = request.venue_id;

    match inventory.venue(&venue_id) {
        Some(venue) if venue.is_active => {
            if request.expected_attendees > venue.capacity {
                conflicts.push(Conflict::Venue {
                    venue_id,
                    detail: VenueConflict::OverCapacity {
                        capacity: venue.capacity,
                        expected_attendees: request.expected_attendees,
                    },
                });
            }
        }
        _ => conflicts.push(Conflict::Venue {
            venue_id,
            detail: VenueConflict::Inactive,
        }),
    }

    // Exclusive: any overlapping live booking on the venue blocks, whatever its size.
    let holders: Vec<Ulid> = live
        .iter()
        .filter(|b| b.is_live() && Some(b.id) != exclude)
        .filter(|b| b.venue_id == venue_id && b.range.overlaps(&request.range))
        .map(|b| b.id)
        .collect();
    if !holders.is_empty() {
        conflicts.push(Conflict::Venue {
            venue_id,
            detail: VenueConflict::Booked { booking_ids: holders },
        });
    }

    // Pooled: sum what overlapping live bookings hold, compare against what is left.
    for line in &request.equipment {
        let total = inventory
            .equipment(&line.equipment_id)
            .map_or(0, |e| e.quantity);
        let available = available_quantity(line.equipment_id, &request.range, total, live, exclude);
        if line.quantity > available {
            conflicts.push(Conflict::Equipment {
                equipment_id: line.equipment_id,
                requested: line.quantity,
                available,
                total,
            });
        }
    }

    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(ConflictReport { conflicts })
    }
}
