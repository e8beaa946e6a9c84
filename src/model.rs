use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Money in minor units (cents). Rates and totals never go negative.
pub type Cents = u64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid time range: start {start} must be before end {end}")]
pub struct InvalidRange {
    pub start: Ms,
    pub end: Ms,
}

/// Half-open interval `[start, end)`. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct TimeRange {
    start: Ms,
    end: Ms,
}

/// A range as it arrives from outside, before `start < end` is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RawRange {
    pub start: Ms,
    pub end: Ms,
}

impl TryFrom<RawRange> for TimeRange {
    type Error = InvalidRange;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        TimeRange::new(raw.start, raw.end)
    }
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Result<Self, InvalidRange> {
        if start >= end {
            return Err(InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Ms {
        self.start
    }

    pub fn end(&self) -> Ms {
        self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching ranges (`self.end == other.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// The part of `self` inside `window`, if any.
    pub fn clamp_to(&self, window: &TimeRange) -> Option<TimeRange> {
        TimeRange::new(self.start.max(window.start), self.end.min(window.end)).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::Cancelled,
        BookingStatus::Completed,
    ];

    /// Live bookings are the only ones that hold venue or equipment capacity.
    pub fn is_live(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentLine {
    pub equipment_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    pub id: Ulid,
    pub name: String,
    /// Max attendees.
    pub capacity: u32,
    pub is_active: bool,
    /// Charged per hour booked, prorated. `None` means the venue is free.
    #[serde(default)]
    pub hourly_rate: Option<Cents>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: Ulid,
    pub name: String,
    /// Units owned.
    pub quantity: u32,
    pub category: Option<String>,
    pub venue_id: Option<Ulid>,
    /// Flat charge per unit per booking.
    #[serde(default)]
    pub rental_rate: Option<Cents>,
}

/// What an organizer asks for. Becomes a [`Booking`] once accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub organizer_id: Ulid,
    pub venue_id: Ulid,
    pub range: TimeRange,
    pub expected_attendees: u32,
    pub title: Option<String>,
    pub equipment: Vec<EquipmentLine>,
}

impl BookingRequest {
    /// Venue first, then equipment in line order.
    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids = Vec::with_capacity(self.equipment.len() + 1);
        ids.push(self.venue_id);
        ids.extend(self.equipment.iter().map(|l| l.equipment_id));
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Ulid,
    pub organizer_id: Ulid,
    pub venue_id: Ulid,
    pub range: TimeRange,
    pub expected_attendees: u32,
    pub title: Option<String>,
    pub equipment: Vec<EquipmentLine>,
    pub status: BookingStatus,
    /// Set iff `status == Rejected`.
    pub rejection_reason: Option<String>,
    pub admin_notes: Option<String>,
    /// Set once the booking has been approved.
    pub pass_code: Option<String>,
    /// Fixed at approval from the catalog rates in force then.
    #[serde(default)]
    pub total_cost: Option<Cents>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Units of `equipment_id` this booking asks for (0 if none).
    pub fn quantity_of(&self, equipment_id: Ulid) -> u32 {
        self.equipment
            .iter()
            .find(|l| l.equipment_id == equipment_id)
            .map_or(0, |l| l.quantity)
    }

    pub fn request(&self) -> BookingRequest {
        BookingRequest {
            organizer_id: self.organizer_id,
            venue_id: self.venue_id,
            range: self.range,
            expected_attendees: self.expected_attendees,
            title: self.title.clone(),
            equipment: self.equipment.clone(),
        }
    }

    pub fn resource_ids(&self) -> Vec<Ulid> {
        let mut ids = Vec::with_capacity(self.equipment.len() + 1);
        ids.push(self.venue_id);
        ids.extend(self.equipment.iter().map(|l| l.equipment_id));
        ids
    }
}

/// A live booking's claim on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub booking_id: Ulid,
    pub range: TimeRange,
}

/// Live reservations held on a single venue or equipment item.
///
/// The mutex around a `Schedule` is what serializes check-and-write for its
/// resource; the reservations themselves are only an index into the booking map.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub resource_id: Ulid,
    /// Sorted by `range.start`.
    pub reservations: Vec<Reservation>,
}

impl Schedule {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by range start.
    pub fn insert(&mut self, booking_id: Ulid, range: TimeRange) {
        let pos = self
            .reservations
            .binary_search_by_key(&range.start(), |r| r.range.start())
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, Reservation { booking_id, range });
    }

    pub fn remove(&mut self, booking_id: Ulid) -> Option<Reservation> {
        let pos = self
            .reservations
            .iter()
            .position(|r| r.booking_id == booking_id)?;
        Some(self.reservations.remove(pos))
    }

    /// Return only reservations whose range overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start() < query.end());
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end() > query.start())
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

/// Side-effect instruction. The engine emits these as data; a dispatcher outside
/// the core turns them into emails, in-app notifications or QR codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Effect {
    /// Tell administrators a new request is waiting.
    BookingRequested {
        booking_id: Ulid,
        venue_id: Ulid,
        organizer_id: Ulid,
    },
    ApprovalNotification {
        booking_id: Ulid,
        organizer_id: Ulid,
    },
    PassCodeIssued {
        booking_id: Ulid,
        organizer_id: Ulid,
        code: String,
    },
    RejectionNotification {
        booking_id: Ulid,
        organizer_id: Ulid,
        reason: String,
    },
    CancellationNotification {
        booking_id: Ulid,
        organizer_id: Ulid,
    },
    CompletionNotification {
        booking_id: Ulid,
        organizer_id: Ulid,
    },
}

impl Effect {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Effect::BookingRequested { booking_id, .. }
            | Effect::ApprovalNotification { booking_id, .. }
            | Effect::PassCodeIssued { booking_id, .. }
            | Effect::RejectionNotification { booking_id, .. }
            | Effect::CancellationNotification { booking_id, .. }
            | Effect::CompletionNotification { booking_id, .. } => *booking_id,
        }
    }

    pub fn organizer_id(&self) -> Ulid {
        match self {
            Effect::BookingRequested { organizer_id, .. }
            | Effect::ApprovalNotification { organizer_id, .. }
            | Effect::PassCodeIssued { organizer_id, .. }
            | Effect::RejectionNotification { organizer_id, .. }
            | Effect::CancellationNotification { organizer_id, .. }
            | Effect::CompletionNotification { organizer_id, .. } => *organizer_id,
        }
    }

    /// Whether the organizer is the audience. `BookingRequested` is for
    /// administrators and only reaches the firehose.
    pub fn notifies_organizer(&self) -> bool {
        !matches!(self, Effect::BookingRequested { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Effect::BookingRequested { .. } => "booking_requested",
            Effect::ApprovalNotification { .. } => "approval_notification",
            Effect::PassCodeIssued { .. } => "pass_code_issued",
            Effect::RejectionNotification { .. } => "rejection_notification",
            Effect::CancellationNotification { .. } => "cancellation_notification",
            Effect::CompletionNotification { .. } => "completion_notification",
        }
    }
}

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueUpserted(Venue),
    EquipmentUpserted(Equipment),
    /// A booking in whatever state it is in. Written on submit and by compaction.
    BookingStored(Booking),
    BookingApproved {
        id: Ulid,
        admin_notes: Option<String>,
        pass_code: String,
        total_cost: Cents,
        at: Ms,
    },
    BookingRejected {
        id: Ulid,
        reason: String,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        at: Ms,
    },
    BookingAnnotated {
        id: Ulid,
        admin_notes: String,
        at: Ms,
    },
}

impl Event {
    pub fn booking_id(&self) -> Option<Ulid> {
        match self {
            Event::BookingStored(b) => Some(b.id),
            Event::BookingApproved { id, .. }
            | Event::BookingRejected { id, .. }
            | Event::BookingCancelled { id, .. }
            | Event::BookingCompleted { id, .. }
            | Event::BookingAnnotated { id, .. } => Some(*id),
            Event::VenueUpserted(_) | Event::EquipmentUpserted(_) => None,
        }
    }
}
