//! Booking lifecycle.
//!
//! ```text
//! pending ──approve──▶ approved ──complete──▶ completed
//!    │                    │
//!    │                    └──cancel──▶ cancelled
//!    ├──reject──▶ rejected
//!    └──cancel──▶ cancelled
//! ```
//!
//! Every function here is pure: it takes the booking plus whatever it needs to
//! decide, and returns the next version of the booking together with the side
//! effects the caller must carry out. Nothing is persisted or sent.

use serde::Serialize;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{detect_conflicts, ConflictReport, Inventory};
use super::pricing::booking_cost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Approve,
    Reject,
    Cancel,
    Complete,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Approve, Action::Reject, Action::Cancel, Action::Complete];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
            Action::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} a {from} booking", .action.as_str())]
pub struct InvalidTransition {
    pub from: BookingStatus,
    pub action: Action,
}

/// The transition table. Anything not listed is illegal.
pub fn next_status(from: BookingStatus, action: Action) -> Result<BookingStatus, InvalidTransition> {
    use BookingStatus::*;
    match (from, action) {
        (Pending, Action::Approve) => Ok(Approved),
        (Pending, Action::Reject) => Ok(Rejected),
        (Pending | Approved, Action::Cancel) => Ok(Cancelled),
        (Approved, Action::Complete) => Ok(Completed),
        _ => Err(InvalidTransition { from, action }),
    }
}

/// A booking after a successful transition, plus what must happen because of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitioned {
    pub booking: Booking,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Re-validation failed; the booking stays pending.
    #[error("slot no longer available: {0}")]
    StaleConflict(ConflictReport),
}

/// Accept a request as a new pending booking, or explain every reason it can't be.
/// A refused request produces no booking at all.
pub fn submit(
    id: Ulid,
    request: &BookingRequest,
    inventory: &Inventory,
    live: &[Booking],
    now: Ms,
) -> Result<Transitioned, ConflictReport> {
    detect_conflicts(request, inventory, live, None)?;
    let booking = Booking {
        id,
        organizer_id: request.organizer_id,
        venue_id: request.venue_id,
        range: request.range,
        expected_attendees: request.expected_attendees,
        title: request.title.clone(),
        equipment: request.equipment.clone(),
        status: BookingStatus::Pending,
        rejection_reason: None,
        admin_notes: None,
        pass_code: None,
        total_cost: None,
        created_at: now,
        updated_at: now,
    };
    let effects = vec![Effect::BookingRequested {
        booking_id: id,
        venue_id: booking.venue_id,
        organizer_id: booking.organizer_id,
    }];
    Ok(Transitioned { booking, effects })
}

/// Approve a pending booking after re-checking it against the current live set.
/// The approved booking carries its total cost at today's rates.
///
/// `live` may contain the booking itself; it is excluded from its own check.
pub fn approve(
    booking: &Booking,
    inventory: &Inventory,
    live: &[Booking],
    pass_code: String,
    admin_notes: Option<String>,
    now: Ms,
) -> Result<Transitioned, ApprovalError> {
    let status = next_status(booking.status, Action::Approve)?;
    detect_conflicts(&booking.request(), inventory, live, Some(booking.id))
        .map_err(ApprovalError::StaleConflict)?;

    let mut next = booking.clone();
    next.status = status;
    next.pass_code = Some(pass_code.clone());
    next.total_cost = Some(booking_cost(&booking.request(), inventory));
    if admin_notes.is_some() {
        next.admin_notes = admin_notes;
    }
    next.updated_at = now;
    let effects = vec![
        Effect::ApprovalNotification {
            booking_id: next.id,
            organizer_id: next.organizer_id,
        },
        Effect::PassCodeIssued {
            booking_id: next.id,
            organizer_id: next.organizer_id,
            code: pass_code,
        },
    ];
    Ok(Transitioned { booking: next, effects })
}

pub fn reject(booking: &Booking, reason: String, now: Ms) -> Result<Transitioned, InvalidTransition> {
    let status = next_status(booking.status, Action::Reject)?;
    let mut next = booking.clone();
    next.status = status;
    next.rejection_reason = Some(reason.clone());
    next.updated_at = now;
    let effects = vec![Effect::RejectionNotification {
        booking_id: next.id,
        organizer_id: next.organizer_id,
        reason,
    }];
    Ok(Transitioned { booking: next, effects })
}

/// Cancelling frees the booking's venue slot and equipment immediately,
/// since a cancelled booking is no longer live.
pub fn cancel(booking: &Booking, now: Ms) -> Result<Transitioned, InvalidTransition> {
    let status = next_status(booking.status, Action::Cancel)?;
    let mut next = booking.clone();
    next.status = status;
    next.updated_at = now;
    let effects = vec![Effect::CancellationNotification {
        booking_id: next.id,
        organizer_id: next.organizer_id,
    }];
    Ok(Transitioned { booking: next, effects })
}

pub fn complete(booking: &Booking, now: Ms) -> Result<Transitioned, InvalidTransition> {
    let status = next_status(booking.status, Action::Complete)?;
    let mut next = booking.clone();
    next.status = status;
    next.updated_at = now;
    let effects = vec![Effect::CompletionNotification {
        booking_id: next.id,
        organizer_id: next.organizer_id,
    }];
    Ok(Transitioned { booking: next, effects })
}

/// Admin notes may change in any state, terminal ones included.
pub fn annotate(booking: &Booking, admin_notes: String, now: Ms) -> Booking {
    let mut next = booking.clone();
    next.admin_notes = Some(admin_notes);
    next.updated_at = now;
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    // 2025-01-10T00:00:00Z
    const DAY: Ms = 1_736_467_200_000;

    fn at(hour: Ms) -> Ms {
        DAY + hour * H
    }

    fn range(from_hour: Ms, to_hour: Ms) -> TimeRange {
        TimeRange::new(at(from_hour), at(to_hour)).unwrap()
    }

    struct Fixture {
        venue: Venue,
        projector: Equipment,
        inventory: Inventory,
    }

    fn fixture() -> Fixture {
        let venue = Venue { id: Ulid::new(), name: "V".into(), capacity: 100, is_active: true, hourly_rate: None };
        let projector = Equipment {
            id: Ulid::new(),
            name: "E".into(),
            quantity: 5,
            category: None,
            venue_id: None,
            rental_rate: None,
        };
        let inventory = Inventory::new()
            .with_venue(venue.clone())
            .with_equipment(projector.clone());
        Fixture { venue, projector, inventory }
    }

    fn req(f: &Fixture, r: TimeRange, qty: u32) -> BookingRequest {
        BookingRequest {
            organizer_id: Ulid::new(),
            venue_id: f.venue.id,
            range: r,
            expected_attendees: 40,
            title: Some("Orientation".into()),
            equipment: vec![EquipmentLine { equipment_id: f.projector.id, quantity: qty }],
        }
    }

    fn pending(f: &Fixture) -> Booking {
        submit(Ulid::new(), &req(f, range(9, 11), 1), &f.inventory, &[], at(0))
            .unwrap()
            .booking
    }

    fn with_status(b: &Booking, status: BookingStatus) -> Booking {
        Booking { status, ..b.clone() }
    }

    #[test]
    fn transition_table_is_total() {
        use BookingStatus::*;
        let legal = [
            (Pending, Action::Approve, Approved),
            (Pending, Action::Reject, Rejected),
            (Pending, Action::Cancel, Cancelled),
            (Approved, Action::Cancel, Cancelled),
            (Approved, Action::Complete, Completed),
        ];
        for from in BookingStatus::ALL {
            for action in Action::ALL {
                let expected = legal
                    .iter()
                    .find(|(f, a, _)| *f == from && *a == action)
                    .map(|(_, _, to)| *to);
                match expected {
                    Some(to) => assert_eq!(next_status(from, action), Ok(to)),
                    None => assert_eq!(
                        next_status(from, action),
                        Err(InvalidTransition { from, action })
                    ),
                }
            }
        }
    }

    #[test]
    fn submit_creates_pending_and_notifies_admins() {
        let f = fixture();
        let id = Ulid::new();
        let t = submit(id, &req(&f, range(9, 11), 5), &f.inventory, &[], at(0)).unwrap();
        assert_eq!(t.booking.status, BookingStatus::Pending);
        assert_eq!(t.booking.created_at, at(0));
        assert!(t.booking.pass_code.is_none());
        assert_eq!(
            t.effects,
            vec![Effect::BookingRequested {
                booking_id: id,
                venue_id: f.venue.id,
                organizer_id: t.booking.organizer_id,
            }]
        );
    }

    #[test]
    fn submit_conflict_returns_report() {
        let f = fixture();
        let a = submit(Ulid::new(), &req(&f, range(9, 11), 5), &f.inventory, &[], at(0))
            .unwrap()
            .booking;
        let report = submit(Ulid::new(), &req(&f, range(10, 12), 1), &f.inventory, &[a], at(0))
            .unwrap_err();
        assert_eq!(report.conflicts.len(), 2);
    }

    #[test]
    fn approve_issues_pass_code() {
        let f = fixture();
        let b = pending(&f);
        let t = approve(&b, &f.inventory, &[b.clone()], "UM-EVENT-1".into(), Some("ok".into()), at(1))
            .unwrap();
        assert_eq!(t.booking.status, BookingStatus::Approved);
        assert_eq!(t.booking.pass_code.as_deref(), Some("UM-EVENT-1"));
        assert_eq!(t.booking.admin_notes.as_deref(), Some("ok"));
        assert_eq!(t.booking.updated_at, at(1));
        assert_eq!(t.booking.total_cost, Some(0));
        assert_eq!(t.effects.len(), 2);
        assert!(matches!(t.effects[1], Effect::PassCodeIssued { ref code, .. } if code == "UM-EVENT-1"));
    }

    #[test]
    fn approve_keeps_existing_notes_when_none_given() {
        let f = fixture();
        let b = annotate(&pending(&f), "call organizer".into(), at(0));
        let t = approve(&b, &f.inventory, &[], "P".into(), None, at(1)).unwrap();
        assert_eq!(t.booking.admin_notes.as_deref(), Some("call organizer"));
    }

    #[test]
    fn approve_refuses_stale_slot() {
        let f = fixture();
        let b = pending(&f);
        let rival = Booking {
            id: Ulid::new(),
            status: BookingStatus::Approved,
            ..b.clone()
        };
        let err = approve(&b, &f.inventory, &[b.clone(), rival], "P".into(), None, at(1)).unwrap_err();
        match err {
            ApprovalError::StaleConflict(report) => assert!(report.has_venue_conflict()),
            other => panic!("expected stale conflict, got {other:?}"),
        }
    }

    #[test]
    fn approve_checks_state_before_conflicts() {
        let f = fixture();
        let b = with_status(&pending(&f), BookingStatus::Approved);
        let err = approve(&b, &Inventory::new(), &[], "P".into(), None, at(1)).unwrap_err();
        assert_eq!(
            err,
            ApprovalError::InvalidTransition(InvalidTransition {
                from: BookingStatus::Approved,
                action: Action::Approve,
            })
        );
    }

    #[test]
    fn approve_refused_when_venue_deactivated() {
        let f = fixture();
        let b = pending(&f);
        let closed = Inventory::new()
            .with_venue(Venue { is_active: false, ..f.venue.clone() })
            .with_equipment(f.projector.clone());
        assert!(matches!(
            approve(&b, &closed, &[b.clone()], "P".into(), None, at(1)),
            Err(ApprovalError::StaleConflict(_))
        ));
    }

    #[test]
    fn reject_records_reason() {
        let f = fixture();
        let t = reject(&pending(&f), "schedule conflict".into(), at(2)).unwrap();
        assert_eq!(t.booking.status, BookingStatus::Rejected);
        assert_eq!(t.booking.rejection_reason.as_deref(), Some("schedule conflict"));
        assert!(matches!(t.effects[0], Effect::RejectionNotification { .. }));

        let approved = with_status(&pending(&f), BookingStatus::Approved);
        assert!(reject(&approved, "late".into(), at(2)).is_err());
    }

    #[test]
    fn cancel_from_pending_and_approved_only() {
        let f = fixture();
        let b = pending(&f);
        assert_eq!(cancel(&b, at(2)).unwrap().booking.status, BookingStatus::Cancelled);
        let approved = with_status(&b, BookingStatus::Approved);
        assert_eq!(cancel(&approved, at(2)).unwrap().booking.status, BookingStatus::Cancelled);
        for s in [BookingStatus::Rejected, BookingStatus::Cancelled, BookingStatus::Completed] {
            assert!(cancel(&with_status(&b, s), at(2)).is_err());
        }
    }

    #[test]
    fn complete_requires_approved() {
        let f = fixture();
        let b = pending(&f);
        assert_eq!(
            complete(&b, at(12)),
            Err(InvalidTransition { from: BookingStatus::Pending, action: Action::Complete })
        );
        let done = complete(&with_status(&b, BookingStatus::Approved), at(12)).unwrap();
        assert_eq!(done.booking.status, BookingStatus::Completed);
        assert!(matches!(done.effects[0], Effect::CompletionNotification { .. }));
    }

    #[test]
    fn annotate_allowed_in_terminal_states() {
        let f = fixture();
        let rejected = reject(&pending(&f), "no".into(), at(1)).unwrap().booking;
        let noted = annotate(&rejected, "organizer informed by phone".into(), at(3));
        assert_eq!(noted.status, BookingStatus::Rejected);
        assert_eq!(noted.rejection_reason.as_deref(), Some("no"));
        assert_eq!(noted.admin_notes.as_deref(), Some("organizer informed by phone"));
        assert_eq!(noted.updated_at, at(3));
    }

    #[test]
    fn invalid_transition_message() {
        let e = InvalidTransition { from: BookingStatus::Rejected, action: Action::Approve };
        assert_eq!(e.to_string(), "cannot approve a rejected booking");
    }
}
