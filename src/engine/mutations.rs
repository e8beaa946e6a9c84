use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_request, ConflictReport};
use super::lifecycle::{self, Transitioned};
use super::{Engine, EngineError, Locked, WalCommand};

pub const EXPIRED_REJECTION_REASON: &str =
    "Booking request expired: not approved before the event start time.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Persisted as `pending`.
    Accepted(Booking),
    /// Nothing was persisted.
    Conflicted(ConflictReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub completed: Vec<Ulid>,
    pub rejected: Vec<Ulid>,
    /// Candidates another writer moved first, or whose write failed.
    pub skipped: usize,
}

impl SweepSummary {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.rejected.is_empty() && self.skipped == 0
    }
}

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidRequest(format!("{what} name is required")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_notes(notes: &str) -> Result<(), EngineError> {
    if notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("admin notes too long"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────

    pub async fn upsert_venue(&self, venue: Venue) -> Result<Venue, EngineError> {
        check_name(&venue.name, "venue")?;
        if self.equipment.contains_key(&venue.id) {
            return Err(EngineError::InvalidRequest(format!(
                "id {} already names an equipment item",
                venue.id
            )));
        }
        if !self.venues.contains_key(&venue.id) && self.venues.len() >= MAX_VENUES {
            return Err(EngineError::LimitExceeded("too many venues"));
        }

        let _gate = self.commit_gate.read().await;
        self.ensure_schedule(venue.id);
        let mut locked = self.lock_resources([venue.id]).await?;
        let event = Event::VenueUpserted(venue.clone());
        self.persist_and_apply(&mut locked, &event, &[]).await?;
        debug!("venue {} upserted (active: {})", venue.id, venue.is_active);
        Ok(venue)
    }

    /// Lowering `quantity` below what live bookings hold is allowed; those
    /// bookings stand, and approval re-validation catches pending ones.
    pub async fn upsert_equipment(&self, item: Equipment) -> Result<Equipment, EngineError> {
        check_name(&item.name, "equipment")?;
        if let Some(ref c) = item.category
            && c.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("category too long"));
            }
        if let Some(vid) = item.venue_id
            && !self.venues.contains_key(&vid) {
                return Err(EngineError::NotFound(vid));
            }
        if self.venues.contains_key(&item.id) {
            return Err(EngineError::InvalidRequest(format!(
                "id {} already names a venue",
                item.id
            )));
        }
        if !self.equipment.contains_key(&item.id) && self.equipment.len() >= MAX_EQUIPMENT_ITEMS {
            return Err(EngineError::LimitExceeded("too many equipment items"));
        }

        let _gate = self.commit_gate.read().await;
        self.ensure_schedule(item.id);
        let mut locked = self.lock_resources([item.id]).await?;
        let event = Event::EquipmentUpserted(item.clone());
        self.persist_and_apply(&mut locked, &event, &[]).await?;
        debug!("equipment {} upserted (quantity: {})", item.id, item.quantity);
        Ok(item)
    }

    // ── Bookings ─────────────────────────────────────────

    pub async fn submit(&self, request: BookingRequest) -> Result<SubmitOutcome, EngineError> {
        self.submit_at(request, now_ms()).await
    }

    /// Submit as if the clock read `now`. Policy windows are measured from it.
    pub async fn submit_at(
        &self,
        request: BookingRequest,
        now: Ms,
    ) -> Result<SubmitOutcome, EngineError> {
        let result = self.submit_inner(request, now).await;
        let outcome = match &result {
            Ok(SubmitOutcome::Accepted(_)) => "accepted",
            Ok(SubmitOutcome::Conflicted(_)) => "conflicted",
            Err(_) => "rejected",
        };
        metrics::counter!(crate::observability::SUBMISSIONS_TOTAL, "outcome" => outcome)
            .increment(1);
        result
    }

    async fn submit_inner(
        &self,
        request: BookingRequest,
        now: Ms,
    ) -> Result<SubmitOutcome, EngineError> {
        validate_request(&request)?;
        self.policy.check(&request.range, now)?;
        if !self.venues.contains_key(&request.venue_id) {
            return Err(EngineError::NotFound(request.venue_id));
        }
        for line in &request.equipment {
            if !self.equipment.contains_key(&line.equipment_id) {
                return Err(EngineError::NotFound(line.equipment_id));
            }
        }

        let _gate = self.commit_gate.read().await;
        let mut locked = self.lock_resources(request.resource_ids()).await?;
        let inventory = self.inventory_for(&request);
        let live = self.live_overlapping(&locked, &request.range);

        match lifecycle::submit(Ulid::new(), &request, &inventory, &live, now) {
            Err(report) => {
                debug!(
                    venue = report.has_venue_conflict(),
                    equipment = report.equipment_conflicts().count(),
                    "submission for venue {} refused: {report}",
                    request.venue_id
                );
                Ok(SubmitOutcome::Conflicted(report))
            }
            Ok(Transitioned { booking, effects }) => {
                let event = Event::BookingStored(booking.clone());
                self.persist_and_apply(&mut locked, &event, &effects).await?;
                debug!("booking {} submitted for venue {}", booking.id, booking.venue_id);
                Ok(SubmitOutcome::Accepted(booking))
            }
        }
    }

    /// Re-validates against the current live set before committing.
    pub async fn approve(&self, id: Ulid, admin_notes: Option<String>) -> Result<Booking, EngineError> {
        if let Some(ref n) = admin_notes {
            check_notes(n)?;
        }
        let now = now_ms();
        self.transition(id, "approve", |booking, locked| {
            let inventory = self.inventory_for(&booking.request());
            let live = self.live_overlapping(locked, &booking.range);
            let code = self.pass_codes.issue(booking.id);
            let t = lifecycle::approve(booking, &inventory, &live, code, admin_notes.clone(), now)?;
            let pass_code = t.booking.pass_code.clone().unwrap_or_default();
            let total_cost = t.booking.total_cost.unwrap_or_default();
            let event = Event::BookingApproved { id, admin_notes, pass_code, total_cost, at: now };
            Ok((event, t.effects))
        })
        .await
    }

    pub async fn reject(&self, id: Ulid, reason: String) -> Result<Booking, EngineError> {
        self.reject_at(id, reason, now_ms()).await
    }

    pub(crate) async fn reject_at(&self, id: Ulid, reason: String, now: Ms) -> Result<Booking, EngineError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(EngineError::InvalidRequest("a rejection reason is required".into()));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("rejection reason too long"));
        }
        self.transition(id, "reject", |booking, _| {
            let t = lifecycle::reject(booking, reason.clone(), now)?;
            Ok((Event::BookingRejected { id, reason, at: now }, t.effects))
        })
        .await
    }

    pub async fn cancel(&self, id: Ulid) -> Result<Booking, EngineError> {
        let now = now_ms();
        self.transition(id, "cancel", |booking, _| {
            let t = lifecycle::cancel(booking, now)?;
            Ok((Event::BookingCancelled { id, at: now }, t.effects))
        })
        .await
    }

    pub async fn complete(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.complete_at(id, now_ms()).await
    }

    pub(crate) async fn complete_at(&self, id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        self.transition(id, "complete", |booking, _| {
            let t = lifecycle::complete(booking, now)?;
            Ok((Event::BookingCompleted { id, at: now }, t.effects))
        })
        .await
    }

    /// Allowed in every state.
    pub async fn annotate(&self, id: Ulid, admin_notes: String) -> Result<Booking, EngineError> {
        check_notes(&admin_notes)?;
        let now = now_ms();
        self.transition(id, "annotate", |booking, _| {
            let next = lifecycle::annotate(booking, admin_notes, now);
            let event = Event::BookingAnnotated {
                id,
                admin_notes: next.admin_notes.unwrap_or_default(),
                at: next.updated_at,
            };
            Ok((event, Vec::new()))
        })
        .await
    }

    /// Lock the booking's resources, let `decide` pick the event from the
    /// current record, then commit it. Returns the booking as stored.
    async fn transition<F>(&self, id: Ulid, action: &'static str, decide: F) -> Result<Booking, EngineError>
    where
        F: FnOnce(&Booking, &Locked) -> Result<(Event, Vec<Effect>), EngineError>,
    {
        let _gate = self.commit_gate.read().await;
        let resource_ids = self
            .bookings
            .get(&id)
            .map(|b| b.resource_ids())
            .ok_or(EngineError::NotFound(id))?;
        let mut locked = self.lock_resources(resource_ids).await?;
        // Re-read under the locks: another writer may have moved it meanwhile.
        let current = self
            .bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        let (event, effects) = match decide(&current, &locked) {
            Ok(decision) => decision,
            Err(e) => {
                note_refusal(id, &e);
                return Err(e);
            }
        };
        self.persist_and_apply(&mut locked, &event, &effects).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "action" => action).increment(1);

        self.bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    // ── Maintenance ──────────────────────────────────────

    /// Complete approved bookings that have ended and, when the policy says
    /// so, reject pending ones whose start has passed unapproved.
    pub async fn sweep(&self, now: Ms) -> SweepSummary {
        let mut to_complete = Vec::new();
        let mut to_reject = Vec::new();
        for entry in self.bookings.iter() {
            let b = entry.value();
            match b.status {
                BookingStatus::Approved if b.range.end() <= now => to_complete.push(b.id),
                BookingStatus::Pending if self.policy.auto_reject_expired && b.range.start() < now => {
                    to_reject.push(b.id)
                }
                _ => {}
            }
        }

        let mut summary = SweepSummary::default();
        for id in to_complete {
            match self.complete_at(id, now).await {
                Ok(_) => {
                    metrics::counter!(crate::observability::SWEPT_TOTAL, "action" => "complete").increment(1);
                    summary.completed.push(id);
                }
                Err(e) => {
                    debug!("sweep skip complete {id}: {e}");
                    summary.skipped += 1;
                }
            }
        }
        for id in to_reject {
            match self.reject_at(id, EXPIRED_REJECTION_REASON.into(), now).await {
                Ok(_) => {
                    metrics::counter!(crate::observability::SWEPT_TOTAL, "action" => "reject").increment(1);
                    summary.rejected.push(id);
                }
                Err(e) => {
                    debug!("sweep skip reject {id}: {e}");
                    summary.skipped += 1;
                }
            }
        }
        if !summary.is_empty() {
            info!(
                "sweep: {} completed, {} expired, {} skipped",
                summary.completed.len(),
                summary.rejected.len(),
                summary.skipped
            );
        }
        summary
    }

    /// Rewrite the WAL as the minimal event list that rebuilds current state:
    /// venues, then equipment, then every booking as stored.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut venues: Vec<Venue> = self.venues.iter().map(|e| e.value().clone()).collect();
        venues.sort_by_key(|v| v.id);
        let mut equipment: Vec<Equipment> = self.equipment.iter().map(|e| e.value().clone()).collect();
        equipment.sort_by_key(|e| e.id);
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);

        let mut events = Vec::with_capacity(venues.len() + equipment.len() + bookings.len());
        events.extend(venues.into_iter().map(Event::VenueUpserted));
        events.extend(equipment.into_iter().map(Event::EquipmentUpserted));
        events.extend(bookings.into_iter().map(Event::BookingStored));
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL, "status" => status).increment(1);
        if result.is_ok() {
            info!("WAL compacted to {count} event(s)");
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn note_refusal(id: Ulid, e: &EngineError) {
    match e {
        EngineError::InvalidTransition(t) => {
            warn!("booking {id}: {t}");
            metrics::counter!(crate::observability::TRANSITIONS_REFUSED_TOTAL, "reason" => "invalid_state")
                .increment(1);
        }
        EngineError::StaleConflict(report) => {
            info!("booking {id} stays pending: {report}");
            metrics::counter!(crate::observability::TRANSITIONS_REFUSED_TOTAL, "reason" => "stale_conflict")
                .increment(1);
        }
        _ => {}
    }
}
