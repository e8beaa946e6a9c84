pub mod availability;
pub mod conflict;
mod error;
pub mod ledger;
pub mod lifecycle;
mod mutations;
pub mod pricing;
mod queries;

pub use availability::{
    EquipmentAvailability, EquipmentUsage, UsageReport, VenueAvailability, VenueUsage,
};
pub use conflict::{Conflict, ConflictReport, Inventory, VenueConflict};
pub use error::EngineError;
pub use lifecycle::{Action, InvalidTransition};
pub use mutations::{SubmitOutcome, SweepSummary};
pub use queries::BookingFilter;

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::passcode::PassCodeIssuer;
use crate::policy::BookingPolicy;
use crate::wal::Wal;

pub type SharedSchedule = Arc<Mutex<Schedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and share one fsync; every sender hears the batch's result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL flush failed for {} event(s): {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Catalog, bookings and the per-resource schedules that serialize writes.
///
/// Every mutation takes the commit gate shared, then locks the schedules of
/// the venue and equipment it touches in ascending id order, and holds them
/// across re-check, WAL append and apply. Compaction takes the gate exclusively
/// so its snapshot never misses an appended-but-unapplied event.
pub struct Engine {
    pub(super) venues: DashMap<Ulid, Venue>,
    pub(super) equipment: DashMap<Ulid, Equipment>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    pub(super) schedules: DashMap<Ulid, SharedSchedule>,
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) policy: BookingPolicy,
    pub(super) pass_codes: Arc<dyn PassCodeIssuer>,
}

/// Schedule guards held by one mutation, keyed (and acquired) by resource id.
pub(super) struct Locked {
    guards: BTreeMap<Ulid, OwnedMutexGuard<Schedule>>,
}

impl Locked {
    fn schedule_mut(&mut self, resource_id: &Ulid) -> Option<&mut Schedule> {
        self.guards.get_mut(resource_id).map(|g| &mut **g)
    }
}

fn sorted_unique(ids: impl IntoIterator<Item = Ulid>) -> Vec<Ulid> {
    let mut ids: Vec<Ulid> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    ids
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: BookingPolicy,
        pass_codes: Arc<dyn PassCodeIssuer>,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            venues: DashMap::new(),
            equipment: DashMap::new(),
            bookings: DashMap::new(),
            schedules: DashMap::new(),
            commit_gate: RwLock::new(()),
            wal_tx,
            notify,
            policy,
            pass_codes,
        };

        // Nothing else can see the engine yet, so try_lock never contends.
        // Blocking locks are off limits: this may run inside the runtime.
        for event in &events {
            let ids = engine.resources_touched(event);
            for id in &ids {
                engine.ensure_schedule(*id);
            }
            let Some(mut locked) = engine.try_lock_resources(ids) else {
                return Err(io::Error::other("replay: schedule lock contended"));
            };
            engine.apply(&mut locked, event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} WAL event(s): {} venue(s), {} equipment item(s), {} booking(s)",
                events.len(),
                engine.venues.len(),
                engine.equipment.len(),
                engine.bookings.len()
            );
        }

        Ok(engine)
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn schedule(&self, resource_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(resource_id).map(|e| e.value().clone())
    }

    pub(super) fn ensure_schedule(&self, resource_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(Schedule::new(resource_id))))
            .clone()
    }

    /// Lock the schedules of `ids` in ascending order. Unknown ids are `NotFound`.
    pub(super) async fn lock_resources(
        &self,
        ids: impl IntoIterator<Item = Ulid>,
    ) -> Result<Locked, EngineError> {
        let mut guards = BTreeMap::new();
        for id in sorted_unique(ids) {
            let schedule = self.schedule(&id).ok_or(EngineError::NotFound(id))?;
            guards.insert(id, schedule.lock_owned().await);
        }
        Ok(Locked { guards })
    }

    fn try_lock_resources(&self, ids: impl IntoIterator<Item = Ulid>) -> Option<Locked> {
        let mut guards = BTreeMap::new();
        for id in sorted_unique(ids) {
            let schedule = self.schedule(&id)?;
            guards.insert(id, schedule.try_lock_owned().ok()?);
        }
        Some(Locked { guards })
    }

    /// Live bookings on any locked schedule that overlap `range`. Everything the
    /// conflict detector needs for a request on those resources.
    pub(super) fn live_overlapping(&self, locked: &Locked, range: &TimeRange) -> Vec<Booking> {
        let mut seen = HashSet::new();
        let mut live = Vec::new();
        for guard in locked.guards.values() {
            for r in guard.overlapping(range) {
                if seen.insert(r.booking_id)
                    && let Some(b) = self.bookings.get(&r.booking_id) {
                        live.push(b.clone());
                    }
            }
        }
        live
    }

    /// Catalog records for a request. Unknown ids stay absent; callers that
    /// must report `NotFound` check before locking.
    pub(super) fn inventory_for(&self, request: &BookingRequest) -> Inventory {
        let mut inventory = Inventory::new();
        if let Some(v) = self.venues.get(&request.venue_id) {
            inventory.add_venue(v.clone());
        }
        for line in &request.equipment {
            if let Some(e) = self.equipment.get(&line.equipment_id) {
                inventory.add_equipment(e.clone());
            }
        }
        inventory
    }

    /// WAL-append + apply + publish, with the caller holding the schedule locks.
    pub(super) async fn persist_and_apply(
        &self,
        locked: &mut Locked,
        event: &Event,
        effects: &[Effect],
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply(locked, event);
        self.notify.publish_all(effects);
        Ok(())
    }

    /// Schedules an event needs locked to apply.
    fn resources_touched(&self, event: &Event) -> Vec<Ulid> {
        match event {
            Event::VenueUpserted(v) => vec![v.id],
            Event::EquipmentUpserted(e) => vec![e.id],
            Event::BookingStored(b) => b.resource_ids(),
            other => other
                .booking_id()
                .and_then(|id| self.bookings.get(&id).map(|b| b.resource_ids()))
                .unwrap_or_default(),
        }
    }

    fn index(locked: &mut Locked, booking: &Booking) {
        for rid in booking.resource_ids() {
            if let Some(s) = locked.schedule_mut(&rid) {
                s.insert(booking.id, booking.range);
            }
        }
        metrics::gauge!(crate::observability::LIVE_BOOKINGS).increment(1.0);
    }

    fn unindex(locked: &mut Locked, booking: &Booking) {
        for rid in booking.resource_ids() {
            if let Some(s) = locked.schedule_mut(&rid) {
                s.remove(booking.id);
            }
        }
        metrics::gauge!(crate::observability::LIVE_BOOKINGS).decrement(1.0);
    }

    /// Apply one committed event. The caller holds every schedule in
    /// [`Engine::resources_touched`] for it.
    fn apply(&self, locked: &mut Locked, event: &Event) {
        match event {
            Event::VenueUpserted(v) => {
                self.venues.insert(v.id, v.clone());
            }
            Event::EquipmentUpserted(e) => {
                self.equipment.insert(e.id, e.clone());
            }
            Event::BookingStored(b) => {
                if let Some(old) = self.bookings.insert(b.id, b.clone())
                    && old.is_live() {
                        Self::unindex(locked, &old);
                    }
                if b.is_live() {
                    Self::index(locked, b);
                }
            }
            other => {
                let Some(id) = other.booking_id() else { return };
                let Some(mut entry) = self.bookings.get_mut(&id) else {
                    tracing::warn!("event for unknown booking {id}, skipped");
                    return;
                };
                let b = entry.value_mut();
                let was_live = b.is_live();
                match other {
                    Event::BookingApproved { admin_notes, pass_code, total_cost, at, .. } => {
                        b.status = BookingStatus::Approved;
                        b.pass_code = Some(pass_code.clone());
                        b.total_cost = Some(*total_cost);
                        if admin_notes.is_some() {
                            b.admin_notes = admin_notes.clone();
                        }
                        b.updated_at = *at;
                    }
                    Event::BookingRejected { reason, at, .. } => {
                        b.status = BookingStatus::Rejected;
                        b.rejection_reason = Some(reason.clone());
                        b.updated_at = *at;
                    }
                    Event::BookingCancelled { at, .. } => {
                        b.status = BookingStatus::Cancelled;
                        b.updated_at = *at;
                    }
                    Event::BookingCompleted { at, .. } => {
                        b.status = BookingStatus::Completed;
                        b.updated_at = *at;
                    }
                    Event::BookingAnnotated { admin_notes, at, .. } => {
                        b.admin_notes = Some(admin_notes.clone());
                        b.updated_at = *at;
                    }
                    Event::VenueUpserted(_) | Event::EquipmentUpserted(_) | Event::BookingStored(_) => {}
                }
                let released = was_live && !b.is_live();
                let snapshot = released.then(|| b.clone());
                drop(entry);
                if let Some(b) = snapshot {
                    Self::unindex(locked, &b);
                }
            }
        }
    }
}
