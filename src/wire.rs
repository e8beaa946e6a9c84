//! Newline-delimited JSON over TCP.
//!
//! One request object per line, tagged by `op`; one response object per line,
//! in request order. After `listen`, effect lines (`{"effect": {...}}`) are
//! interleaved with responses as bookings change.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{BookingFilter, Conflict, Engine, EngineError, SubmitOutcome};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    UpsertVenue {
        venue: Venue,
    },
    UpsertEquipment {
        equipment: Equipment,
    },
    GetVenue {
        venue_id: Ulid,
    },
    ListVenues,
    ListEquipment {
        #[serde(default)]
        venue_id: Option<Ulid>,
    },
    Submit {
        organizer_id: Ulid,
        venue_id: Ulid,
        range: RawRange,
        expected_attendees: u32,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        equipment: Vec<EquipmentLine>,
    },
    Approve {
        booking_id: Ulid,
        #[serde(default)]
        admin_notes: Option<String>,
    },
    Reject {
        booking_id: Ulid,
        reason: String,
    },
    Cancel {
        booking_id: Ulid,
    },
    Complete {
        booking_id: Ulid,
    },
    Annotate {
        booking_id: Ulid,
        admin_notes: String,
    },
    GetBooking {
        booking_id: Ulid,
    },
    ListBookings {
        #[serde(default)]
        filter: BookingFilter,
    },
    VenueAvailability {
        venue_id: Ulid,
        range: RawRange,
    },
    EquipmentAvailability {
        #[serde(default)]
        equipment_ids: Vec<Ulid>,
        range: RawRange,
    },
    UsageReport {
        window: RawRange,
    },
    /// Without `organizerId`, every effect.
    Listen {
        #[serde(default)]
        organizer_id: Option<Ulid>,
    },
    Unlisten {
        #[serde(default)]
        organizer_id: Option<Ulid>,
    },
}

impl Request {
    /// Short label for metrics and logs.
    pub fn op(&self) -> &'static str {
        match self {
            Request::UpsertVenue { .. } => "upsert_venue",
            Request::UpsertEquipment { .. } => "upsert_equipment",
            Request::GetVenue { .. } => "get_venue",
            Request::ListVenues => "list_venues",
            Request::ListEquipment { .. } => "list_equipment",
            Request::Submit { .. } => "submit",
            Request::Approve { .. } => "approve",
            Request::Reject { .. } => "reject",
            Request::Cancel { .. } => "cancel",
            Request::Complete { .. } => "complete",
            Request::Annotate { .. } => "annotate",
            Request::GetBooking { .. } => "get_booking",
            Request::ListBookings { .. } => "list_bookings",
            Request::VenueAvailability { .. } => "venue_availability",
            Request::EquipmentAvailability { .. } => "equipment_availability",
            Request::UsageReport { .. } => "usage_report",
            Request::Listen { .. } => "listen",
            Request::Unlisten { .. } => "unlisten",
        }
    }
}

/// One response line. Submit and approve fill `bookingId`/`booking`/`conflicts`;
/// other reads put their payload in `data`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<Booking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<Conflict>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    fn ok() -> Self {
        Self { ok: true, ..Self::default() }
    }

    fn booking(booking: Booking) -> Self {
        Self {
            ok: true,
            booking_id: Some(booking.id),
            booking: Some(booking),
            ..Self::default()
        }
    }

    fn data(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self { ok: true, data: Some(v), ..Self::default() },
            Err(e) => Self::failure("internal", e.to_string()),
        }
    }

    fn failure(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(code),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn engine_error(e: EngineError) -> Self {
        let mut r = Self::failure(e.code(), e.to_string());
        if let EngineError::StaleConflict(report) = e {
            r.conflicts = Some(report.conflicts);
        }
        r
    }
}

fn found<T: Serialize>(value: Option<T>, id: Ulid) -> Response {
    match value {
        Some(v) => Response::data(v),
        None => Response::engine_error(EngineError::NotFound(id)),
    }
}

/// Run one request against the engine. `listen`/`unlisten` are connection
/// state and are handled by [`process_connection`].
pub async fn execute(engine: &Engine, request: Request) -> Response {
    dispatch(engine, request).await.unwrap_or_else(Response::engine_error)
}

async fn dispatch(engine: &Engine, request: Request) -> Result<Response, EngineError> {
    match request {
        Request::UpsertVenue { venue } => engine.upsert_venue(venue).await.map(Response::data),
        Request::UpsertEquipment { equipment } => {
            engine.upsert_equipment(equipment).await.map(Response::data)
        }
        Request::GetVenue { venue_id } => Ok(found(engine.get_venue(&venue_id), venue_id)),
        Request::ListVenues => Ok(Response::data(engine.list_venues())),
        Request::ListEquipment { venue_id } => Ok(Response::data(engine.list_equipment(venue_id))),
        Request::Submit {
            organizer_id,
            venue_id,
            range,
            expected_attendees,
            title,
            equipment,
        } => {
            let request = BookingRequest {
                organizer_id,
                venue_id,
                range: TimeRange::try_from(range)?,
                expected_attendees,
                title,
                equipment,
            };
            engine.submit(request).await.map(|outcome| match outcome {
                SubmitOutcome::Accepted(b) => Response::booking(b),
                SubmitOutcome::Conflicted(report) => Response {
                    conflicts: Some(report.conflicts.clone()),
                    ..Response::failure("conflict", report.to_string())
                },
            })
        }
        Request::Approve { booking_id, admin_notes } => {
            engine.approve(booking_id, admin_notes).await.map(Response::booking)
        }
        Request::Reject { booking_id, reason } => {
            engine.reject(booking_id, reason).await.map(Response::booking)
        }
        Request::Cancel { booking_id } => engine.cancel(booking_id).await.map(Response::booking),
        Request::Complete { booking_id } => engine.complete(booking_id).await.map(Response::booking),
        Request::Annotate { booking_id, admin_notes } => {
            engine.annotate(booking_id, admin_notes).await.map(Response::booking)
        }
        Request::GetBooking { booking_id } => Ok(match engine.get_booking(&booking_id) {
            Some(b) => Response::booking(b),
            None => Response::engine_error(EngineError::NotFound(booking_id)),
        }),
        Request::ListBookings { filter } => Ok(Response::data(engine.list_bookings(&filter))),
        Request::VenueAvailability { venue_id, range } => engine
            .venue_availability(venue_id, TimeRange::try_from(range)?)
            .await
            .map(Response::data),
        Request::EquipmentAvailability { equipment_ids, range } => engine
            .equipment_availability(&equipment_ids, TimeRange::try_from(range)?)
            .await
            .map(Response::data),
        Request::UsageReport { window } => {
            engine.usage_report(TimeRange::try_from(window)?).map(Response::data)
        }
        Request::Listen { .. } | Request::Unlisten { .. } => Ok(Response::ok()),
    }
}

/// Live `listen` subscriptions of one connection, keyed by organizer
/// (`None` = every effect). Each forwards into the connection's queue.
struct Listeners {
    tasks: HashMap<Option<Ulid>, AbortHandle>,
    tx: mpsc::UnboundedSender<Effect>,
}

impl Listeners {
    fn listen(&mut self, engine: &Engine, organizer_id: Option<Ulid>) {
        if self.tasks.contains_key(&organizer_id) {
            return;
        }
        let mut rx = match organizer_id {
            Some(id) => engine.notify.subscribe(id),
            None => engine.notify.subscribe_all(),
        };
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(effect) => {
                        if tx.send(effect).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("listener lagged, {n} effect(s) dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(organizer_id, handle.abort_handle());
    }

    fn unlisten(&mut self, organizer_id: Option<Ulid>) {
        if let Some(handle) = self.tasks.remove(&organizer_id) {
            handle.abort();
        }
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        for handle in self.tasks.values() {
            handle.abort();
        }
    }
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        format!(r#"{{"ok":false,"error":"internal","message":{:?}}}"#, e.to_string())
    })
}

enum Incoming {
    Line(Result<String, LinesCodecError>),
    Effect(Effect),
}

/// Serve one client until it disconnects.
pub async fn process_connection<S>(stream: S, engine: Arc<Engine>) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (tx, mut effects) = mpsc::unbounded_channel();
    let mut listeners = Listeners { tasks: HashMap::new(), tx };

    loop {
        let incoming = tokio::select! {
            line = framed.next() => match line {
                Some(line) => Incoming::Line(line),
                None => break,
            },
            Some(effect) = effects.recv() => Incoming::Effect(effect),
        };

        let line = match incoming {
            Incoming::Effect(effect) => {
                framed.send(encode(&serde_json::json!({ "effect": effect }))).await?;
                continue;
            }
            Incoming::Line(Ok(line)) => line,
            Incoming::Line(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let r = Response::failure("line_too_long", format!("request exceeds {MAX_LINE_LEN} bytes"));
                framed.send(encode(&r)).await?;
                continue;
            }
            Incoming::Line(Err(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(r) => r,
            Err(e) => {
                metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "error")
                    .increment(1);
                framed.send(encode(&Response::failure("bad_request", e.to_string()))).await?;
                continue;
            }
        };

        let op = request.op();
        let started = std::time::Instant::now();
        let response = match request {
            Request::Listen { organizer_id } => {
                listeners.listen(&engine, organizer_id);
                Response::ok()
            }
            Request::Unlisten { organizer_id } => {
                listeners.unlisten(organizer_id);
                Response::ok()
            }
            other => execute(&engine, other).await,
        };
        let status = if response.ok { "ok" } else { "error" };
        metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => status)
            .increment(1);
        metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
        tracing::debug!("{op}: {status} in {:?}", started.elapsed());

        framed.send(encode(&response)).await?;
    }
    Ok(())
}
