use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Effect;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed side effects.
///
/// Every effect goes to the firehose (`subscribe_all`, used by the dispatcher).
/// Effects addressed to an organizer also go to that organizer's channel, if
/// anyone listens there.
/// Delivery is at-most-once: lagging or absent receivers miss effects.
pub struct NotifyHub {
    all: broadcast::Sender<Effect>,
    organizers: DashMap<Ulid, broadcast::Sender<Effect>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            organizers: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Effect> {
        self.all.subscribe()
    }

    /// Effects about one organizer's bookings. Creates the channel if needed.
    pub fn subscribe(&self, organizer_id: Ulid) -> broadcast::Receiver<Effect> {
        self.organizers
            .entry(organizer_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op for channels nobody listens on.
    pub fn send(&self, effect: &Effect) {
        let _ = self.all.send(effect.clone());
        if effect.notifies_organizer() {
            let organizer_id = effect.organizer_id();
            let stale = match self.organizers.get(&organizer_id) {
                Some(sender) => sender.send(effect.clone()).is_err(),
                None => false,
            };
            if stale {
                self.organizers
                    .remove_if(&organizer_id, |_, sender| sender.receiver_count() == 0);
            }
        }
        metrics::counter!(crate::observability::EFFECTS_PUBLISHED_TOTAL, "kind" => effect.label())
            .increment(1);
    }

    pub fn publish_all(&self, effects: &[Effect]) {
        for effect in effects {
            self.send(effect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(organizer_id: Ulid) -> Effect {
        Effect::CancellationNotification {
            booking_id: Ulid::new(),
            organizer_id,
        }
    }

    #[tokio::test]
    async fn firehose_sees_everything() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe_all();
        let a = cancelled(Ulid::new());
        let b = cancelled(Ulid::new());
        hub.publish_all(&[a.clone(), b.clone()]);
        assert_eq!(rx.recv().await.unwrap(), a);
        assert_eq!(rx.recv().await.unwrap(), b);
    }

    #[tokio::test]
    async fn organizer_channel_is_filtered() {
        let hub = NotifyHub::new();
        let me = Ulid::new();
        let mut rx = hub.subscribe(me);
        hub.send(&cancelled(Ulid::new()));
        let mine = cancelled(me);
        hub.send(&mine);
        assert_eq!(rx.recv().await.unwrap(), mine);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn admin_requests_skip_the_organizer_channel() {
        let hub = NotifyHub::new();
        let me = Ulid::new();
        let mut mine = hub.subscribe(me);
        let mut all = hub.subscribe_all();
        let requested = Effect::BookingRequested {
            booking_id: Ulid::new(),
            venue_id: Ulid::new(),
            organizer_id: me,
        };
        let cancellation = cancelled(me);
        hub.send(&requested);
        hub.send(&cancellation);
        assert_eq!(all.recv().await.unwrap(), requested);
        assert_eq!(all.recv().await.unwrap(), cancellation);
        assert_eq!(mine.recv().await.unwrap(), cancellation);
        assert!(mine.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&cancelled(Ulid::new()));
    }

    #[tokio::test]
    async fn dropped_organizer_channel_is_pruned() {
        let hub = NotifyHub::new();
        let me = Ulid::new();
        drop(hub.subscribe(me));
        hub.send(&cancelled(me));
        assert!(hub.organizers.get(&me).is_none());
    }
}
