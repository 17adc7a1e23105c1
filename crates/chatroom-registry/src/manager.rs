use chatroom_core::types::{HandlerId, RoomId, UserId};
use chatroom_protocol::ServerEvent;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::instrument;

/// One registered Session Handler's delivery path. `user_id` is carried
/// alongside the sender so `broadcast_except` can skip a handler without a
/// second lookup.
struct Handle {
    user_id: UserId,
    sender: mpsc::Sender<ServerEvent>,
}

/// `room_id → set<Handler>`, a `DashMap`-keyed-by-id shape with one inner
/// map per room so broadcast fan-out never touches unrelated rooms.
#[derive(Default)]
pub struct Registry {
    rooms: DashMap<RoomId, DashMap<HandlerId, Handle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, sender))]
    pub fn register(
        &self,
        room_id: &RoomId,
        handler_id: HandlerId,
        user_id: UserId,
        sender: mpsc::Sender<ServerEvent>,
    ) {
        let handlers = self.rooms.entry(room_id.clone()).or_default();
        handlers.insert(handler_id, Handle { user_id, sender });
    }

    #[instrument(skip(self))]
    pub fn unregister(&self, room_id: &RoomId, handler_id: &HandlerId) {
        if let Some(handlers) = self.rooms.get(room_id) {
            handlers.remove(handler_id);
        }
    }

    /// Enqueues `event` to every handler in the room. Uses the blocking
    /// `Sender::send` form rather than `try_send` so a slow consumer stalls
    /// only this fan-out's delivery to it, applying backpressure without
    /// dropping events for other handlers.
    #[instrument(skip(self, event))]
    pub async fn broadcast(&self, room_id: &RoomId, event: ServerEvent) {
        let Some(handlers) = self.rooms.get(room_id) else {
            return;
        };
        let senders: Vec<mpsc::Sender<ServerEvent>> =
            handlers.iter().map(|h| h.sender.clone()).collect();
        drop(handlers);
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    #[instrument(skip(self, event))]
    pub async fn broadcast_except(
        &self,
        room_id: &RoomId,
        event: ServerEvent,
        exclude_user_id: &UserId,
    ) {
        let Some(handlers) = self.rooms.get(room_id) else {
            return;
        };
        let senders: Vec<mpsc::Sender<ServerEvent>> = handlers
            .iter()
            .filter(|h| &h.user_id != exclude_user_id)
            .map(|h| h.sender.clone())
            .collect();
        drop(handlers);
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    #[instrument(skip(self))]
    pub fn get_online_user_ids(&self, room_id: &RoomId) -> std::collections::HashSet<UserId> {
        match self.rooms.get(room_id) {
            Some(handlers) => handlers.iter().map(|h| h.user_id.clone()).collect(),
            None => std::collections::HashSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ServerEvent {
        ServerEvent::Pong
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_handler() {
        let registry = Registry::new();
        let room = RoomId::from("room1");
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(&room, HandlerId::new(), UserId::from("alice"), tx_a);
        registry.register(&room, HandlerId::new(), UserId::from("bob"), tx_b);

        registry.broadcast(&room, event()).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_subject() {
        let registry = Registry::new();
        let room = RoomId::from("room1");
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.register(&room, HandlerId::new(), UserId::from("alice"), tx_a);
        registry.register(&room, HandlerId::new(), UserId::from("bob"), tx_b);

        registry
            .broadcast_except(&room, event(), &UserId::from("alice"))
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_removes_the_handler_from_online_set() {
        let registry = Registry::new();
        let room = RoomId::from("room1");
        let handler_id = HandlerId::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(&room, handler_id.clone(), UserId::from("alice"), tx);
        assert_eq!(registry.get_online_user_ids(&room).len(), 1);

        registry.unregister(&room, &handler_id);
        assert_eq!(registry.get_online_user_ids(&room).len(), 0);
    }
}
