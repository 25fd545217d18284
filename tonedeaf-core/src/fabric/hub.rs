use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::SocketId;

/// The sockets connected to this process, and the rooms they are subscribed to
pub struct Hub<E> {
    sockets: DashMap<SocketId, UnboundedSender<E>>,
    rooms: DashMap<String, HashSet<SocketId>>,
}

impl<E> Hub<E>
where
    E: Clone,
{
    pub fn register(&self, socket_id: SocketId, sender: UnboundedSender<E>) {
        self.sockets.insert(socket_id, sender);
    }

    /// Removes the socket and all of its room subscriptions
    pub fn unregister(&self, socket_id: SocketId) {
        self.sockets.remove(&socket_id);
        self.rooms.retain(|_, members| {
            members.remove(&socket_id);
            !members.is_empty()
        });
    }

    pub fn join(&self, room: &str, socket_id: SocketId) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket_id);
    }

    pub fn leave(&self, room: &str, socket_id: SocketId) {
        self.rooms.remove_if_mut(room, |_, members| {
            members.remove(&socket_id);
            members.is_empty()
        });
    }

    /// Sends an event to a single socket, returning false if it's gone
    pub fn send(&self, socket_id: SocketId, event: E) -> bool {
        self.sockets
            .get(&socket_id)
            .map(|sender| sender.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Sends an event to every local socket in the room, except `except`.
    /// Returns how many sockets it was handed to.
    pub fn deliver(&self, room: &str, event: &E, except: Option<SocketId>) -> usize {
        let recipients: Vec<_> = self
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|id| Some(*id) != except)
                    .collect()
            })
            .unwrap_or_default();

        recipients
            .into_iter()
            .filter(|id| self.send(*id, event.clone()))
            .count()
    }
}

impl<E> Default for Hub<E> {
    fn default() -> Self {
        Self {
            sockets: Default::default(),
            rooms: Default::default(),
        }
    }
}
