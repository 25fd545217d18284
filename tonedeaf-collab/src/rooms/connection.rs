use std::{collections::BTreeSet, sync::Arc};

use log::info;
use parking_lot::Mutex;
use tonedeaf_core::{Heartbeat, SocketId};

use crate::{PrimaryKey, RoomFabric, ServerEvent};

/// An authenticated socket, as seen by the collab system.
///
/// Only [crate::Collab::connect] creates one, so holding a connection means
/// the user id was verified at the handshake. Dropping it is the disconnect:
/// the socket leaves every room on this process and the presence heartbeat
/// stops, while durable memberships stay untouched.
pub struct Connection {
    id: SocketId,
    user_id: PrimaryKey,
    /// Codes of the rooms this socket is subscribed to
    rooms: Mutex<BTreeSet<String>>,
    fabric: Arc<RoomFabric>,
    _heartbeat: Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InRoom(Vec<String>),
}

impl Connection {
    pub(crate) fn new(
        id: SocketId,
        user_id: PrimaryKey,
        fabric: Arc<RoomFabric>,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            id,
            user_id,
            rooms: Default::default(),
            fabric,
            _heartbeat: heartbeat,
        }
    }

    pub fn user_id(&self) -> PrimaryKey {
        self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        let rooms = self.rooms.lock();

        if rooms.is_empty() {
            ConnectionState::Idle
        } else {
            ConnectionState::InRoom(rooms.iter().cloned().collect())
        }
    }

    /// Sends an event to this socket only
    pub fn send(&self, event: ServerEvent) {
        self.fabric.send(self.id, event);
    }

    /// Sends an event to everyone in the room, this socket included exactly once
    pub(crate) fn send_with_room(&self, code: &str, event: ServerEvent) {
        self.fabric.to_room(code, event.clone(), Some(self.id));
        self.send(event);
    }

    /// Sends an event to everyone in the room except this socket
    pub(crate) fn send_to_others(&self, code: &str, event: ServerEvent) {
        self.fabric.to_room(code, event, Some(self.id));
    }

    /// Returns false if the socket was already subscribed
    pub(crate) fn subscribe(&self, code: &str) -> bool {
        self.fabric.join(code, self.id);
        self.rooms.lock().insert(code.to_string())
    }

    pub(crate) fn unsubscribe(&self, code: &str) {
        self.fabric.leave(code, self.id);
        self.rooms.lock().remove(code);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.fabric.unregister(self.id);

        info!("User {} disconnected (socket {})", self.user_id, self.id);
    }
}
