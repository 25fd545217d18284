mod connection;

pub use connection::*;

use log::{info, warn};
use tonedeaf_core::random_string;

use crate::{CollabContext, CollabError, NewRoom, RoomData, ServerEvent};

/// Carries out the room lifecycle of connections: create, join and leave
pub struct RoomManager {
    context: CollabContext,
}

impl RoomManager {
    /// How many fresh codes to try before giving up on creating a room
    const CREATE_ATTEMPTS: usize = 3;

    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a room hosted by the connection's user and subscribes to it
    pub async fn create_room(
        &self,
        connection: &Connection,
        name: String,
    ) -> Result<RoomData, CollabError> {
        let mut attempt = 0;

        let room = loop {
            attempt += 1;

            let new_room = NewRoom {
                code: random_string(self.context.config.join_code_length),
                name: name.clone(),
                host_id: connection.user_id(),
            };

            match self.context.database.create_room(new_room).await {
                Ok(room) => break room,
                Err(err) if err.is_conflict() && attempt < Self::CREATE_ATTEMPTS => {
                    warn!("Join code collision on attempt {}, retrying", attempt);
                }
                Err(err) => return Err(CollabError::unexpected("create room")(err)),
            }
        };

        connection.subscribe(&room.code);
        connection.send(ServerEvent::RoomCreated {
            code: room.code.clone(),
            name: room.name.clone(),
        });

        info!("User {} created room {}", connection.user_id(), room.id);
        Ok(room)
    }

    /// Joins the room with the given code. Joining twice is harmless.
    pub async fn join_room(&self, connection: &Connection, code: &str) -> Result<(), CollabError> {
        let room = self
            .context
            .database
            .room_by_code(code)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    CollabError::InvalidRoomCode
                } else {
                    CollabError::unexpected("join room")(err)
                }
            })?;

        let subscribed = connection.subscribe(&room.code);

        match self
            .context
            .database
            .create_room_member(room.id, connection.user_id())
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {}
            Err(err) => {
                // A socket already in the room keeps listening
                if subscribed {
                    connection.unsubscribe(&room.code);
                }
                return Err(CollabError::unexpected("join room")(err));
            }
        }

        connection.send_to_others(
            &room.code,
            ServerEvent::UserJoined {
                user_id: connection.user_id(),
            },
        );

        info!("User {} joined room {}", connection.user_id(), room.id);
        Ok(())
    }

    /// Leaves the room with the given code.
    ///
    /// Membership is not checked first: leaving a room one never joined, or one
    /// that doesn't exist, still tells that room the user left.
    pub async fn leave_room(&self, connection: &Connection, code: &str) -> Result<(), CollabError> {
        match self.context.database.room_by_code(code).await {
            Ok(room) => {
                let deleted = self
                    .context
                    .database
                    .delete_room_member(room.id, connection.user_id())
                    .await;

                match deleted {
                    Ok(()) => info!("User {} left room {}", connection.user_id(), room.id),
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(CollabError::unexpected("leave room")(err)),
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(CollabError::unexpected("leave room")(err)),
        }

        connection.send_to_others(
            code,
            ServerEvent::UserLeftRoom {
                user_id: connection.user_id(),
            },
        );
        connection.unsubscribe(code);

        Ok(())
    }
}
