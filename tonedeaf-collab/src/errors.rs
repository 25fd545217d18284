use thiserror::Error;

use crate::{DatabaseError, ServerEvent};

/// Why a client message could not be carried out.
///
/// Every variant is answered to the acting connection only, never to its room.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("Malformed message")]
    Malformed,
    #[error("Unknown event {0}")]
    UnknownEvent(String),
    #[error("Invalid {0} payload")]
    InvalidPayload(String),
    #[error("Invalid room code")]
    InvalidRoomCode,
    #[error("Song does not exist")]
    SongNotFound,
    #[error("Playlist does not exist")]
    PlaylistNotFound,
    /// The store failed in a way the client can't do anything about
    #[error("Could not {action}, please try again")]
    Unexpected {
        action: &'static str,
        #[source]
        source: DatabaseError,
    },
}

impl CollabError {
    /// Returns a closure wrapping a store failure for the given action
    pub fn unexpected(action: &'static str) -> impl FnOnce(DatabaseError) -> Self {
        move |source| Self::Unexpected { action, source }
    }

    /// The error event the acting client receives
    pub fn notice(&self) -> ServerEvent {
        ServerEvent::error(self.to_string())
    }
}
