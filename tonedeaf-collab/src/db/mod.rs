use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod data;
pub use data::*;

#[cfg(any(test, feature = "test-util"))]
mod memory;
#[cfg(any(test, feature = "test-util"))]
pub use memory::*;

mod pg;
pub use pg::*;

pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

/// The only failure kinds callers of [Database] ever need to tell apart
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A unique constraint is already satisfied by an existing row
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// The durable store rooms, memberships and shared playlists live in.
///
/// Uniqueness is enforced by the store itself and reported as
/// [DatabaseError::Conflict], never checked up front by callers.
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> DatabaseResult<UserData>;
    async fn song_by_id(&self, song_id: PrimaryKey) -> DatabaseResult<SongData>;

    async fn room_by_id(&self, room_id: PrimaryKey) -> DatabaseResult<RoomData>;
    async fn room_by_code(&self, code: &str) -> DatabaseResult<RoomData>;
    /// Creates the room and the host's membership together
    async fn create_room(&self, new_room: NewRoom) -> DatabaseResult<RoomData>;
    /// Fails with a conflict if the user is already a member
    async fn create_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey)
        -> DatabaseResult<()>;
    /// Fails with not found if the user isn't a member
    async fn delete_room_member(&self, room_id: PrimaryKey, user_id: PrimaryKey)
        -> DatabaseResult<()>;

    async fn playlist_by_id(&self, playlist_id: PrimaryKey) -> DatabaseResult<PlaylistData>;
    /// Creates the playlist and its room link together
    async fn create_shared_playlist(&self, new_playlist: NewSharedPlaylist)
        -> DatabaseResult<PlaylistData>;
    /// Fails with a conflict if the song is already in the playlist
    async fn create_playlist_song(&self, playlist_id: PrimaryKey, song_id: PrimaryKey)
        -> DatabaseResult<()>;

    async fn create_play(&self, new_play: NewPlay) -> DatabaseResult<()>;
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub code: String,
    pub name: String,
    /// The creator of the room
    pub host_id: PrimaryKey,
}

#[derive(Debug, Clone)]
pub struct NewSharedPlaylist {
    pub name: String,
    pub room_id: PrimaryKey,
    /// The owner of the new playlist
    pub user_id: PrimaryKey,
}

#[derive(Debug, Clone)]
pub struct NewPlay {
    pub user_id: PrimaryKey,
    pub song_id: PrimaryKey,
    pub played_at: DateTime<Utc>,
}
