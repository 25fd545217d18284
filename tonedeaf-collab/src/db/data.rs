use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// A tonedeaf account
#[derive(Debug, Clone, FromRow)]
pub struct UserData {
    pub id: PrimaryKey,
    pub username: String,
    pub display_name: String,
}

/// An uploaded song
#[derive(Debug, Clone, FromRow)]
pub struct SongData {
    pub id: PrimaryKey,
    pub title: String,
    pub artist: String,
    /// The uploader
    pub user_id: PrimaryKey,
}

/// A listening room
#[derive(Debug, Clone, FromRow)]
pub struct RoomData {
    pub id: PrimaryKey,
    pub name: String,
    /// The code members use to join the room
    pub code: String,
    pub host_id: PrimaryKey,
}

/// A playlist, shared with a room if `room_id` is set
#[derive(Debug, Clone)]
pub struct PlaylistData {
    pub id: PrimaryKey,
    pub name: String,
    /// The owner of the playlist
    pub user_id: PrimaryKey,
    pub room_id: Option<PrimaryKey>,
    pub songs: Vec<SongData>,
}

/// A play-history entry
#[derive(Debug, Clone)]
pub struct PlayData {
    pub user_id: PrimaryKey,
    pub song_id: PrimaryKey,
    pub played_at: DateTime<Utc>,
}
