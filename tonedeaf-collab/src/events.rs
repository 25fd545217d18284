use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tonedeaf_core::PresenceStatus;
use validator::Validate;

use crate::{
    serialized::{Playlist, Song, User},
    CollabError, PrimaryKey,
};

/// A frame as it arrives, before the payload is looked at
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Everything a client can ask of the collab system
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    CreateRoom(CreateRoomPayload),
    JoinRoom(JoinCodePayload),
    LeaveRoom(JoinCodePayload),
    StreamSong(SongPayload),
    NextSong(SongPayload),
    PreviousSong(SongPayload),
    PlaySong(RoomPayload),
    PauseSong(RoomPayload),
    SendMessage(MessagePayload),
    CreatePlaylist(CreatePlaylistPayload),
    AddSongToPlaylist(AddSongPayload),
    #[serde(rename = "get:presence")]
    GetPresence(PresencePayload),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomPayload {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinCodePayload {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    #[validate(length(min = 1, max = 64))]
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SongPayload {
    pub song_id: PrimaryKey,
    #[validate(length(min = 1, max = 64))]
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[validate(length(min = 1, max = 64))]
    pub room_code: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaylistPayload {
    #[validate(length(min = 1, max = 64))]
    pub room_code: String,
    #[validate(length(min = 1, max = 128))]
    pub playlist_name: String,
    /// A song to seed the playlist with
    #[serde(default)]
    pub song_id: Option<PrimaryKey>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddSongPayload {
    pub playlist_id: PrimaryKey,
    pub song_id: PrimaryKey,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    #[validate(length(max = 500))]
    pub user_ids: Vec<PrimaryKey>,
}

impl ClientEvent {
    pub const NAMES: [&'static str; 12] = [
        "create-room",
        "join-room",
        "leave-room",
        "stream-song",
        "next-song",
        "previous-song",
        "play-song",
        "pause-song",
        "send-message",
        "create-playlist",
        "add-song-to-playlist",
        "get:presence",
    ];

    /// Parses and validates a text frame
    pub fn parse(text: &str) -> Result<Self, CollabError> {
        let frame: Frame = serde_json::from_str(text).map_err(|_| CollabError::Malformed)?;

        if !Self::NAMES.contains(&frame.event.as_str()) {
            return Err(CollabError::UnknownEvent(frame.event));
        }

        let invalid = || CollabError::InvalidPayload(frame.event.clone());

        let event: Self = serde_json::from_value(json!({
            "event": frame.event,
            "data": frame.data,
        }))
        .map_err(|_| invalid())?;

        event.validate_payload().map_err(|_| invalid())?;

        Ok(event)
    }

    fn validate_payload(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            Self::CreateRoom(payload) => payload.validate(),
            Self::JoinRoom(payload) | Self::LeaveRoom(payload) => payload.validate(),
            Self::StreamSong(payload) | Self::NextSong(payload) | Self::PreviousSong(payload) => {
                payload.validate()
            }
            Self::PlaySong(payload) | Self::PauseSong(payload) => payload.validate(),
            Self::SendMessage(payload) => payload.validate(),
            Self::CreatePlaylist(payload) => payload.validate(),
            Self::AddSongToPlaylist(payload) => payload.validate(),
            Self::GetPresence(payload) => payload.validate(),
        }
    }
}

/// One side of a bulk presence answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceGroup {
    pub user_ids: Vec<PrimaryKey>,
    pub status: PresenceStatus,
}

/// Everything the collab system sends to clients, directly or through a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Sent to the creator only
    RoomCreated { code: String, name: String },
    UserJoined { user_id: PrimaryKey },
    UserLeftRoom { user_id: PrimaryKey },
    SongStreamed { song: Song, user: User },
    NextSongPlayed { song: Song, user_id: PrimaryKey },
    PreviousSongPlayed { song: Song, user_id: PrimaryKey },
    SongPlayed { user_id: PrimaryKey },
    SongPaused { user_id: PrimaryKey },
    MessageReceived { message: String, user_id: PrimaryKey },
    PlaylistCreated {
        playlist: Playlist,
        creator: User,
        /// The initial song, if it could be added
        song: Option<Song>,
    },
    SongAddedToPlaylist { playlist: Playlist, song: Song },
    #[serde(rename = "presence:update")]
    PresenceUpdate(Vec<PresenceGroup>),
    #[serde(rename = "user:presence")]
    UserPresence {
        user_id: PrimaryKey,
        status: PresenceStatus,
    },
    Error { message: String },
    Warning { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }
}
