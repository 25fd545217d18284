use chrono::Utc;
use log::{info, warn};

use crate::{
    rooms::Connection,
    serialized::ToSerialized,
    AddSongPayload, CollabContext, CollabError, CreatePlaylistPayload, DatabaseError,
    MessagePayload, NewPlay, NewSharedPlaylist, PrimaryKey, RoomPayload, ServerEvent, SongData,
    SongPayload,
};

/// How a song was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayKind {
    Stream,
    Next,
    Previous,
}

impl PlayKind {
    fn action(&self) -> &'static str {
        match self {
            Self::Stream => "stream song",
            Self::Next => "play next song",
            Self::Previous => "play previous song",
        }
    }
}

/// Relays playback, chat and shared playlist changes between room members
pub struct Playback {
    context: CollabContext,
}

impl Playback {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Records the play and tells the rest of the room which song started
    pub async fn play(
        &self,
        connection: &Connection,
        kind: PlayKind,
        payload: SongPayload,
    ) -> Result<(), CollabError> {
        let database = &self.context.database;
        let action = kind.action();
        let user_id = connection.user_id();

        let song = database
            .song_by_id(payload.song_id)
            .await
            .map_err(not_found_or(CollabError::SongNotFound, action))?
            .to_serialized();

        let event = match kind {
            PlayKind::Stream => {
                let user = database
                    .user_by_id(user_id)
                    .await
                    .map_err(CollabError::unexpected(action))?;

                ServerEvent::SongStreamed {
                    song,
                    user: user.to_serialized(),
                }
            }
            PlayKind::Next => ServerEvent::NextSongPlayed { song, user_id },
            PlayKind::Previous => ServerEvent::PreviousSongPlayed { song, user_id },
        };

        database
            .create_play(NewPlay {
                user_id,
                song_id: payload.song_id,
                played_at: Utc::now(),
            })
            .await
            .map_err(CollabError::unexpected(action))?;

        connection.send_to_others(&payload.room_code, event);
        Ok(())
    }

    pub fn resume(&self, connection: &Connection, payload: RoomPayload) {
        connection.send_to_others(
            &payload.room_code,
            ServerEvent::SongPlayed {
                user_id: connection.user_id(),
            },
        );
    }

    pub fn pause(&self, connection: &Connection, payload: RoomPayload) {
        connection.send_to_others(
            &payload.room_code,
            ServerEvent::SongPaused {
                user_id: connection.user_id(),
            },
        );
    }

    /// Chat is relayed as is and never stored
    pub fn send_message(&self, connection: &Connection, payload: MessagePayload) {
        connection.send_to_others(
            &payload.room_code,
            ServerEvent::MessageReceived {
                message: payload.message,
                user_id: connection.user_id(),
            },
        );
    }

    /// Creates a playlist shared with the room, optionally seeded with a song.
    ///
    /// A seed song that can't be added doesn't stop the playlist from being
    /// created; the creator gets a warning instead.
    pub async fn create_playlist(
        &self,
        connection: &Connection,
        payload: CreatePlaylistPayload,
    ) -> Result<(), CollabError> {
        const ACTION: &str = "create playlist";

        let database = &self.context.database;

        let room = database
            .room_by_code(&payload.room_code)
            .await
            .map_err(not_found_or(CollabError::InvalidRoomCode, ACTION))?;

        let creator = database
            .user_by_id(connection.user_id())
            .await
            .map_err(CollabError::unexpected(ACTION))?;

        let mut playlist = database
            .create_shared_playlist(NewSharedPlaylist {
                name: payload.playlist_name,
                room_id: room.id,
                user_id: creator.id,
            })
            .await
            .map_err(CollabError::unexpected(ACTION))?;

        let song = match payload.song_id {
            None => None,
            Some(song_id) => match self.seed_playlist(playlist.id, song_id).await {
                Ok(song) => Some(song),
                Err(err) => {
                    warn!(
                        "Could not add song {} to new playlist {}: {}",
                        song_id, playlist.id, err
                    );
                    connection.send(ServerEvent::warning(
                        "Playlist was created, but the initial song could not be added",
                    ));
                    None
                }
            },
        };

        if let Some(song) = &song {
            playlist.songs.push(song.clone());
        }

        info!(
            "User {} created playlist {} in room {}",
            creator.id, playlist.id, room.id
        );

        connection.send_with_room(
            &room.code,
            ServerEvent::PlaylistCreated {
                playlist: playlist.to_serialized(),
                creator: creator.to_serialized(),
                song: song.map(|s| s.to_serialized()),
            },
        );

        Ok(())
    }

    /// Adds a song to a playlist, telling the playlist's room.
    /// A song that is already there only warns the actor.
    pub async fn add_song_to_playlist(
        &self,
        connection: &Connection,
        payload: AddSongPayload,
    ) -> Result<(), CollabError> {
        const ACTION: &str = "add song to playlist";

        let database = &self.context.database;

        let playlist = database
            .playlist_by_id(payload.playlist_id)
            .await
            .map_err(not_found_or(CollabError::PlaylistNotFound, ACTION))?;

        let song = database
            .song_by_id(payload.song_id)
            .await
            .map_err(not_found_or(CollabError::SongNotFound, ACTION))?;

        match database.create_playlist_song(playlist.id, song.id).await {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                connection.send(ServerEvent::warning("Song is already in this playlist"));
                return Ok(());
            }
            Err(err) => return Err(CollabError::unexpected(ACTION)(err)),
        }

        // Read back so the update carries the full song list
        let playlist = database
            .playlist_by_id(playlist.id)
            .await
            .map_err(CollabError::unexpected(ACTION))?;

        let event = ServerEvent::SongAddedToPlaylist {
            playlist: playlist.to_serialized(),
            song: song.to_serialized(),
        };

        match playlist.room_id {
            Some(room_id) => {
                let room = database
                    .room_by_id(room_id)
                    .await
                    .map_err(CollabError::unexpected(ACTION))?;

                connection.send_with_room(&room.code, event);
            }
            None => connection.send(event),
        }

        Ok(())
    }

    async fn seed_playlist(
        &self,
        playlist_id: PrimaryKey,
        song_id: PrimaryKey,
    ) -> Result<SongData, DatabaseError> {
        let song = self.context.database.song_by_id(song_id).await?;

        self.context
            .database
            .create_playlist_song(playlist_id, song.id)
            .await?;

        Ok(song)
    }
}

/// Maps not found to the given error, anything else to an unexpected failure
fn not_found_or(
    not_found: CollabError,
    action: &'static str,
) -> impl FnOnce(DatabaseError) -> CollabError {
    move |err| {
        if err.is_not_found() {
            not_found
        } else {
            CollabError::unexpected(action)(err)
        }
    }
}
