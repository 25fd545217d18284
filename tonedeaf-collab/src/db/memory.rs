use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    Database, DatabaseError, DatabaseResult, NewPlay, NewRoom, NewSharedPlaylist, PlayData,
    PlaylistData, PrimaryKey, RoomData, SongData, UserData,
};

/// A single-process [Database] that keeps everything in memory.
///
/// Enforces the same unique and foreign key constraints as the postgres
/// schema, so tests can stand it in for postgres.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    last_id: PrimaryKey,
    users: Vec<UserData>,
    songs: Vec<SongData>,
    rooms: Vec<RoomData>,
    /// (room_id, user_id)
    room_members: Vec<(PrimaryKey, PrimaryKey)>,
    playlists: Vec<PlaylistRecord>,
    /// (room_id, playlist_id)
    room_playlists: Vec<(PrimaryKey, PrimaryKey)>,
    /// (playlist_id, song_id)
    playlist_songs: Vec<(PrimaryKey, PrimaryKey)>,
    plays: Vec<PlayData>,
}

struct PlaylistRecord {
    id: PrimaryKey,
    name: String,
    user_id: PrimaryKey,
}

impl Tables {
    fn next_id(&mut self) -> PrimaryKey {
        self.last_id += 1;
        self.last_id
    }

    fn has_user(&self, user_id: PrimaryKey) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }

    fn has_room(&self, room_id: PrimaryKey) -> bool {
        self.rooms.iter().any(|r| r.id == room_id)
    }

    fn playlist_data(&self, playlist: &PlaylistRecord) -> PlaylistData {
        let room_id = self
            .room_playlists
            .iter()
            .find(|(_, playlist_id)| *playlist_id == playlist.id)
            .map(|(room_id, _)| *room_id);

        let songs = self
            .playlist_songs
            .iter()
            .filter(|(playlist_id, _)| *playlist_id == playlist.id)
            .filter_map(|(_, song_id)| self.songs.iter().find(|s| s.id == *song_id))
            .cloned()
            .collect();

        PlaylistData {
            id: playlist.id,
            name: playlist.name.clone(),
            user_id: playlist.user_id,
            room_id,
            songs,
        }
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user, as the REST layer would on sign up
    pub fn insert_user(&self, username: &str) -> UserData {
        let mut tables = self.tables.lock();

        let user = UserData {
            id: tables.next_id(),
            username: username.to_string(),
            display_name: username.to_string(),
        };

        tables.users.push(user.clone());
        user
    }

    /// Adds a song, as the upload pipeline would
    pub fn insert_song(&self, title: &str, artist: &str, user_id: PrimaryKey) -> SongData {
        let mut tables = self.tables.lock();

        let song = SongData {
            id: tables.next_id(),
            title: title.to_string(),
            artist: artist.to_string(),
            user_id,
        };

        tables.songs.push(song.clone());
        song
    }

    /// Returns the play history, oldest first
    pub fn plays(&self) -> Vec<PlayData> {
        self.tables.lock().plays.clone()
    }

    /// Returns how many membership rows exist for the user in the room
    pub fn membership_count(&self, room_id: PrimaryKey, user_id: PrimaryKey) -> usize {
        self.tables
            .lock()
            .room_members
            .iter()
            .filter(|&&member| member == (room_id, user_id))
            .count()
    }

    /// Returns how many times the song is linked to the playlist
    pub fn playlist_song_count(&self, playlist_id: PrimaryKey, song_id: PrimaryKey) -> usize {
        self.tables
            .lock()
            .playlist_songs
            .iter()
            .filter(|&&link| link == (playlist_id, song_id))
            .count()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> DatabaseResult<UserData> {
        self.tables
            .lock()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })
    }

    async fn song_by_id(&self, song_id: PrimaryKey) -> DatabaseResult<SongData> {
        self.tables
            .lock()
            .songs
            .iter()
            .find(|s| s.id == song_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "song",
                identifier: "id",
            })
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> DatabaseResult<RoomData> {
        self.tables
            .lock()
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            })
    }

    async fn room_by_code(&self, code: &str) -> DatabaseResult<RoomData> {
        self.tables
            .lock()
            .rooms
            .iter()
            .find(|r| r.code == code)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "room",
                identifier: "code",
            })
    }

    async fn create_room(&self, new_room: NewRoom) -> DatabaseResult<RoomData> {
        let mut tables = self.tables.lock();

        if tables.rooms.iter().any(|r| r.code == new_room.code) {
            return Err(DatabaseError::Conflict {
                resource: "room",
                field: "code",
                value: new_room.code,
            });
        }

        if !tables.has_user(new_room.host_id) {
            return Err(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            });
        }

        let room = RoomData {
            id: tables.next_id(),
            name: new_room.name,
            code: new_room.code,
            host_id: new_room.host_id,
        };

        tables.room_members.push((room.id, room.host_id));
        tables.rooms.push(room.clone());

        Ok(room)
    }

    async fn create_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> DatabaseResult<()> {
        let mut tables = self.tables.lock();

        if !tables.has_room(room_id) || !tables.has_user(user_id) {
            return Err(DatabaseError::NotFound {
                resource: "room member",
                identifier: "room_id:user_id",
            });
        }

        if tables.room_members.contains(&(room_id, user_id)) {
            return Err(DatabaseError::Conflict {
                resource: "room member",
                field: "room:user",
                value: format!("{}:{}", room_id, user_id),
            });
        }

        tables.room_members.push((room_id, user_id));
        Ok(())
    }

    async fn delete_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> DatabaseResult<()> {
        let mut tables = self.tables.lock();
        let before = tables.room_members.len();

        tables
            .room_members
            .retain(|&member| member != (room_id, user_id));

        if tables.room_members.len() == before {
            return Err(DatabaseError::NotFound {
                resource: "room member",
                identifier: "room_id:user_id",
            });
        }

        Ok(())
    }

    async fn playlist_by_id(&self, playlist_id: PrimaryKey) -> DatabaseResult<PlaylistData> {
        let tables = self.tables.lock();

        tables
            .playlists
            .iter()
            .find(|p| p.id == playlist_id)
            .map(|p| tables.playlist_data(p))
            .ok_or(DatabaseError::NotFound {
                resource: "playlist",
                identifier: "id",
            })
    }

    async fn create_shared_playlist(
        &self,
        new_playlist: NewSharedPlaylist,
    ) -> DatabaseResult<PlaylistData> {
        let mut tables = self.tables.lock();

        if !tables.has_user(new_playlist.user_id) {
            return Err(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            });
        }

        if !tables.has_room(new_playlist.room_id) {
            return Err(DatabaseError::NotFound {
                resource: "room",
                identifier: "id",
            });
        }

        let playlist = PlaylistRecord {
            id: tables.next_id(),
            name: new_playlist.name,
            user_id: new_playlist.user_id,
        };

        tables
            .room_playlists
            .push((new_playlist.room_id, playlist.id));
        let data = tables.playlist_data(&playlist);
        tables.playlists.push(playlist);

        Ok(data)
    }

    async fn create_playlist_song(
        &self,
        playlist_id: PrimaryKey,
        song_id: PrimaryKey,
    ) -> DatabaseResult<()> {
        let mut tables = self.tables.lock();

        if !tables.songs.iter().any(|s| s.id == song_id) {
            return Err(DatabaseError::NotFound {
                resource: "song",
                identifier: "id",
            });
        }

        if !tables.playlists.iter().any(|p| p.id == playlist_id) {
            return Err(DatabaseError::NotFound {
                resource: "playlist",
                identifier: "id",
            });
        }

        if tables.playlist_songs.contains(&(playlist_id, song_id)) {
            return Err(DatabaseError::Conflict {
                resource: "playlist song",
                field: "playlist:song",
                value: format!("{}:{}", playlist_id, song_id),
            });
        }

        tables.playlist_songs.push((playlist_id, song_id));
        Ok(())
    }

    async fn create_play(&self, new_play: NewPlay) -> DatabaseResult<()> {
        let mut tables = self.tables.lock();

        if !tables.songs.iter().any(|s| s.id == new_play.song_id) {
            return Err(DatabaseError::NotFound {
                resource: "song",
                identifier: "id",
            });
        }

        tables.plays.push(PlayData {
            user_id: new_play.user_id,
            song_id: new_play.song_id,
            played_at: new_play.played_at,
        });

        Ok(())
    }
}
