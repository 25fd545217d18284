use async_trait::async_trait;
use sqlx::{
    postgres::PgPoolOptions, query, query_as, Error as SqlxError, FromRow, PgPool,
};

use crate::{
    Database, DatabaseError, DatabaseResult, IntoDatabaseError, NewPlay, NewRoom,
    NewSharedPlaylist, PlaylistData, PrimaryKey, RoomData, SongData, UserData,
};

/// A postgres database implementation for tonedeaf
pub struct PgDatabase {
    pool: PgPool,
}

#[derive(FromRow)]
struct PlaylistRow {
    id: PrimaryKey,
    name: String,
    user_id: PrimaryKey,
    room_id: Option<PrimaryKey>,
}

impl PgDatabase {
    pub async fn new(url: &str) -> DatabaseResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        Ok(Self { pool })
    }

    /// Applies the embedded migrations
    pub async fn migrate(&self) -> DatabaseResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))
    }

    async fn playlist_songs(&self, playlist_id: PrimaryKey) -> DatabaseResult<Vec<SongData>> {
        query_as(
            "
            SELECT songs.id, songs.title, songs.artist, songs.user_id
            FROM playlist_songs
                INNER JOIN songs ON playlist_songs.song_id = songs.id
            WHERE playlist_songs.playlist_id = $1
            ORDER BY playlist_songs.id",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> DatabaseResult<UserData> {
        query_as("SELECT id, username, display_name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))
    }

    async fn song_by_id(&self, song_id: PrimaryKey) -> DatabaseResult<SongData> {
        query_as("SELECT id, title, artist, user_id FROM songs WHERE id = $1")
            .bind(song_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("song", "id"))
    }

    async fn room_by_id(&self, room_id: PrimaryKey) -> DatabaseResult<RoomData> {
        query_as("SELECT id, name, code, host_id FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "id"))
    }

    async fn room_by_code(&self, code: &str) -> DatabaseResult<RoomData> {
        query_as("SELECT id, name, code, host_id FROM rooms WHERE code = $1")
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("room", "code"))
    }

    async fn create_room(&self, new_room: NewRoom) -> DatabaseResult<RoomData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let room: RoomData = query_as(
            "
            INSERT INTO rooms (name, code, host_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, code, host_id",
        )
        .bind(&new_room.name)
        .bind(&new_room.code)
        .bind(new_room.host_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.conflict_or("room", "code", &new_room.code))?;

        // The host is a member before anyone can learn the code
        query("INSERT INTO room_members (room_id, user_id) VALUES ($1, $2)")
            .bind(room.id)
            .bind(room.host_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(room)
    }

    async fn create_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> DatabaseResult<()> {
        let result = query(
            "
            INSERT INTO room_members (room_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (room_id, user_id) DO NOTHING",
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.missing_or("room member", "room_id:user_id"))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict {
                resource: "room member",
                field: "room:user",
                value: format!("{}:{}", room_id, user_id),
            });
        }

        Ok(())
    }

    async fn delete_room_member(
        &self,
        room_id: PrimaryKey,
        user_id: PrimaryKey,
    ) -> DatabaseResult<()> {
        let result = query("DELETE FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "room member",
                identifier: "room_id:user_id",
            });
        }

        Ok(())
    }

    async fn playlist_by_id(&self, playlist_id: PrimaryKey) -> DatabaseResult<PlaylistData> {
        let row: PlaylistRow = query_as(
            "
            SELECT playlists.id, playlists.name, playlists.user_id, room_playlists.room_id
            FROM playlists
                LEFT JOIN room_playlists ON room_playlists.playlist_id = playlists.id
            WHERE playlists.id = $1",
        )
        .bind(playlist_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("playlist", "id"))?;

        let songs = self.playlist_songs(row.id).await?;

        Ok(PlaylistData {
            id: row.id,
            name: row.name,
            user_id: row.user_id,
            room_id: row.room_id,
            songs,
        })
    }

    async fn create_shared_playlist(
        &self,
        new_playlist: NewSharedPlaylist,
    ) -> DatabaseResult<PlaylistData> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let (playlist_id,): (PrimaryKey,) =
            query_as("INSERT INTO playlists (name, user_id) VALUES ($1, $2) RETURNING id")
                .bind(&new_playlist.name)
                .bind(new_playlist.user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| e.missing_or("user", "id"))?;

        query("INSERT INTO room_playlists (room_id, playlist_id) VALUES ($1, $2)")
            .bind(new_playlist.room_id)
            .bind(playlist_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.missing_or("room", "id"))?;

        tx.commit().await.map_err(|e| e.any())?;

        Ok(PlaylistData {
            id: playlist_id,
            name: new_playlist.name,
            user_id: new_playlist.user_id,
            room_id: Some(new_playlist.room_id),
            songs: vec![],
        })
    }

    async fn create_playlist_song(
        &self,
        playlist_id: PrimaryKey,
        song_id: PrimaryKey,
    ) -> DatabaseResult<()> {
        // Ensure the song exists, so a missing song isn't blamed on the playlist
        self.song_by_id(song_id).await?;

        let result = query(
            "
            INSERT INTO playlist_songs (playlist_id, song_id)
            VALUES ($1, $2)
            ON CONFLICT (playlist_id, song_id) DO NOTHING",
        )
        .bind(playlist_id)
        .bind(song_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.missing_or("playlist", "id"))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict {
                resource: "playlist song",
                field: "playlist:song",
                value: format!("{}:{}", playlist_id, song_id),
            });
        }

        Ok(())
    }

    async fn create_play(&self, new_play: NewPlay) -> DatabaseResult<()> {
        query("INSERT INTO plays (user_id, song_id, played_at) VALUES ($1, $2, $3)")
            .bind(new_play.user_id)
            .bind(new_play.song_id)
            .bind(new_play.played_at)
            .execute(&self.pool)
            .await
            .map_err(|e| e.missing_or("song", "id"))
            .map(|_| ())
    }
}

/// Maps postgres constraint violations to store errors
trait ConstraintError {
    /// Maps a unique violation to a conflict
    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str)
        -> DatabaseError;
    /// Maps a foreign key violation to not found
    fn missing_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
}

impl ConstraintError for SqlxError {
    fn conflict_or(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> DatabaseError {
        if let SqlxError::Database(e) = &self {
            if e.is_unique_violation() {
                return DatabaseError::Conflict {
                    resource,
                    field,
                    value: value.to_string(),
                };
            }
        }

        self.any()
    }

    fn missing_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        if let SqlxError::Database(e) = &self {
            if e.is_foreign_key_violation() {
                return DatabaseError::NotFound {
                    resource,
                    identifier,
                };
            }
        }

        self.any()
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }
}
