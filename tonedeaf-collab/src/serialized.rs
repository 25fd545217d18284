//! The shapes of durable records as they go out over the wire

use serde::{Deserialize, Serialize};

use crate::{PlaylistData, SongData, UserData};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: i32,
    pub title: String,
    pub artist: String,
    pub user_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: i32,
    pub name: String,
    pub user_id: i32,
    pub room_id: Option<i32>,
    pub songs: Vec<Song>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

impl ToSerialized<Song> for SongData {
    fn to_serialized(&self) -> Song {
        Song {
            id: self.id,
            title: self.title.clone(),
            artist: self.artist.clone(),
            user_id: self.user_id,
        }
    }
}

impl ToSerialized<Playlist> for PlaylistData {
    fn to_serialized(&self) -> Playlist {
        Playlist {
            id: self.id,
            name: self.name.clone(),
            user_id: self.user_id,
            room_id: self.room_id,
            songs: self.songs.to_serialized(),
        }
    }
}
