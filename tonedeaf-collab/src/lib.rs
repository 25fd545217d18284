mod auth;
mod db;
mod errors;
mod events;
mod playback;
mod rooms;
pub mod serialized;

use std::sync::Arc;

use log::{error, info};
use tokio::sync::mpsc::UnboundedSender;
use tonedeaf_core::{Config, Fabric, Presence, PresenceStatus, SocketId};

pub use auth::*;
pub use db::*;
pub use errors::*;
pub use events::*;
pub use playback::*;
pub use rooms::*;

/// The broadcast fabric carrying [ServerEvent]s between room members
pub type RoomFabric = Fabric<ServerEvent>;

/// The tonedeaf collab system, facilitating rooms, presence and synchronized playback.
pub struct Collab {
    context: CollabContext,

    pub auth: Auth,
    pub rooms: RoomManager,
    pub playback: Playback,
}

/// A type passed to various components of the collab system, to access state and emit events.
#[derive(Clone)]
pub struct CollabContext {
    pub config: Config,
    pub database: Arc<dyn Database>,
    pub presence: Presence,
    pub fabric: Arc<RoomFabric>,
}

impl Collab {
    pub fn new(
        config: Config,
        database: Arc<dyn Database>,
        presence: Presence,
        fabric: Arc<RoomFabric>,
        auth: Auth,
    ) -> Self {
        let context = CollabContext {
            config,
            database,
            presence,
            fabric,
        };

        Self {
            rooms: RoomManager::new(&context),
            playback: Playback::new(&context),
            auth,
            context,
        }
    }

    /// Attaches an authenticated socket, marking its user online.
    /// Events for the socket are pushed into `sender`.
    pub fn connect(&self, user_id: PrimaryKey, sender: UnboundedSender<ServerEvent>) -> Connection {
        let id = SocketId::new();

        self.context.fabric.register(id, sender);
        let heartbeat = self.context.presence.heartbeat(user_id);

        info!("User {} connected (socket {})", user_id, id);
        Connection::new(id, user_id, self.context.fabric.clone(), heartbeat)
    }

    /// Handles one text frame from the connection.
    ///
    /// Failures are answered to the connection alone and never end it.
    pub async fn handle_message(&self, connection: &Connection, text: &str) {
        let result = match ClientEvent::parse(text) {
            Ok(event) => self.dispatch(connection, event).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            if let CollabError::Unexpected { action, source } = &err {
                error!(
                    "Could not {} for user {}: {}",
                    action,
                    connection.user_id(),
                    source
                );
            }

            connection.send(err.notice());
        }
    }

    async fn dispatch(&self, connection: &Connection, event: ClientEvent) -> Result<(), CollabError> {
        match event {
            ClientEvent::CreateRoom(payload) => {
                self.rooms.create_room(connection, payload.name).await?;
            }
            ClientEvent::JoinRoom(payload) => {
                self.rooms.join_room(connection, &payload.code).await?;
            }
            ClientEvent::LeaveRoom(payload) => {
                self.rooms.leave_room(connection, &payload.code).await?;
            }
            ClientEvent::StreamSong(payload) => {
                self.playback.play(connection, PlayKind::Stream, payload).await?;
            }
            ClientEvent::NextSong(payload) => {
                self.playback.play(connection, PlayKind::Next, payload).await?;
            }
            ClientEvent::PreviousSong(payload) => {
                self.playback.play(connection, PlayKind::Previous, payload).await?;
            }
            ClientEvent::PlaySong(payload) => self.playback.resume(connection, payload),
            ClientEvent::PauseSong(payload) => self.playback.pause(connection, payload),
            ClientEvent::SendMessage(payload) => self.playback.send_message(connection, payload),
            ClientEvent::CreatePlaylist(payload) => {
                self.playback.create_playlist(connection, payload).await?;
            }
            ClientEvent::AddSongToPlaylist(payload) => {
                self.playback.add_song_to_playlist(connection, payload).await?;
            }
            ClientEvent::GetPresence(payload) => {
                self.report_presence(connection, &payload.user_ids).await;
            }
        }

        Ok(())
    }

    /// Answers who of the given users is online, as a summary and per user
    async fn report_presence(&self, connection: &Connection, user_ids: &[PrimaryKey]) {
        let report = self.context.presence.statuses(user_ids).await;

        connection.send(ServerEvent::PresenceUpdate(vec![
            PresenceGroup {
                user_ids: report.online(),
                status: PresenceStatus::Online,
            },
            PresenceGroup {
                user_ids: report.offline(),
                status: PresenceStatus::Offline,
            },
        ]));

        for (user_id, status) in report.statuses {
            connection.send(ServerEvent::UserPresence { user_id, status });
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::{
        sync::mpsc::{unbounded_channel, UnboundedReceiver},
        time::{sleep, timeout},
    };
    use tonedeaf_core::{LocalRelay, MemoryPresenceStore};

    use super::*;

    struct Harness {
        collab: Collab,
        database: Arc<MemoryDatabase>,
    }

    struct Client {
        connection: Connection,
        events: UnboundedReceiver<ServerEvent>,
    }

    struct Rejects;

    impl CredentialVerifier for Rejects {
        fn verify(&self, _token: &str) -> Result<PrimaryKey, AuthError> {
            Err(AuthError::InvalidToken)
        }
    }

    /// Fails membership inserts once `failing` is set
    struct FailingJoins {
        inner: Arc<MemoryDatabase>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Database for FailingJoins {
        async fn user_by_id(&self, user_id: PrimaryKey) -> DatabaseResult<UserData> {
            self.inner.user_by_id(user_id).await
        }

        async fn song_by_id(&self, song_id: PrimaryKey) -> DatabaseResult<SongData> {
            self.inner.song_by_id(song_id).await
        }

        async fn room_by_id(&self, room_id: PrimaryKey) -> DatabaseResult<RoomData> {
            self.inner.room_by_id(room_id).await
        }

        async fn room_by_code(&self, code: &str) -> DatabaseResult<RoomData> {
            self.inner.room_by_code(code).await
        }

        async fn create_room(&self, new_room: NewRoom) -> DatabaseResult<RoomData> {
            self.inner.create_room(new_room).await
        }

        async fn create_room_member(
            &self,
            room_id: PrimaryKey,
            user_id: PrimaryKey,
        ) -> DatabaseResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DatabaseError::Internal("connection reset".into()));
            }

            self.inner.create_room_member(room_id, user_id).await
        }

        async fn delete_room_member(
            &self,
            room_id: PrimaryKey,
            user_id: PrimaryKey,
        ) -> DatabaseResult<()> {
            self.inner.delete_room_member(room_id, user_id).await
        }

        async fn playlist_by_id(&self, playlist_id: PrimaryKey) -> DatabaseResult<PlaylistData> {
            self.inner.playlist_by_id(playlist_id).await
        }

        async fn create_shared_playlist(
            &self,
            new_playlist: NewSharedPlaylist,
        ) -> DatabaseResult<PlaylistData> {
            self.inner.create_shared_playlist(new_playlist).await
        }

        async fn create_playlist_song(
            &self,
            playlist_id: PrimaryKey,
            song_id: PrimaryKey,
        ) -> DatabaseResult<()> {
            self.inner.create_playlist_song(playlist_id, song_id).await
        }

        async fn create_play(&self, new_play: NewPlay) -> DatabaseResult<()> {
            self.inner.create_play(new_play).await
        }
    }

    async fn harness() -> Harness {
        let database = Arc::new(MemoryDatabase::new());
        harness_over(database.clone(), database).await
    }

    /// A harness whose collab talks to `store`, seeded through `database`
    async fn harness_over(database: Arc<MemoryDatabase>, store: Arc<dyn Database>) -> Harness {
        let config = Config::default();
        let presence = Presence::new(Arc::new(MemoryPresenceStore::default()), &config);
        let fabric = RoomFabric::start(Arc::new(LocalRelay::new())).await.unwrap();
        let auth = Auth::new(Arc::new(Rejects), Auth::DEFAULT_COOKIE_NAME);

        Harness {
            collab: Collab::new(config, store, presence, fabric, auth),
            database,
        }
    }

    impl Harness {
        fn client(&self, user_id: PrimaryKey) -> Client {
            let (sender, events) = unbounded_channel();

            Client {
                connection: self.collab.connect(user_id, sender),
                events,
            }
        }

        async fn send(&self, client: &Client, message: serde_json::Value) {
            self.collab
                .handle_message(&client.connection, &message.to_string())
                .await;
        }
    }

    impl Client {
        async fn next(&mut self) -> ServerEvent {
            timeout(Duration::from_secs(1), self.events.recv())
                .await
                .expect("an event arrives")
                .expect("the socket is registered")
        }

        async fn assert_silent(&mut self) {
            sleep(Duration::from_millis(50)).await;
            assert_eq!(self.events.try_recv().ok(), None);
        }
    }

    async fn create_room(harness: &Harness, client: &mut Client, name: &str) -> String {
        harness
            .send(client, serde_json::json!({ "event": "create-room", "data": { "name": name } }))
            .await;

        match client.next().await {
            ServerEvent::RoomCreated { code, .. } => code,
            other => panic!("expected room-created, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_reaches_the_other_member_and_is_recorded() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");
        let song = harness.database.insert_song("Song", "Artist", host.id);

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);

        let code = create_room(&harness, &mut host_client, "Friday Mix").await;
        assert_eq!(code.len(), 16);
        assert_eq!(
            host_client.connection.state(),
            ConnectionState::InRoom(vec![code.clone()])
        );

        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": code } }),
            )
            .await;

        assert_eq!(
            host_client.next().await,
            ServerEvent::UserJoined { user_id: guest.id }
        );
        guest_client.assert_silent().await;

        harness
            .send(
                &host_client,
                serde_json::json!({
                    "event": "stream-song",
                    "data": { "songId": song.id, "roomCode": code }
                }),
            )
            .await;

        match guest_client.next().await {
            ServerEvent::SongStreamed { song: streamed, user } => {
                assert_eq!(streamed.id, song.id);
                assert_eq!(user.id, host.id);
            }
            other => panic!("expected song-streamed, got {:?}", other),
        }
        host_client.assert_silent().await;

        let plays = harness.database.plays();
        assert_eq!(plays.len(), 1);
        assert_eq!((plays[0].user_id, plays[0].song_id), (host.id, song.id));
    }

    #[tokio::test]
    async fn unknown_room_code_only_answers_the_joiner() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);
        let code = create_room(&harness, &mut host_client, "Friday Mix").await;

        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": "ZZZZ" } }),
            )
            .await;

        assert_eq!(
            guest_client.next().await,
            ServerEvent::error("Invalid room code")
        );
        assert_eq!(guest_client.connection.state(), ConnectionState::Idle);
        host_client.assert_silent().await;

        let room = harness.database.room_by_code(&code).await.unwrap();
        assert_eq!(harness.database.membership_count(room.id, guest.id), 0);
    }

    #[tokio::test]
    async fn playlist_survives_a_missing_initial_song() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);

        let code = create_room(&harness, &mut host_client, "Friday Mix").await;
        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": code } }),
            )
            .await;
        host_client.next().await;

        harness
            .send(
                &host_client,
                serde_json::json!({
                    "event": "create-playlist",
                    "data": { "playlistName": "Road Trip", "roomCode": code, "songId": 9999 }
                }),
            )
            .await;

        assert!(matches!(
            host_client.next().await,
            ServerEvent::Warning { .. }
        ));

        for client in [&mut host_client, &mut guest_client] {
            match client.next().await {
                ServerEvent::PlaylistCreated {
                    playlist,
                    creator,
                    song,
                } => {
                    assert_eq!(playlist.name, "Road Trip");
                    assert!(playlist.songs.is_empty());
                    assert_eq!(creator.id, host.id);
                    assert_eq!(song, None);
                }
                other => panic!("expected playlist-created, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn joining_twice_keeps_one_membership() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);
        let code = create_room(&harness, &mut host_client, "Friday Mix").await;

        for _ in 0..2 {
            harness
                .send(
                    &guest_client,
                    serde_json::json!({ "event": "join-room", "data": { "code": code } }),
                )
                .await;
        }

        let room = harness.database.room_by_code(&code).await.unwrap();
        assert_eq!(harness.database.membership_count(room.id, guest.id), 1);
        guest_client.assert_silent().await;
    }

    #[tokio::test]
    async fn adding_a_song_twice_warns_instead_of_broadcasting() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");
        let song = harness.database.insert_song("Song", "Artist", host.id);

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);

        let code = create_room(&harness, &mut host_client, "Friday Mix").await;
        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": code } }),
            )
            .await;
        host_client.next().await;

        harness
            .send(
                &host_client,
                serde_json::json!({
                    "event": "create-playlist",
                    "data": { "playlistName": "Road Trip", "roomCode": code }
                }),
            )
            .await;

        let playlist_id = match host_client.next().await {
            ServerEvent::PlaylistCreated { playlist, .. } => playlist.id,
            other => panic!("expected playlist-created, got {:?}", other),
        };
        guest_client.next().await;

        let add = serde_json::json!({
            "event": "add-song-to-playlist",
            "data": { "playlistId": playlist_id, "songId": song.id }
        });

        harness.send(&host_client, add.clone()).await;
        assert!(matches!(
            host_client.next().await,
            ServerEvent::SongAddedToPlaylist { .. }
        ));
        assert!(matches!(
            guest_client.next().await,
            ServerEvent::SongAddedToPlaylist { .. }
        ));

        harness.send(&host_client, add).await;
        assert_eq!(
            host_client.next().await,
            ServerEvent::warning("Song is already in this playlist")
        );
        guest_client.assert_silent().await;
        assert_eq!(
            harness.database.playlist_song_count(playlist_id, song.id),
            1
        );
    }

    #[tokio::test]
    async fn leaving_tells_the_rest_of_the_room() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);

        let code = create_room(&harness, &mut host_client, "Friday Mix").await;
        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": code } }),
            )
            .await;
        host_client.next().await;

        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "leave-room", "data": { "code": code } }),
            )
            .await;

        assert_eq!(
            host_client.next().await,
            ServerEvent::UserLeftRoom { user_id: guest.id }
        );
        assert_eq!(guest_client.connection.state(), ConnectionState::Idle);

        // No longer subscribed, so room chatter doesn't reach the guest
        harness
            .send(
                &host_client,
                serde_json::json!({
                    "event": "send-message",
                    "data": { "roomCode": code, "message": "bye" }
                }),
            )
            .await;
        guest_client.assert_silent().await;
    }

    #[tokio::test]
    async fn bad_frames_are_answered_with_errors() {
        let harness = harness().await;
        let user = harness.database.insert_user("user");
        let mut client = harness.client(user.id);

        harness
            .collab
            .handle_message(&client.connection, "{ not json")
            .await;
        assert_eq!(client.next().await, ServerEvent::error("Malformed message"));

        harness
            .send(
                &client,
                serde_json::json!({ "event": "stream-song", "data": { "roomCode": "abc" } }),
            )
            .await;
        assert_eq!(
            client.next().await,
            ServerEvent::error("Invalid stream-song payload")
        );

        harness
            .send(
                &client,
                serde_json::json!({
                    "event": "next-song",
                    "data": { "songId": 9999, "roomCode": "abc" }
                }),
            )
            .await;
        assert_eq!(client.next().await, ServerEvent::error("Song does not exist"));
        assert!(harness.database.plays().is_empty());
    }

    #[tokio::test]
    async fn presence_reports_connected_users() {
        let harness = harness().await;
        let online = harness.database.insert_user("online");
        let offline = harness.database.insert_user("offline");

        let mut client = harness.client(online.id);
        // Let the first heartbeat land
        sleep(Duration::from_millis(20)).await;

        harness
            .send(
                &client,
                serde_json::json!({
                    "event": "get:presence",
                    "data": { "userIds": [online.id, offline.id] }
                }),
            )
            .await;

        assert_eq!(
            client.next().await,
            ServerEvent::PresenceUpdate(vec![
                PresenceGroup {
                    user_ids: vec![online.id],
                    status: PresenceStatus::Online,
                },
                PresenceGroup {
                    user_ids: vec![offline.id],
                    status: PresenceStatus::Offline,
                },
            ])
        );
        assert_eq!(
            client.next().await,
            ServerEvent::UserPresence {
                user_id: online.id,
                status: PresenceStatus::Online,
            }
        );
        assert_eq!(
            client.next().await,
            ServerEvent::UserPresence {
                user_id: offline.id,
                status: PresenceStatus::Offline,
            }
        );
    }

    #[tokio::test]
    async fn playback_and_chat_skip_the_actor() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");
        let song = harness.database.insert_song("Song", "Artist", host.id);

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);

        let code = create_room(&harness, &mut host_client, "Friday Mix").await;
        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": code } }),
            )
            .await;
        host_client.next().await;

        harness
            .send(
                &host_client,
                serde_json::json!({ "event": "play-song", "data": { "roomCode": code } }),
            )
            .await;
        assert_eq!(
            guest_client.next().await,
            ServerEvent::SongPlayed { user_id: host.id }
        );

        harness
            .send(
                &host_client,
                serde_json::json!({ "event": "pause-song", "data": { "roomCode": code } }),
            )
            .await;
        assert_eq!(
            guest_client.next().await,
            ServerEvent::SongPaused { user_id: host.id }
        );

        harness
            .send(
                &host_client,
                serde_json::json!({
                    "event": "previous-song",
                    "data": { "songId": song.id, "roomCode": code }
                }),
            )
            .await;
        match guest_client.next().await {
            ServerEvent::PreviousSongPlayed {
                song: played,
                user_id,
            } => {
                assert_eq!(played.id, song.id);
                assert_eq!(user_id, host.id);
            }
            other => panic!("expected previous-song-played, got {:?}", other),
        }

        harness
            .send(
                &guest_client,
                serde_json::json!({
                    "event": "send-message",
                    "data": { "roomCode": code, "message": "nice one" }
                }),
            )
            .await;
        assert_eq!(
            host_client.next().await,
            ServerEvent::MessageReceived {
                message: "nice one".to_string(),
                user_id: guest.id,
            }
        );

        host_client.assert_silent().await;
        guest_client.assert_silent().await;
    }

    #[tokio::test]
    async fn adding_to_a_missing_playlist_is_an_error() {
        let harness = harness().await;
        let user = harness.database.insert_user("user");
        let song = harness.database.insert_song("Song", "Artist", user.id);
        let mut client = harness.client(user.id);

        harness
            .send(
                &client,
                serde_json::json!({
                    "event": "add-song-to-playlist",
                    "data": { "playlistId": 9999, "songId": song.id }
                }),
            )
            .await;

        assert_eq!(
            client.next().await,
            ServerEvent::error("Playlist does not exist")
        );
    }

    #[tokio::test]
    async fn leaving_is_announced_without_a_membership_check() {
        let harness = harness().await;
        let host = harness.database.insert_user("host");
        let stranger = harness.database.insert_user("stranger");

        let mut host_client = harness.client(host.id);
        let mut stranger_client = harness.client(stranger.id);
        let code = create_room(&harness, &mut host_client, "Friday Mix").await;

        harness
            .send(
                &stranger_client,
                serde_json::json!({ "event": "leave-room", "data": { "code": code } }),
            )
            .await;

        assert_eq!(
            host_client.next().await,
            ServerEvent::UserLeftRoom {
                user_id: stranger.id
            }
        );
        stranger_client.assert_silent().await;

        // An unknown code is not an error either
        harness
            .send(
                &stranger_client,
                serde_json::json!({ "event": "leave-room", "data": { "code": "nope" } }),
            )
            .await;

        stranger_client.assert_silent().await;
        host_client.assert_silent().await;
    }

    #[tokio::test]
    async fn failed_rejoin_keeps_an_existing_subscription() {
        let database = Arc::new(MemoryDatabase::new());
        let store = Arc::new(FailingJoins {
            inner: database.clone(),
            failing: AtomicBool::new(false),
        });
        let harness = harness_over(database, store.clone()).await;

        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);

        let code = create_room(&harness, &mut host_client, "Friday Mix").await;
        let join = serde_json::json!({ "event": "join-room", "data": { "code": code } });

        harness.send(&guest_client, join.clone()).await;
        host_client.next().await;

        store.failing.store(true, Ordering::SeqCst);
        harness.send(&guest_client, join).await;

        assert_eq!(
            guest_client.next().await,
            ServerEvent::error("Could not join room, please try again")
        );
        assert_eq!(
            guest_client.connection.state(),
            ConnectionState::InRoom(vec![code.clone()])
        );

        harness
            .send(
                &host_client,
                serde_json::json!({
                    "event": "send-message",
                    "data": { "roomCode": code, "message": "still there?" }
                }),
            )
            .await;
        assert_eq!(
            guest_client.next().await,
            ServerEvent::MessageReceived {
                message: "still there?".to_string(),
                user_id: host.id,
            }
        );
    }

    #[tokio::test]
    async fn failed_first_join_leaves_the_socket_idle() {
        let database = Arc::new(MemoryDatabase::new());
        let store = Arc::new(FailingJoins {
            inner: database.clone(),
            failing: AtomicBool::new(false),
        });
        let harness = harness_over(database, store.clone()).await;

        let host = harness.database.insert_user("host");
        let guest = harness.database.insert_user("guest");

        let mut host_client = harness.client(host.id);
        let mut guest_client = harness.client(guest.id);
        let code = create_room(&harness, &mut host_client, "Friday Mix").await;

        store.failing.store(true, Ordering::SeqCst);
        harness
            .send(
                &guest_client,
                serde_json::json!({ "event": "join-room", "data": { "code": code } }),
            )
            .await;

        assert_eq!(
            guest_client.next().await,
            ServerEvent::error("Could not join room, please try again")
        );
        assert_eq!(guest_client.connection.state(), ConnectionState::Idle);
        host_client.assert_silent().await;
    }
}
