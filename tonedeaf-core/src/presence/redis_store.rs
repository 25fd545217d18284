use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

use super::{PresenceError, PresenceStore, UserId};

const PRESENCE_KEY_PREFIX: &str = "presence:user";
const PRESENCE_VALUE: &str = "online";

/// A presence store shared by every server process, backed by Redis key expiry
#[derive(Clone)]
pub struct RedisPresenceStore {
    connection: ConnectionManager,
}

impl RedisPresenceStore {
    pub async fn connect(client: Client) -> Result<Self, PresenceError> {
        let connection = ConnectionManager::new(client).await?;

        Ok(Self { connection })
    }

    fn key(user_id: UserId) -> String {
        format!("{}:{}", PRESENCE_KEY_PREFIX, user_id)
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn refresh(&self, user_id: UserId, ttl: Duration) -> Result<(), PresenceError> {
        let mut connection = self.connection.clone();

        let _: () = redis::cmd("SET")
            .arg(Self::key(user_id))
            .arg(PRESENCE_VALUE)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut connection)
            .await?;

        Ok(())
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let mut connection = self.connection.clone();
        let exists: bool = connection.exists(Self::key(user_id)).await?;

        Ok(exists)
    }
}
