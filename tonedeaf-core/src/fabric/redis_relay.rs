use async_trait::async_trait;
use futures_util::StreamExt;
use log::warn;
use redis::{aio::ConnectionManager, AsyncCommands, Client};

use super::{Envelope, EnvelopeStream, FabricError, Relay};

const ROOMS_CHANNEL: &str = "tonedeaf:rooms";

/// A relay over Redis pub/sub, reaching every process connected to the same Redis
pub struct RedisRelay {
    client: Client,
    connection: ConnectionManager,
}

impl RedisRelay {
    pub async fn connect(client: Client) -> Result<Self, FabricError> {
        let connection = ConnectionManager::new(client.clone()).await?;

        Ok(Self { client, connection })
    }
}

#[async_trait]
impl Relay for RedisRelay {
    async fn publish(&self, envelope: &Envelope) -> Result<(), FabricError> {
        let payload = serde_json::to_string(envelope)?;
        let mut connection = self.connection.clone();

        let _: i64 = connection.publish(ROOMS_CHANNEL, payload).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<EnvelopeStream, FabricError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(ROOMS_CHANNEL).await?;

        let envelopes = pubsub.into_on_message().filter_map(|message| async move {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Ignoring unreadable relay message: {}", err);
                    return None;
                }
            };

            serde_json::from_str::<Envelope>(&payload)
                .map_err(|err| warn!("Ignoring malformed relay message: {}", err))
                .ok()
        });

        Ok(envelopes.boxed())
    }
}
