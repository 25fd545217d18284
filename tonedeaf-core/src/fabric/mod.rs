//! Room-scoped broadcasting that works across server processes.
//!
//! Every process keeps a [Hub] of its own sockets. Broadcasts are delivered to
//! the local hub immediately and published to a [Relay], from which every other
//! process picks them up and delivers them to its own sockets in that room.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use log::{error, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedSender},
    time::sleep,
};

use crate::{random_string, SocketId};

mod hub;
mod local;
mod redis_relay;

pub use hub::*;
pub use local::*;
pub use redis_relay::*;

pub type EnvelopeStream = BoxStream<'static, Envelope>;

/// Delay before the first attempt to resubscribe to a lost relay, doubled per failure
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FabricError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("Could not encode event: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A broadcast as it travels between processes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The process the broadcast was issued on
    pub origin: String,
    pub room: String,
    pub payload: serde_json::Value,
}

/// A publish/subscribe channel shared by every server process
#[async_trait]
pub trait Relay: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<(), FabricError>;
    /// Returns every envelope published from now on, including our own
    async fn subscribe(&self) -> Result<EnvelopeStream, FabricError>;
}

/// The broadcast fabric of this process
pub struct Fabric<E> {
    origin: String,
    hub: Hub<E>,
    outgoing: UnboundedSender<Envelope>,
}

impl<E> Fabric<E>
where
    E: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Subscribes to the relay and spawns the tasks moving envelopes in and out
    pub async fn start(relay: Arc<dyn Relay>) -> Result<Arc<Self>, FabricError> {
        let incoming = relay.subscribe().await?;
        let (outgoing, mut queue) = unbounded_channel::<Envelope>();

        let fabric = Arc::new(Self {
            origin: random_string(16),
            hub: Hub::default(),
            outgoing,
        });

        let weak = Arc::downgrade(&fabric);
        tokio::spawn(Self::receive_from(relay.clone(), incoming, weak));

        // Publishing happens in order, off the emitting task
        tokio::spawn(async move {
            while let Some(envelope) = queue.recv().await {
                if let Err(err) = relay.publish(&envelope).await {
                    error!("Could not relay broadcast to room {}: {}", envelope.room, err);
                }
            }
        });

        Ok(fabric)
    }

    /// Delivers relayed envelopes until the fabric is dropped.
    /// A subscription that ends is replaced, backing off while the relay is down.
    async fn receive_from(
        relay: Arc<dyn Relay>,
        mut incoming: EnvelopeStream,
        weak: Weak<Self>,
    ) {
        loop {
            while let Some(envelope) = incoming.next().await {
                let Some(fabric) = weak.upgrade() else {
                    return;
                };

                fabric.receive(envelope);
            }

            error!("Relay subscription ended, broadcasts from other processes are lost until it is back");

            let mut delay = RESUBSCRIBE_DELAY;
            incoming = loop {
                sleep(delay).await;

                if weak.strong_count() == 0 {
                    return;
                }

                match relay.subscribe().await {
                    Ok(stream) => break stream,
                    Err(err) => {
                        error!("Could not resubscribe to relay: {}", err);
                        delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
                    }
                }
            };

            info!("Resubscribed to relay");
        }
    }

    pub fn register(&self, socket_id: SocketId, sender: UnboundedSender<E>) {
        self.hub.register(socket_id, sender)
    }

    pub fn unregister(&self, socket_id: SocketId) {
        self.hub.unregister(socket_id)
    }

    pub fn join(&self, room: &str, socket_id: SocketId) {
        self.hub.join(room, socket_id)
    }

    pub fn leave(&self, room: &str, socket_id: SocketId) {
        self.hub.leave(room, socket_id)
    }

    /// Sends an event to one socket on this process
    pub fn send(&self, socket_id: SocketId, event: E) -> bool {
        self.hub.send(socket_id, event)
    }

    /// Sends an event to every socket in the room on every process.
    /// `except` is a socket of this process that should not receive it.
    ///
    /// This never waits for delivery.
    pub fn to_room(&self, room: &str, event: E, except: Option<SocketId>) {
        self.hub.deliver(room, &event, except);

        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Could not encode broadcast to room {}: {}", room, err);
                return;
            }
        };

        let envelope = Envelope {
            origin: self.origin.clone(),
            room: room.to_string(),
            payload,
        };

        // Only fails once the publisher task is gone, during shutdown
        let _ = self.outgoing.send(envelope);
    }

    fn receive(&self, envelope: Envelope) {
        // Already delivered locally when it was issued
        if envelope.origin == self.origin {
            return;
        }

        match serde_json::from_value::<E>(envelope.payload) {
            Ok(event) => {
                self.hub.deliver(&envelope.room, &event, None);
            }
            Err(err) => warn!(
                "Dropping undecodable broadcast for room {}: {}",
                envelope.room, err
            ),
        }
    }
}
