use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::future::join_all;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::Config;

mod memory;
mod redis_store;

pub use memory::*;
pub use redis_store::*;

/// The user identifier presence markers are keyed by
pub type UserId = i32;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("Presence store is unavailable: {0}")]
    Unavailable(String),
}

/// An ephemeral key/value store where every marker expires on its own
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Sets or renews the marker for a user, expiring after `ttl`
    async fn refresh(&self, user_id: UserId, ttl: Duration) -> Result<(), PresenceError>;
    /// Returns true if the user has a marker that hasn't expired
    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// The result of a bulk presence lookup, in the order the ids were given
#[derive(Debug, Clone, Default)]
pub struct PresenceReport {
    pub statuses: Vec<(UserId, PresenceStatus)>,
}

impl PresenceReport {
    pub fn online(&self) -> Vec<UserId> {
        self.with_status(PresenceStatus::Online)
    }

    pub fn offline(&self) -> Vec<UserId> {
        self.with_status(PresenceStatus::Offline)
    }

    fn with_status(&self, wanted: PresenceStatus) -> Vec<UserId> {
        self.statuses
            .iter()
            .filter(|(_, status)| *status == wanted)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Keeps presence markers alive for connected users and answers who is online.
///
/// Presence is never critical: store failures are logged and read as offline.
#[derive(Clone)]
pub struct Presence {
    store: Arc<dyn PresenceStore>,
    heartbeat_interval: Duration,
    ttl: Duration,
}

/// Owns the periodic refresh of one connection's presence marker.
/// Dropping it stops the refresh, letting the marker lapse on its own.
pub struct Heartbeat {
    task: JoinHandle<()>,
}

impl Presence {
    pub fn new(store: Arc<dyn PresenceStore>, config: &Config) -> Self {
        Self {
            store,
            heartbeat_interval: config.heartbeat_interval,
            ttl: config.presence_ttl,
        }
    }

    /// Marks the user online right away, then keeps renewing the marker
    pub fn heartbeat(&self, user_id: UserId) -> Heartbeat {
        let store = self.store.clone();
        let period = self.heartbeat_interval;
        let ttl = self.ttl;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // The first tick completes immediately
                ticker.tick().await;

                if let Err(err) = store.refresh(user_id, ttl).await {
                    warn!("Could not refresh presence of user {}: {}", user_id, err);
                }
            }
        });

        Heartbeat { task }
    }

    /// Looks up every user concurrently. A failed lookup counts as offline.
    pub async fn statuses(&self, user_ids: &[UserId]) -> PresenceReport {
        let lookups = user_ids.iter().map(|&user_id| async move {
            let status = match self.store.is_online(user_id).await {
                Ok(true) => PresenceStatus::Online,
                Ok(false) => PresenceStatus::Offline,
                Err(err) => {
                    warn!("Presence lookup for user {} failed: {}", user_id, err);
                    PresenceStatus::Offline
                }
            };

            (user_id, status)
        });

        PresenceReport {
            statuses: join_all(lookups).await,
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort()
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    /// Fails every lookup for the given users
    struct FlakyStore {
        inner: MemoryPresenceStore,
        broken: HashSet<UserId>,
    }

    #[async_trait]
    impl PresenceStore for FlakyStore {
        async fn refresh(&self, user_id: UserId, ttl: Duration) -> Result<(), PresenceError> {
            self.inner.refresh(user_id, ttl).await
        }

        async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
            if self.broken.contains(&user_id) {
                return Err(PresenceError::Unavailable("connection reset".to_string()));
            }

            self.inner.is_online(user_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn markers_lapse_without_a_heartbeat() {
        let store = Arc::new(MemoryPresenceStore::default());
        let presence = Presence::new(store.clone(), &Config::default());

        store.refresh(1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(presence.statuses(&[1]).await.online(), vec![1]);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(presence.statuses(&[1]).await.offline(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_keeps_marker_alive_until_dropped() {
        let store = Arc::new(MemoryPresenceStore::default());
        let presence = Presence::new(store.clone(), &Config::default());

        let heartbeat = presence.heartbeat(7);

        // Let the immediate first tick run
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(store.is_online(7).await.unwrap());

        // Well past the TTL, but the heartbeat keeps renewing
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(store.is_online(7).await.unwrap());

        drop(heartbeat);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!store.is_online(7).await.unwrap());
    }

    #[tokio::test]
    async fn failed_lookup_reads_as_offline_without_failing_the_batch() {
        let inner = MemoryPresenceStore::default();
        inner.refresh(1, Duration::from_secs(60)).await.unwrap();
        inner.refresh(2, Duration::from_secs(60)).await.unwrap();

        let store = Arc::new(FlakyStore {
            inner,
            broken: HashSet::from([2]),
        });
        let presence = Presence::new(store, &Config::default());

        let report = presence.statuses(&[1, 2, 3]).await;

        assert_eq!(report.online(), vec![1]);
        assert_eq!(report.offline(), vec![2, 3]);
        assert_eq!(report.statuses.len(), 3);
    }
}
