use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{PresenceError, PresenceStore, UserId};

/// A presence store living in this process only.
/// Used when no shared store is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    expirations: DashMap<UserId, Instant>,
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn refresh(&self, user_id: UserId, ttl: Duration) -> Result<(), PresenceError> {
        self.expirations.insert(user_id, Instant::now() + ttl);
        Ok(())
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let now = Instant::now();

        // Expired markers are dropped lazily, nothing else ever removes them
        self.expirations
            .remove_if(&user_id, |_, expires_at| *expires_at <= now);

        Ok(self.expirations.contains_key(&user_id))
    }
}
