//! # Campaign Amount Cache
//!
//! Caches each campaign's running total under `campaign:{id}:amount`.
//!
//! Two access patterns touch it:
//!
//! - the campaign read path is cache-aside: on a miss it reads the store
//!   and fills the entry;
//! - donation settlement only increments entries that already exist, so a
//!   settlement never creates a cache entry from a partial view.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Key of a campaign's amount entry.
pub fn amount_key(campaign_id: Uuid) -> String {
    format!("campaign:{}:amount", campaign_id)
}

#[async_trait]
pub trait CampaignCache: Send + Sync {
    async fn get_amount(&self, campaign_id: Uuid) -> Result<Option<i64>, CacheError>;

    async fn set_amount(&self, campaign_id: Uuid, amount: i64) -> Result<(), CacheError>;

    /// Add `delta` to an existing entry. Returns the new value, or `None`
    /// (and writes nothing) when the campaign is not cached.
    async fn increment_if_present(&self, campaign_id: Uuid, delta: i64) -> Result<Option<i64>, CacheError>;

    async fn invalidate(&self, campaign_id: Uuid) -> Result<(), CacheError>;
}

/// Process-local cache.
#[derive(Default)]
pub struct InMemoryCampaignCache {
    entries: DashMap<String, i64>,
}

impl InMemoryCampaignCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CampaignCache for InMemoryCampaignCache {
    async fn get_amount(&self, campaign_id: Uuid) -> Result<Option<i64>, CacheError> {
        Ok(self.entries.get(&amount_key(campaign_id)).map(|v| *v))
    }

    async fn set_amount(&self, campaign_id: Uuid, amount: i64) -> Result<(), CacheError> {
        self.entries.insert(amount_key(campaign_id), amount);
        Ok(())
    }

    async fn increment_if_present(&self, campaign_id: Uuid, delta: i64) -> Result<Option<i64>, CacheError> {
        // get_mut holds the shard lock, so concurrent increments don't lose updates.
        Ok(self.entries.get_mut(&amount_key(campaign_id)).map(|mut v| {
            *v += delta;
            *v
        }))
    }

    async fn invalidate(&self, campaign_id: Uuid) -> Result<(), CacheError> {
        self.entries.remove(&amount_key(campaign_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_does_not_create_entry() {
        let cache = InMemoryCampaignCache::new();
        let id = Uuid::new_v4();

        assert_eq!(cache.increment_if_present(id, 500).await.unwrap(), None);
        assert_eq!(cache.get_amount(id).await.unwrap(), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_increment_existing_entry() {
        let cache = InMemoryCampaignCache::new();
        let id = Uuid::new_v4();
        cache.set_amount(id, 1_000).await.unwrap();

        assert_eq!(cache.increment_if_present(id, 250).await.unwrap(), Some(1_250));
        assert_eq!(cache.get_amount(id).await.unwrap(), Some(1_250));
    }

    #[test]
    fn test_amount_key_format() {
        let id = Uuid::nil();
        assert_eq!(amount_key(id), "campaign:00000000-0000-0000-0000-000000000000:amount");
    }
}
