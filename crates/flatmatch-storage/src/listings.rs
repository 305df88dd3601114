use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flatmatch_core::{Listing, NewListing};
use tokio::sync::RwLock;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Listing persistence keyed by `external_id`. Implementations must make each
/// call atomic with respect to concurrent callers.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Inserts the listing stamped with `now`, or overwrites the existing
    /// record with the same `external_id` while keeping its `created_at`.
    async fn upsert(&self, listing: NewListing, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError>;

    /// Listings created at or after `since`, in no particular order.
    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<Listing>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryListingStore {
    records: RwLock<HashMap<String, Listing>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, external_id: &str) -> Option<Listing> {
        self.records.read().await.get(external_id).cloned()
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn upsert(&self, listing: NewListing, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&listing.external_id) {
            Some(existing) => {
                existing.refresh(listing, now);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                records.insert(listing.external_id.clone(), Listing::first_seen(listing, now));
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|l| l.created_at >= since)
            .cloned()
            .collect())
    }
}
