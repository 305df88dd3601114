use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flatmatch_core::{NotificationFrequency, SearchCriteria, SearchProfile};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::StoreError;

/// Search-profile persistence. The scheduler is the only writer of
/// `last_notification`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Validates email and criteria, then stores a new profile.
    async fn create(
        &self,
        email: &str,
        criteria: &SearchCriteria,
        frequency: NotificationFrequency,
        now: DateTime<Utc>,
    ) -> Result<SearchProfile, StoreError>;

    /// All profiles, or only those of one tier, oldest first.
    async fn list(&self, frequency: Option<NotificationFrequency>) -> Result<Vec<SearchProfile>, StoreError>;

    async fn list_for_email(&self, email: &str) -> Result<Vec<SearchProfile>, StoreError>;

    /// Sets `last_notification` to `now`. Unknown ids yield
    /// [`StoreError::ProfileNotFound`].
    async fn touch_notified(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<Vec<SearchProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a profile as-is, bypassing validation. Used to seed state.
    pub async fn insert(&self, profile: SearchProfile) {
        self.profiles.write().await.push(profile);
    }

    pub async fn get(&self, id: Uuid) -> Option<SearchProfile> {
        self.profiles.read().await.iter().find(|p| p.id == id).cloned()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn create(
        &self,
        email: &str,
        criteria: &SearchCriteria,
        frequency: NotificationFrequency,
        now: DateTime<Utc>,
    ) -> Result<SearchProfile, StoreError> {
        let profile = SearchProfile::new(email, criteria, frequency, now)?;
        self.profiles.write().await.push(profile.clone());
        Ok(profile)
    }

    async fn list(&self, frequency: Option<NotificationFrequency>) -> Result<Vec<SearchProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .await
            .iter()
            .filter(|p| frequency.map_or(true, |f| p.notification_frequency == f))
            .cloned()
            .collect())
    }

    async fn list_for_email(&self, email: &str) -> Result<Vec<SearchProfile>, StoreError> {
        let email = email.trim();
        Ok(self
            .profiles
            .read()
            .await
            .iter()
            .filter(|p| p.user_email.eq_ignore_ascii_case(email))
            .cloned()
            .collect())
    }

    async fn touch_notified(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::ProfileNotFound(id))?;
        profile.last_notification = Some(now);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let before = profiles.len();
        profiles.retain(|p| p.id != id);
        if profiles.len() == before {
            return Err(StoreError::ProfileNotFound(id));
        }
        Ok(())
    }
}
