use async_trait::async_trait;
use anyhow::Context;
use chrono::{DateTime, Utc};
use flatmatch_core::{Feature, Listing, NewListing, NotificationFrequency, SearchCriteria, SearchProfile};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{ListingStore, ProfileStore, StoreError, UpsertOutcome};

/// Postgres-backed listing and profile store. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running database migrations")?;
        info!("database migrations applied");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    source: String,
    external_id: String,
    title: String,
    price: f64,
    location: String,
    rooms: Option<f64>,
    size: Option<f64>,
    features: Json<Vec<Feature>>,
    link: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ListingRow> for Listing {
    fn from(r: ListingRow) -> Self {
        Listing {
            source: r.source,
            external_id: r.external_id,
            title: r.title,
            price: r.price,
            location: r.location,
            rooms: r.rooms,
            size: r.size,
            features: r.features.0.into_iter().collect(),
            link: r.link,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    user_email: String,
    criteria: serde_json::Value,
    notification_frequency: String,
    created_at: DateTime<Utc>,
    last_notification: Option<DateTime<Utc>>,
}

impl TryFrom<ProfileRow> for SearchProfile {
    type Error = StoreError;

    fn try_from(r: ProfileRow) -> Result<Self, Self::Error> {
        let notification_frequency = r
            .notification_frequency
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("profile {}: {e}", r.id)))?;
        Ok(SearchProfile {
            id: r.id,
            user_email: r.user_email,
            criteria: r.criteria,
            notification_frequency,
            created_at: r.created_at,
            last_notification: r.last_notification,
        })
    }
}

fn into_profiles(rows: Vec<ProfileRow>) -> Result<Vec<SearchProfile>, StoreError> {
    rows.into_iter().map(SearchProfile::try_from).collect()
}

#[async_trait]
impl ListingStore for PgStore {
    async fn upsert(&self, listing: NewListing, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError> {
        let features: Vec<Feature> = listing.features.iter().copied().collect();
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO listings
                (external_id, source, title, price, location, rooms, size, features, link, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (external_id) DO UPDATE
               SET source = EXCLUDED.source,
                   title = EXCLUDED.title,
                   price = EXCLUDED.price,
                   location = EXCLUDED.location,
                   rooms = EXCLUDED.rooms,
                   size = EXCLUDED.size,
                   features = EXCLUDED.features,
                   link = EXCLUDED.link,
                   updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&listing.external_id)
        .bind(&listing.source)
        .bind(&listing.title)
        .bind(listing.price)
        .bind(&listing.location)
        .bind(listing.rooms)
        .bind(listing.size)
        .bind(Json(features))
        .bind(&listing.link)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn since(&self, since: DateTime<Utc>) -> Result<Vec<Listing>, StoreError> {
        let rows: Vec<ListingRow> = sqlx::query_as(
            r#"
            SELECT source, external_id, title, price, location, rooms, size, features, link,
                   created_at, updated_at
              FROM listings
             WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn create(
        &self,
        email: &str,
        criteria: &SearchCriteria,
        frequency: NotificationFrequency,
        now: DateTime<Utc>,
    ) -> Result<SearchProfile, StoreError> {
        let profile = SearchProfile::new(email, criteria, frequency, now)?;
        sqlx::query(
            r#"
            INSERT INTO search_profiles
                (id, user_email, criteria, notification_frequency, created_at, last_notification)
            VALUES ($1, $2, $3, $4, $5, NULL)
            "#,
        )
        .bind(profile.id)
        .bind(&profile.user_email)
        .bind(&profile.criteria)
        .bind(profile.notification_frequency.as_str())
        .bind(profile.created_at)
        .execute(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn list(&self, frequency: Option<NotificationFrequency>) -> Result<Vec<SearchProfile>, StoreError> {
        let rows: Vec<ProfileRow> = sqlx::query_as(
            r#"
            SELECT id, user_email, criteria, notification_frequency, created_at, last_notification
              FROM search_profiles
             WHERE $1::text IS NULL OR notification_frequency = $1
             ORDER BY created_at
            "#,
        )
        .bind(frequency.map(NotificationFrequency::as_str))
        .fetch_all(&self.pool)
        .await?;
        into_profiles(rows)
    }

    async fn list_for_email(&self, email: &str) -> Result<Vec<SearchProfile>, StoreError> {
        let rows: Vec<ProfileRow> = sqlx::query_as(
            r#"
            SELECT id, user_email, criteria, notification_frequency, created_at, last_notification
              FROM search_profiles
             WHERE lower(user_email) = lower($1)
             ORDER BY created_at
            "#,
        )
        .bind(email.trim())
        .fetch_all(&self.pool)
        .await?;
        into_profiles(rows)
    }

    async fn touch_notified(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE search_profiles SET last_notification = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProfileNotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM search_profiles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ProfileNotFound(id));
        }
        Ok(())
    }
}
