//! Listing and search-profile persistence plus the shared HTTP fetcher used by
//! scrape adapters.

mod http;
mod listings;
mod postgres;
mod profiles;

use flatmatch_core::ValidationError;
use thiserror::Error;
use uuid::Uuid;

pub use http::{BackoffPolicy, FetchError, FetchedPage, HttpClientConfig, HttpFetcher};
pub use listings::{ListingStore, MemoryListingStore, UpsertOutcome};
pub use postgres::PgStore;
pub use profiles::{MemoryProfileStore, ProfileStore};

pub const CRATE_NAME: &str = "flatmatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("search profile {0} not found")]
    ProfileNotFound(Uuid),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
