//! Matching, notification and scrape orchestration for the apartment matcher.

pub mod config;
pub mod dispatch;
pub mod fanout;
pub mod scheduler;
pub mod scoring;
pub mod search;

use std::sync::Arc;

use anyhow::{Context, Result};
use flatmatch_adapters::AdapterRegistry;
use flatmatch_storage::{HttpFetcher, ListingStore, MemoryListingStore, MemoryProfileStore, PgStore, ProfileStore};
use tracing::{info, warn};

pub use config::{load_source_registry, PipelineConfig, SmtpConfig, SourceRegistry};
pub use dispatch::{
    digest_subject, format_chf, render_digest, DispatchError, LogTransport, MailTransport, NotificationDispatcher,
    SmtpTransport, TransportError,
};
pub use fanout::{scrape_all, FanOut};
pub use scheduler::{
    Clock, CronSchedule, MatchCycleSummary, NotificationScheduler, SchedulerSettings, ScrapeCycleSummary, TierPhase,
    SCHEDULED_TIERS,
};
pub use scoring::{MatchEngine, MatchWeights};
pub use search::{LiveSearch, SearchOutcome};

pub const CRATE_NAME: &str = "flatmatch-sync";

/// Listing and profile stores behind their traits. `pg` is set when the
/// stores are backed by Postgres.
#[derive(Clone)]
pub struct Stores {
    pub listings: Arc<dyn ListingStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub pg: Option<PgStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            listings: Arc::new(MemoryListingStore::new()),
            profiles: Arc::new(MemoryProfileStore::new()),
            pg: None,
        }
    }
}

/// Postgres when `DATABASE_URL` is configured, process memory otherwise.
pub async fn connect_stores(config: &PipelineConfig) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pg = PgStore::connect(url).await?;
            info!("using postgres stores");
            Ok(Stores {
                listings: Arc::new(pg.clone()),
                profiles: Arc::new(pg.clone()),
                pg: Some(pg),
            })
        }
        None => {
            warn!("DATABASE_URL not set; listings and profiles live in memory only");
            Ok(Stores::in_memory())
        }
    }
}

pub fn build_transport(config: &PipelineConfig) -> Result<Box<dyn MailTransport>> {
    match SmtpTransport::from_config(&config.smtp).context("configuring smtp transport")? {
        Some(smtp) => Ok(Box::new(smtp)),
        None => {
            warn!("SMTP credentials not set; digests are logged instead of sent");
            Ok(Box::new(LogTransport))
        }
    }
}

pub async fn load_registry(config: &PipelineConfig) -> Result<AdapterRegistry> {
    let sources = load_source_registry(&config.sources_path()).await?;
    let registry = AdapterRegistry::from_sources(&sources.sources).context("building adapter registry")?;
    info!(sources = ?registry.source_ids(), "adapter registry loaded");
    Ok(registry)
}

/// Everything the binary needs, wired from one configuration.
pub struct Pipeline {
    pub config: PipelineConfig,
    pub stores: Stores,
    pub scheduler: Arc<NotificationScheduler>,
    pub search: LiveSearch,
}

impl Pipeline {
    pub async fn from_config(config: PipelineConfig) -> Result<Self> {
        let registry = load_registry(&config).await?;
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let stores = connect_stores(&config).await?;
        let dispatcher = NotificationDispatcher::new(build_transport(&config)?);

        let settings = SchedulerSettings {
            match_threshold: config.match_threshold,
            fallback_window: config.fallback_window(),
            source_timeout: config.search_timeout(),
        };
        let scheduler = NotificationScheduler::new(
            Arc::clone(&stores.listings),
            Arc::clone(&stores.profiles),
            registry.clone(),
            Arc::clone(&http),
            dispatcher,
            settings,
        );
        let search = LiveSearch::new(registry, http, MatchEngine::default(), config.search_timeout());

        Ok(Self {
            config,
            stores,
            scheduler: Arc::new(scheduler),
            search,
        })
    }

    pub fn cron_schedule(&self) -> CronSchedule {
        CronSchedule {
            scrape: self.config.scrape_cron.clone(),
            hourly: self.config.hourly_cron.clone(),
            daily: self.config.daily_cron.clone(),
        }
    }
}

pub async fn pipeline_from_env() -> Result<Pipeline> {
    Pipeline::from_config(PipelineConfig::from_env()).await
}
