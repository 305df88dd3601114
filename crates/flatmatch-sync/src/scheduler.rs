use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flatmatch_adapters::{AdapterContext, AdapterRegistry};
use flatmatch_core::{MatchResult, NotificationFrequency, SearchProfile};
use flatmatch_storage::{HttpFetcher, ListingStore, ProfileStore, StoreError, UpsertOutcome};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dispatch::NotificationDispatcher;
use crate::fanout::scrape_all;
use crate::scoring::MatchEngine;

/// Tiers that have a cron cadence. Realtime profiles are stored but only
/// matched when a cycle is triggered by hand.
pub const SCHEDULED_TIERS: [NotificationFrequency; 2] = [NotificationFrequency::Hourly, NotificationFrequency::Daily];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierPhase {
    Idle,
    Scraping,
    Matching,
    Notifying,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub match_threshold: f64,
    pub fallback_window: chrono::Duration,
    pub source_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            match_threshold: 70.0,
            fallback_window: chrono::Duration::days(7),
            source_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CronSchedule {
    pub scrape: String,
    pub hourly: String,
    pub daily: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeCycleSummary {
    pub run_id: Uuid,
    pub sources_attempted: usize,
    pub sources_failed: usize,
    pub drafts_rejected: usize,
    pub inserted: usize,
    pub updated: usize,
    pub store_errors: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchCycleSummary {
    pub tier: Option<NotificationFrequency>,
    pub profiles_considered: usize,
    pub skipped_cooldown: usize,
    pub skipped_malformed: usize,
    pub without_matches: usize,
    pub notified: usize,
    pub failed: usize,
}

/// Wall clock read when scraped listings are stored.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

enum ProfileOutcome {
    Cooldown,
    Malformed,
    NoMatches,
    Notified,
    Failed,
}

/// Drives scrape cycles and per-tier match cycles. Every cycle takes an
/// explicit `now`; the cron jobs pass the wall clock. Stored listings are
/// stamped from `clock` at the moment they are written, and a match cycle
/// never runs while a scrape batch is being written.
pub struct NotificationScheduler {
    listings: Arc<dyn ListingStore>,
    profiles: Arc<dyn ProfileStore>,
    registry: AdapterRegistry,
    http: Arc<HttpFetcher>,
    engine: MatchEngine,
    dispatcher: NotificationDispatcher,
    settings: SchedulerSettings,
    clock: Clock,
    store_gate: RwLock<()>,
    phases: RwLock<HashMap<NotificationFrequency, TierPhase>>,
    scrape_lock: Mutex<()>,
    tier_locks: HashMap<NotificationFrequency, Mutex<()>>,
}

impl NotificationScheduler {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        profiles: Arc<dyn ProfileStore>,
        registry: AdapterRegistry,
        http: Arc<HttpFetcher>,
        dispatcher: NotificationDispatcher,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            listings,
            profiles,
            registry,
            http,
            engine: MatchEngine::default(),
            dispatcher,
            settings,
            clock: Arc::new(Utc::now),
            store_gate: RwLock::new(()),
            phases: RwLock::new(NotificationFrequency::ALL.into_iter().map(|t| (t, TierPhase::Idle)).collect()),
            scrape_lock: Mutex::new(()),
            tier_locks: NotificationFrequency::ALL.into_iter().map(|t| (t, Mutex::new(()))).collect(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn phase(&self, tier: NotificationFrequency) -> TierPhase {
        self.phases.read().await.get(&tier).copied().unwrap_or(TierPhase::Idle)
    }

    async fn set_phase(&self, tier: NotificationFrequency, phase: TierPhase) {
        self.phases.write().await.insert(tier, phase);
    }

    /// Marks every idle tier as scraping, or puts scraping tiers back to idle.
    async fn mark_scraping(&self, scraping: bool) {
        let mut phases = self.phases.write().await;
        for phase in phases.values_mut() {
            match (scraping, *phase) {
                (true, TierPhase::Idle) => *phase = TierPhase::Scraping,
                (false, TierPhase::Scraping) => *phase = TierPhase::Idle,
                _ => {}
            }
        }
    }

    /// Scrapes every source once and upserts what came back. `now` tags the
    /// run; listings are stamped when they are written. Returns `None` when
    /// the previous scrape is still running.
    pub async fn run_scrape_cycle(&self, now: DateTime<Utc>) -> Option<ScrapeCycleSummary> {
        let Ok(_running) = self.scrape_lock.try_lock() else {
            warn!("previous scrape cycle still running; skipping");
            return None;
        };

        let ctx = AdapterContext::new(now);
        let span = info_span!("scrape_cycle", run_id = %ctx.run_id);
        let summary = async {
            self.mark_scraping(true).await;
            let fan_out = scrape_all(
                &self.registry,
                Arc::clone(&self.http),
                &ctx,
                None,
                self.settings.source_timeout,
            )
            .await;

            let mut summary = ScrapeCycleSummary {
                run_id: ctx.run_id,
                sources_attempted: fan_out.sources_attempted,
                sources_failed: fan_out.sources_failed,
                drafts_rejected: fan_out.drafts_rejected,
                ..Default::default()
            };
            let writing = self.store_gate.write().await;
            let stored_at = (self.clock)();
            for listing in fan_out.listings {
                let external_id = listing.external_id.clone();
                match self.listings.upsert(listing, stored_at).await {
                    Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                    Ok(UpsertOutcome::Updated) => summary.updated += 1,
                    Err(err) => {
                        error!(%external_id, error = %err, "listing upsert failed");
                        summary.store_errors += 1;
                    }
                }
            }
            drop(writing);
            self.mark_scraping(false).await;

            info!(
                sources_attempted = summary.sources_attempted,
                sources_failed = summary.sources_failed,
                inserted = summary.inserted,
                updated = summary.updated,
                "scrape cycle finished"
            );
            summary
        }
        .instrument(span)
        .await;
        Some(summary)
    }

    /// One match-and-notify pass over the profiles of `tier`. Returns
    /// `Ok(None)` when the previous pass of the same tier is still running and
    /// an error only when the profile list itself cannot be loaded.
    pub async fn run_match_cycle(
        &self,
        tier: NotificationFrequency,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchCycleSummary>, StoreError> {
        let Some(lock) = self.tier_locks.get(&tier) else {
            return Ok(None);
        };
        let Ok(_running) = lock.try_lock() else {
            warn!(%tier, "previous match cycle still running; skipping");
            return Ok(None);
        };

        let span = info_span!("match_cycle", %tier);
        async {
            let _reading = self.store_gate.read().await;
            self.set_phase(tier, TierPhase::Matching).await;
            let profiles = match self.profiles.list(Some(tier)).await {
                Ok(profiles) => profiles,
                Err(err) => {
                    self.set_phase(tier, TierPhase::Idle).await;
                    return Err(err);
                }
            };

            let mut summary = MatchCycleSummary {
                tier: Some(tier),
                profiles_considered: profiles.len(),
                ..Default::default()
            };
            for profile in &profiles {
                match self.process_profile(profile, now).await {
                    ProfileOutcome::Cooldown => summary.skipped_cooldown += 1,
                    ProfileOutcome::Malformed => summary.skipped_malformed += 1,
                    ProfileOutcome::NoMatches => summary.without_matches += 1,
                    ProfileOutcome::Notified => summary.notified += 1,
                    ProfileOutcome::Failed => summary.failed += 1,
                }
                self.set_phase(tier, TierPhase::Matching).await;
            }
            self.set_phase(tier, TierPhase::Idle).await;

            info!(
                profiles = summary.profiles_considered,
                cooldown = summary.skipped_cooldown,
                notified = summary.notified,
                failed = summary.failed,
                "match cycle finished"
            );
            Ok(Some(summary))
        }
        .instrument(span)
        .await
    }

    async fn process_profile(&self, profile: &SearchProfile, now: DateTime<Utc>) -> ProfileOutcome {
        let profile_id = profile.id;
        if profile.in_cooldown(now) {
            return ProfileOutcome::Cooldown;
        }

        let criteria = match profile.decode_criteria() {
            Ok(criteria) => criteria,
            Err(err) => {
                warn!(%profile_id, error = %err, "skipping profile with malformed criteria");
                return ProfileOutcome::Malformed;
            }
        };

        let window_start = profile.candidate_window_start(now, self.settings.fallback_window);
        let candidates = match self.listings.since(window_start).await {
            Ok(listings) => listings,
            Err(err) => {
                error!(%profile_id, error = %err, "loading candidate listings failed");
                return ProfileOutcome::Failed;
            }
        };

        let mut good: Vec<MatchResult> = self
            .engine
            .score(&criteria, &candidates)
            .into_iter()
            .filter(|m| m.match_score >= self.settings.match_threshold)
            .collect();
        if good.is_empty() {
            return ProfileOutcome::NoMatches;
        }
        good.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));

        self.set_phase(profile.notification_frequency, TierPhase::Notifying).await;
        if let Err(err) = self.dispatcher.send(&profile.user_email, &good, now).await {
            // last_notification stays put so the same matches come round again
            warn!(%profile_id, error = %err, "digest dispatch failed");
            return ProfileOutcome::Failed;
        }
        if let Err(err) = self.profiles.touch_notified(profile_id, now).await {
            warn!(%profile_id, error = %err, "digest sent but notification time not recorded");
        }
        ProfileOutcome::Notified
    }

    /// Runs one scrape immediately, then registers the scrape job and one
    /// match job per scheduled tier and starts the cron ticker.
    pub async fn start(self: Arc<Self>, cron: &CronSchedule) -> Result<JobScheduler> {
        self.run_scrape_cycle(Utc::now()).await;

        let sched = JobScheduler::new().await.context("creating scheduler")?;

        let scheduler = Arc::clone(&self);
        let job = Job::new_async(cron.scrape.as_str(), move |_uuid, _l| {
            let scheduler = Arc::clone(&scheduler);
            Box::pin(async move {
                scheduler.run_scrape_cycle(Utc::now()).await;
            })
        })
        .with_context(|| format!("creating scrape job for cron {}", cron.scrape))?;
        sched.add(job).await.context("adding scrape job")?;

        for tier in SCHEDULED_TIERS {
            let expr = match tier {
                NotificationFrequency::Daily => cron.daily.as_str(),
                _ => cron.hourly.as_str(),
            };
            let scheduler = Arc::clone(&self);
            let job = Job::new_async(expr, move |_uuid, _l| {
                let scheduler = Arc::clone(&scheduler);
                Box::pin(async move {
                    if let Err(err) = scheduler.run_match_cycle(tier, Utc::now()).await {
                        error!(%tier, error = %err, "match cycle aborted");
                    }
                })
            })
            .with_context(|| format!("creating {tier} match job for cron {expr}"))?;
            sched.add(job).await.with_context(|| format!("adding {tier} match job"))?;
        }

        sched.start().await.context("starting scheduler")?;
        info!(scrape = %cron.scrape, hourly = %cron.hourly, daily = %cron.daily, "scheduler started");
        Ok(sched)
    }
}
