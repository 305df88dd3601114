use std::sync::Arc;
use std::time::Duration;

use flatmatch_adapters::{AdapterContext, AdapterRegistry, ScrapeAdapter};
use flatmatch_core::{ListingDraft, NewListing, SearchCriteria};
use flatmatch_storage::HttpFetcher;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Default)]
pub struct FanOut {
    pub listings: Vec<NewListing>,
    pub sources_attempted: usize,
    pub sources_failed: usize,
    pub drafts_rejected: usize,
}

async fn scrape_source(
    adapter: Arc<dyn ScrapeAdapter>,
    http: Arc<HttpFetcher>,
    ctx: AdapterContext,
    criteria: Option<SearchCriteria>,
    limit: Duration,
) -> Option<Vec<ListingDraft>> {
    let source_id = adapter.source_id();
    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(limit, adapter.scrape(&http, &ctx, criteria.as_ref())).await;
    adapter.cleanup().await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(Ok(drafts)) => {
            info!(source_id, found = drafts.len(), elapsed_ms, "source scraped");
            Some(drafts)
        }
        Ok(Err(err)) => {
            warn!(source_id, elapsed_ms, error = %err, "source scrape failed");
            None
        }
        Err(_) => {
            warn!(source_id, elapsed_ms, limit_secs = limit.as_secs_f64(), "source scrape timed out");
            None
        }
    }
}

/// Scrapes every adapter concurrently, each bounded by `limit`. A failing or
/// slow source contributes no listings and never affects the others. Drafts
/// that fail validation are dropped here.
pub async fn scrape_all(
    registry: &AdapterRegistry,
    http: Arc<HttpFetcher>,
    ctx: &AdapterContext,
    criteria: Option<&SearchCriteria>,
    limit: Duration,
) -> FanOut {
    let mut tasks = JoinSet::new();
    for adapter in registry.adapters() {
        let span = info_span!("scrape_source", run_id = %ctx.run_id, source_id = adapter.source_id());
        tasks.spawn(
            scrape_source(
                Arc::clone(adapter),
                Arc::clone(&http),
                ctx.clone(),
                criteria.cloned(),
                limit,
            )
            .instrument(span),
        );
    }

    let mut out = FanOut {
        sources_attempted: registry.len(),
        ..Default::default()
    };
    while let Some(joined) = tasks.join_next().await {
        let drafts = match joined {
            Ok(Some(drafts)) => drafts,
            Ok(None) => {
                out.sources_failed += 1;
                continue;
            }
            Err(err) => {
                warn!(error = %err, "scrape task aborted");
                out.sources_failed += 1;
                continue;
            }
        };
        for draft in drafts {
            match draft.validate() {
                Ok(listing) => out.listings.push(listing),
                Err(err) => {
                    debug!(error = %err, "dropping invalid listing");
                    out.drafts_rejected += 1;
                }
            }
        }
    }
    out
}
