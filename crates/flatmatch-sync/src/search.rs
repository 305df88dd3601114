use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flatmatch_adapters::{AdapterContext, AdapterRegistry};
use flatmatch_core::{Listing, MatchResult, SearchCriteria, ValidationError};
use flatmatch_storage::HttpFetcher;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::fanout::scrape_all;
use crate::scoring::MatchEngine;

/// Result of a live search. "Nothing matched" is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Matches { matches: Vec<MatchResult> },
    NoMatches { total_scraped: usize, duration: Duration },
}

/// On-demand search across every registered source. Nothing is persisted and
/// notification state is left alone.
pub struct LiveSearch {
    registry: AdapterRegistry,
    http: Arc<HttpFetcher>,
    engine: MatchEngine,
    source_timeout: Duration,
}

impl LiveSearch {
    pub fn new(registry: AdapterRegistry, http: Arc<HttpFetcher>, engine: MatchEngine, source_timeout: Duration) -> Self {
        Self {
            registry,
            http,
            engine,
            source_timeout,
        }
    }

    pub async fn search(&self, criteria: &SearchCriteria, now: DateTime<Utc>) -> Result<SearchOutcome, ValidationError> {
        criteria.validate()?;
        let started = tokio::time::Instant::now();
        let ctx = AdapterContext::new(now);
        let span = info_span!("live_search", run_id = %ctx.run_id, location = %criteria.location);

        async {
            let fan_out = scrape_all(
                &self.registry,
                Arc::clone(&self.http),
                &ctx,
                Some(criteria),
                self.source_timeout,
            )
            .await;
            let total_scraped = fan_out.listings.len();
            let listings: Vec<Listing> = fan_out
                .listings
                .into_iter()
                .map(|l| Listing::first_seen(l, now))
                .collect();

            let mut matches = self.engine.score(criteria, &listings);
            matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));

            let duration = started.elapsed();
            info!(
                total_scraped,
                sources_failed = fan_out.sources_failed,
                duration_ms = duration.as_millis() as u64,
                "search completed"
            );
            if matches.is_empty() {
                Ok(SearchOutcome::NoMatches { total_scraped, duration })
            } else {
                Ok(SearchOutcome::Matches { matches })
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::tests::{draft, fetcher, Behaviour, CannedAdapter};
    use flatmatch_adapters::ScrapeAdapter;

    fn search_over(adapters: Vec<Arc<dyn ScrapeAdapter>>) -> LiveSearch {
        LiveSearch::new(
            AdapterRegistry::new(adapters),
            fetcher(),
            MatchEngine::default(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn results_are_sorted_by_score_descending() {
        let search = search_over(vec![
            Arc::new(CannedAdapter::new(
                "one",
                Behaviour::Drafts(vec![
                    draft("one", "far", "Basel", 1500.0),
                    draft("one", "cheap", "Geneva", 1200.0),
                ]),
            )),
            Arc::new(CannedAdapter::new(
                "two",
                Behaviour::Drafts(vec![draft("two", "pricey", "Geneva", 4000.0)]),
            )),
            Arc::new(CannedAdapter::new("down", Behaviour::Fail)),
        ]);
        let criteria = SearchCriteria::new("geneva").with_price(1000.0, 2000.0);

        let outcome = search.search(&criteria, Utc::now()).await.unwrap();
        let SearchOutcome::Matches { matches } = outcome else {
            panic!("expected matches");
        };
        let ids: Vec<_> = matches.iter().map(|m| m.listing.external_id.as_str()).collect();
        assert_eq!(ids, vec!["cheap", "far", "pricey"]);
        let scores: Vec<_> = matches.iter().map(|m| m.match_score).collect();
        assert_eq!(scores, vec![55.0, 30.0, 25.0]);
    }

    #[tokio::test]
    async fn no_listings_is_a_distinct_outcome() {
        let search = search_over(vec![Arc::new(CannedAdapter::new("down", Behaviour::Fail))]);
        let outcome = search.search(&SearchCriteria::new("Sion"), Utc::now()).await.unwrap();
        assert!(matches!(outcome, SearchOutcome::NoMatches { total_scraped: 0, .. }));
    }

    #[tokio::test]
    async fn invalid_criteria_are_rejected_before_scraping() {
        let adapter = Arc::new(CannedAdapter::new("one", Behaviour::Drafts(vec![])));
        let search = search_over(vec![adapter.clone()]);
        let err = search
            .search(&SearchCriteria::new("Bern").with_rooms(4.0, 2.0), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvertedRange { field: "rooms", .. }));
        assert_eq!(adapter.cleanups.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
