//! Scrape adapter contract, shared HTML card parsing, and the per-site
//! adapters for Swiss rental portals.

mod flatfox;
mod immoscout;

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flatmatch_core::{Feature, ListingDraft, SearchCriteria};
use flatmatch_storage::{FetchError, HttpFetcher};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub use flatfox::FlatfoxAdapter;
pub use immoscout::ImmoscoutAdapter;

pub const CRATE_NAME: &str = "flatmatch-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at,
        }
    }
}

/// One listing site. Adapters build their own search query and parse their own
/// markup; fetching, retries and timeouts go through [`HttpFetcher`].
#[async_trait]
pub trait ScrapeAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Name stamped on every listing this adapter produces.
    fn display_name(&self) -> &'static str;

    /// Search page URL. `None` asks for the unfiltered listing feed.
    fn search_url(&self, criteria: Option<&SearchCriteria>) -> Result<String, AdapterError>;

    fn parse_search_page(&self, html: &str, page_url: &str) -> Result<Vec<ListingDraft>, AdapterError>;

    async fn scrape(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        criteria: Option<&SearchCriteria>,
    ) -> Result<Vec<ListingDraft>, AdapterError> {
        let url = self.search_url(criteria)?;
        let page = http.fetch_page(ctx.run_id, self.source_id(), &url).await?;
        self.parse_search_page(&page.body, &page.final_url)
    }

    /// Releases whatever the adapter holds between scrapes. Called after every
    /// scrape attempt, successful or not.
    async fn cleanup(&self) {}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub fn adapter_for_source(source_id: &str, base_url: Option<&str>) -> Option<Arc<dyn ScrapeAdapter>> {
    match source_id {
        "flatfox" => Some(Arc::new(FlatfoxAdapter::new(base_url))),
        "immoscout" => Some(Arc::new(ImmoscoutAdapter::new(base_url))),
        _ => None,
    }
}

/// Explicit set of adapters handed to the scheduler and the live search.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ScrapeAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn ScrapeAdapter>>) -> Self {
        Self { adapters }
    }

    /// Every built-in adapter with its default base URL.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(FlatfoxAdapter::new(None)),
            Arc::new(ImmoscoutAdapter::new(None)),
        ])
    }

    /// Enabled sources only. A source id without an adapter is a configuration
    /// error rather than a silently empty source.
    pub fn from_sources(sources: &[SourceConfig]) -> Result<Self, AdapterError> {
        let mut adapters = Vec::new();
        for source in sources.iter().filter(|s| s.enabled) {
            let adapter = adapter_for_source(&source.source_id, source.base_url.as_deref()).ok_or_else(|| {
                AdapterError::Message(format!("no adapter registered for {}", source.source_id))
            })?;
            adapters.push(adapter);
        }
        Ok(Self::new(adapters))
    }

    pub fn adapters(&self) -> &[Arc<dyn ScrapeAdapter>] {
        &self.adapters
    }

    pub fn source_ids(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.source_id()).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// CSS selectors describing one site's result card layout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CardSelectors {
    pub card: &'static str,
    pub title: &'static str,
    pub link: &'static str,
    pub price: &'static str,
    pub location: &'static str,
    pub details: &'static str,
    pub features: &'static str,
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("invalid selector `{css}`: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn first_text(card: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn first_attr(card: &ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

/// Parses every result card on a search page. Cards without a price, address,
/// title or link are dropped; they never fail the page.
pub(crate) fn parse_cards(
    html: &str,
    page_url: &str,
    source: &str,
    selectors: &CardSelectors,
) -> Result<Vec<ListingDraft>, AdapterError> {
    let card_sel = selector(selectors.card)?;
    let title_sel = selector(selectors.title)?;
    let link_sel = selector(selectors.link)?;
    let price_sel = selector(selectors.price)?;
    let location_sel = selector(selectors.location)?;
    let details_sel = selector(selectors.details)?;
    let features_sel = selector(selectors.features)?;

    let document = Html::parse_document(html);
    let mut drafts = Vec::new();

    for card in document.select(&card_sel) {
        let Some(title) = first_text(&card, &title_sel) else {
            debug!(source, "skipping card without title");
            continue;
        };
        let Some(link) = first_attr(&card, &link_sel, "href").and_then(|href| absolute_url(page_url, &href))
        else {
            debug!(source, title = %title, "skipping card without link");
            continue;
        };
        let Some(price) = first_text(&card, &price_sel).as_deref().and_then(parse_price) else {
            debug!(source, title = %title, "could not parse price");
            continue;
        };
        let Some(location) = first_text(&card, &location_sel) else {
            debug!(source, title = %title, "could not find location");
            continue;
        };

        let details = first_text(&card, &details_sel).unwrap_or_default();
        let labels = card
            .select(&features_sel)
            .filter_map(|n| text_or_none(n.text().collect::<String>()));

        drafts.push(ListingDraft {
            source: Some(source.to_string()),
            external_id: None,
            title: Some(title),
            price: Some(price),
            location: Some(location),
            rooms: parse_rooms(&details),
            size: parse_size(&details),
            features: normalize_features(labels),
            link: Some(link),
        });
    }

    Ok(drafts)
}

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:['’\u{a0} ,]\d{3})+|\d+)\b(?:\.(\d{1,2})\b)?").expect("static price pattern")
});

/// First amount in the text, thousands separators dropped: "CHF 1'850.– +
/// 200.– charges" is 1850.
pub fn parse_price(text: &str) -> Option<f64> {
    let caps = PRICE_RE.captures(text)?;
    let whole: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    let amount = match caps.get(2) {
        Some(cents) => format!("{whole}.{}", cents.as_str()),
        None => whole,
    };
    amount.parse().ok()
}

static ROOMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(?:pièces?|pieces?|pces?|zimmer|rooms?)").expect("static rooms pattern")
});

static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*m(?:²|2)").expect("static size pattern"));

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', ".").parse().ok())
}

pub fn parse_rooms(text: &str) -> Option<f64> {
    capture_number(&ROOMS_RE, text)
}

pub fn parse_size(text: &str) -> Option<f64> {
    capture_number(&SIZE_RE, text)
}

/// Site labels to vocabulary tags, deduplicated, unknown labels dropped.
pub fn normalize_features(labels: impl IntoIterator<Item = String>) -> Vec<String> {
    labels
        .into_iter()
        .filter_map(|label| Feature::from_site_label(&label))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|f| f.as_str().to_string())
        .collect()
}

pub fn absolute_url(page_url: &str, href: &str) -> Option<String> {
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(page_url).ok()?.join(href).ok().map(|u| u.to_string()),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}
