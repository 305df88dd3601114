use async_trait::async_trait;
use flatmatch_core::{ListingDraft, SearchCriteria};
use reqwest::Url;

use crate::{format_number, parse_cards, AdapterError, CardSelectors, ScrapeAdapter};

const DEFAULT_BASE_URL: &str = "https://flatfox.ch/fr/search/";

const SELECTORS: CardSelectors = CardSelectors {
    card: ".ListingItem",
    title: "h3",
    link: "a[href]",
    price: "[data-cy='price']",
    location: "[data-cy='address']",
    details: "[data-cy='listing-characteristics']",
    features: "[data-cy='listing-characteristics'] span",
};

#[derive(Debug, Clone)]
pub struct FlatfoxAdapter {
    base_url: String,
}

impl FlatfoxAdapter {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
        }
    }
}

#[async_trait]
impl ScrapeAdapter for FlatfoxAdapter {
    fn source_id(&self) -> &'static str {
        "flatfox"
    }

    fn display_name(&self) -> &'static str {
        "Flatfox"
    }

    fn search_url(&self, criteria: Option<&SearchCriteria>) -> Result<String, AdapterError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AdapterError::Message(format!("invalid flatfox base url: {e}")))?;
        let Some(criteria) = criteria else {
            return Ok(url.to_string());
        };

        let mut params: Vec<(&str, String)> = Vec::new();
        let location = criteria.location.trim();
        if !location.is_empty() {
            params.push(("q", location.to_string()));
        }
        for (key, value) in [
            ("min_price", criteria.min_price),
            ("max_price", criteria.max_price),
            ("min_rooms", criteria.min_rooms),
            ("max_rooms", criteria.max_rooms),
        ] {
            if let Some(value) = value {
                params.push((key, format_number(value)));
            }
        }
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url.to_string())
    }

    fn parse_search_page(&self, html: &str, page_url: &str) -> Result<Vec<ListingDraft>, AdapterError> {
        parse_cards(html, page_url, self.display_name(), &SELECTORS)
    }
}
