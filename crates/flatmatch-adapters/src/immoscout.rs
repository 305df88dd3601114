use async_trait::async_trait;
use flatmatch_core::{ListingDraft, SearchCriteria};
use reqwest::Url;

use crate::{format_number, parse_cards, AdapterError, CardSelectors, ScrapeAdapter};

const DEFAULT_BASE_URL: &str = "https://www.immoscout24.ch/fr/immobilier/louer/ville-region";
const REGION_PLACEHOLDER: &str = "ville-region";

const SELECTORS: CardSelectors = CardSelectors {
    card: ".PropertyCard",
    title: ".PropertyCard__title",
    link: "a[href]",
    price: ".PropertyCard__price",
    location: ".PropertyCard__location",
    details: ".PropertyCard__details",
    features: ".PropertyCard__features span",
};

#[derive(Debug, Clone)]
pub struct ImmoscoutAdapter {
    base_url: String,
}

impl ImmoscoutAdapter {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
        }
    }
}

/// "La Chaux-de-Fonds" becomes "la-chaux-de-fonds".
fn region_slug(location: &str) -> String {
    location
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

#[async_trait]
impl ScrapeAdapter for ImmoscoutAdapter {
    fn source_id(&self) -> &'static str {
        "immoscout"
    }

    fn display_name(&self) -> &'static str {
        "ImmoScout24"
    }

    fn search_url(&self, criteria: Option<&SearchCriteria>) -> Result<String, AdapterError> {
        let base = match criteria.map(|c| c.location.trim()).filter(|l| !l.is_empty()) {
            Some(location) => self.base_url.replace(REGION_PLACEHOLDER, &region_slug(location)),
            None => self.base_url.clone(),
        };
        let mut url =
            Url::parse(&base).map_err(|e| AdapterError::Message(format!("invalid immoscout url `{base}`: {e}")))?;

        if let Some(criteria) = criteria {
            // the site only filters on a minimum room count
            let params = [("pf", criteria.min_price), ("pt", criteria.max_price), ("r", criteria.min_rooms)];
            if params.iter().any(|(_, v)| v.is_some()) {
                let mut query = url.query_pairs_mut();
                for (key, value) in params {
                    if let Some(value) = value {
                        query.append_pair(key, &format_number(value));
                    }
                }
            }
        }
        Ok(url.to_string())
    }

    fn parse_search_page(&self, html: &str, page_url: &str) -> Result<Vec<ListingDraft>, AdapterError> {
        parse_cards(html, page_url, self.display_name(), &SELECTORS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_replaces_region_segment() {
        let adapter = ImmoscoutAdapter::new(None);
        let criteria = SearchCriteria::new("La Chaux-de-Fonds").with_price(800.0, 1500.0).with_rooms(3.0, 4.0);
        assert_eq!(
            adapter.search_url(Some(&criteria)).unwrap(),
            "https://www.immoscout24.ch/fr/immobilier/louer/la-chaux-de-fonds?pf=800&pt=1500&r=3"
        );
    }

    #[test]
    fn no_filters_means_no_query_string() {
        let adapter = ImmoscoutAdapter::new(None);
        assert_eq!(
            adapter.search_url(Some(&SearchCriteria::new("Bern"))).unwrap(),
            "https://www.immoscout24.ch/fr/immobilier/louer/bern"
        );
        assert_eq!(adapter.search_url(None).unwrap(), DEFAULT_BASE_URL);
    }
}
