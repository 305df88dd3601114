use flatmatch_core::{Criterion, Listing, MatchResult, SearchCriteria};

/// Relative weight of each criterion. The defaults sum to 1.0, which keeps
/// scores within 0..=100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchWeights {
    pub price: f64,
    pub location: f64,
    pub rooms: f64,
    pub size: f64,
    pub features: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            price: 0.30,
            location: 0.25,
            rooms: 0.20,
            size: 0.15,
            features: 0.10,
        }
    }
}

impl MatchWeights {
    pub fn total(&self) -> f64 {
        self.price + self.location + self.rooms + self.size + self.features
    }
}

#[derive(Default)]
struct Tally {
    sum: f64,
    matching: Vec<Criterion>,
    missing: Vec<Criterion>,
}

impl Tally {
    fn check(&mut self, criterion: Criterion, weight: f64, passed: bool) {
        if passed {
            self.sum += weight;
            self.matching.push(criterion);
        } else {
            self.missing.push(criterion);
        }
    }
}

fn within(value: f64, (min, max): (f64, f64)) -> bool {
    min <= value && value <= max
}

/// Weighted linear matcher. Pure computation: one result per listing, in input
/// order, no filtering.
#[derive(Debug, Clone, Default)]
pub struct MatchEngine {
    weights: MatchWeights,
}

impl MatchEngine {
    pub fn new(weights: MatchWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, criteria: &SearchCriteria, listings: &[Listing]) -> Vec<MatchResult> {
        listings
            .iter()
            .map(|listing| self.score_one(criteria, listing))
            .collect()
    }

    pub fn score_one(&self, criteria: &SearchCriteria, listing: &Listing) -> MatchResult {
        let w = &self.weights;
        let mut tally = Tally::default();

        if let Some(range) = criteria.price_range() {
            tally.check(Criterion::PriceRange, w.price, within(listing.price, range));
        }

        let wanted = criteria.location.to_lowercase();
        tally.check(
            Criterion::Location,
            w.location,
            listing.location.to_lowercase().contains(&wanted),
        );

        if let (Some(rooms), Some(range)) = (listing.rooms, criteria.rooms_range()) {
            tally.check(Criterion::Rooms, w.rooms, within(rooms, range));
        }

        if let (Some(size), Some(range)) = (listing.size, criteria.size_range()) {
            tally.check(Criterion::Size, w.size, within(size, range));
        }

        if !criteria.features.is_empty() && !listing.features.is_empty() {
            let shared = criteria.features.intersection(&listing.features).count();
            if shared > 0 {
                let fraction = shared as f64 / criteria.features.len() as f64;
                tally.sum += w.features * fraction;
                tally.matching.push(Criterion::Features);
            } else {
                tally.missing.push(Criterion::Features);
            }
        }

        MatchResult {
            listing: listing.clone(),
            match_score: to_percent(tally.sum),
            matching_criteria: tally.matching,
            missing_criteria: tally.missing,
        }
    }
}

fn to_percent(fraction: f64) -> f64 {
    let percent = (fraction * 100.0).clamp(0.0, 100.0);
    (percent * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flatmatch_core::Feature;
    use std::collections::BTreeSet;

    fn listing(location: &str, price: f64) -> Listing {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().unwrap();
        Listing {
            source: "Flatfox".into(),
            external_id: format!("{location}-{price}"),
            title: "Appartement".into(),
            price,
            location: location.into(),
            rooms: None,
            size: None,
            features: BTreeSet::new(),
            link: "https://flatfox.ch/fr/flat/1/".into(),
            created_at: ts,
            updated_at: ts,
        }
    }

    fn geneva_criteria() -> SearchCriteria {
        SearchCriteria::new("Geneva")
            .with_price(1000.0, 2000.0)
            .with_features([Feature::Balcony])
    }

    fn geneva_listing(price: f64) -> Listing {
        let mut l = listing("Geneva Old Town", price);
        l.features = [Feature::Balcony, Feature::Parking].into_iter().collect();
        l
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((MatchWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn price_location_and_features_match_scores_sixty_five() {
        let engine = MatchEngine::default();
        let result = engine.score_one(&geneva_criteria(), &geneva_listing(1500.0));
        assert_eq!(result.match_score, 65.00);
        assert_eq!(
            result.matching_criteria,
            vec![Criterion::PriceRange, Criterion::Location, Criterion::Features]
        );
        assert!(result.missing_criteria.is_empty());
    }

    #[test]
    fn price_out_of_range_scores_thirty_five() {
        let engine = MatchEngine::default();
        let result = engine.score_one(&geneva_criteria(), &geneva_listing(3000.0));
        assert_eq!(result.match_score, 35.00);
        assert_eq!(result.missing_criteria, vec![Criterion::PriceRange]);
        assert_eq!(result.matching_criteria, vec![Criterion::Location, Criterion::Features]);
    }

    #[test]
    fn complete_bounds_all_satisfied_scores_one_hundred() {
        let criteria = SearchCriteria::new("lausanne")
            .with_price(1500.0, 1500.0)
            .with_rooms(3.5, 3.5)
            .with_size(80.0, 80.0)
            .with_features([Feature::Balcony, Feature::Elevator]);
        let mut l = listing("Avenue de Cour 12, 1004 LAUSANNE", 1500.0);
        l.rooms = Some(3.5);
        l.size = Some(80.0);
        l.features = [Feature::Balcony, Feature::Elevator, Feature::Garden].into_iter().collect();

        let result = MatchEngine::default().score_one(&criteria, &l);
        assert_eq!(result.match_score, 100.00);
        assert_eq!(result.matching_criteria.len(), 5);
    }

    #[test]
    fn half_open_ranges_and_missing_listing_values_are_skipped() {
        let mut criteria = SearchCriteria::new("Bern");
        criteria.min_price = Some(1000.0);
        criteria.max_rooms = Some(4.0);
        criteria.min_size = Some(50.0);
        criteria.max_size = Some(90.0);
        let l = listing("Bern", 5000.0);

        let result = MatchEngine::default().score_one(&criteria, &l);
        assert_eq!(result.match_score, 25.00);
        assert_eq!(result.matching_criteria, vec![Criterion::Location]);
        assert!(result.missing_criteria.is_empty());
    }

    #[test]
    fn out_of_range_rooms_and_size_are_missing() {
        let criteria = SearchCriteria::new("Basel").with_rooms(2.0, 3.0).with_size(40.0, 60.0);
        let mut l = listing("Zurich", 2000.0);
        l.rooms = Some(4.5);
        l.size = Some(110.0);

        let result = MatchEngine::default().score_one(&criteria, &l);
        assert_eq!(result.match_score, 0.00);
        assert!(result.matching_criteria.is_empty());
        assert_eq!(
            result.missing_criteria,
            vec![Criterion::Location, Criterion::Rooms, Criterion::Size]
        );
    }

    #[test]
    fn partial_feature_overlap_is_fractional() {
        let criteria = SearchCriteria::new("Zug").with_features([
            Feature::Balcony,
            Feature::Elevator,
            Feature::Parking,
        ]);
        let mut l = listing("Zug", 2000.0);
        l.features = [Feature::Parking].into_iter().collect();

        let result = MatchEngine::default().score_one(&criteria, &l);
        // 0.25 + 0.10 / 3
        assert_eq!(result.match_score, 28.33);
        assert!(result.matching_criteria.contains(&Criterion::Features));
    }

    #[test]
    fn feature_check_skipped_when_listing_has_none() {
        let criteria = SearchCriteria::new("Zug").with_features([Feature::Garden]);
        let result = MatchEngine::default().score_one(&criteria, &listing("Zug", 2000.0));
        assert!(!result.matching_criteria.contains(&Criterion::Features));
        assert!(!result.missing_criteria.contains(&Criterion::Features));

        let mut l = listing("Zug", 2000.0);
        l.features = [Feature::Parking].into_iter().collect();
        let result = MatchEngine::default().score_one(&criteria, &l);
        assert_eq!(result.missing_criteria, vec![Criterion::Features]);
    }

    #[test]
    fn score_keeps_input_order_and_length() {
        let listings = vec![
            listing("Geneva", 900.0),
            listing("Lausanne", 1500.0),
            listing("Geneva", 1500.0),
        ];
        let results = MatchEngine::default().score(&geneva_criteria(), &listings);
        assert_eq!(results.len(), 3);
        let ids: Vec<_> = results.iter().map(|r| r.listing.external_id.clone()).collect();
        let expected: Vec<_> = listings.iter().map(|l| l.external_id.clone()).collect();
        assert_eq!(ids, expected);
        assert_eq!(results[2].match_score, 55.00);
    }

    #[test]
    fn scores_always_have_two_decimals_and_stay_in_bounds() {
        let heavy = MatchEngine::new(MatchWeights {
            price: 0.6,
            location: 0.6,
            rooms: 0.0,
            size: 0.0,
            features: 0.0,
        });
        let result = heavy.score_one(&geneva_criteria(), &geneva_listing(1500.0));
        assert_eq!(result.match_score, 100.0);

        let criteria = SearchCriteria::new("Sion").with_features([
            Feature::Balcony,
            Feature::Elevator,
            Feature::Parking,
            Feature::Terrace,
            Feature::Garden,
            Feature::Furnished,
        ]);
        let mut l = listing("Sion", 1200.0);
        l.features = [Feature::Garden].into_iter().collect();
        let score = MatchEngine::default().score_one(&criteria, &l).match_score;
        assert_eq!(score, 26.67);
        assert_eq!((score * 100.0).round() / 100.0, score);
    }
}
