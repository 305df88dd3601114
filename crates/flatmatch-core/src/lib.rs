//! Core domain model for the apartment matcher: search criteria, scraped
//! listings, search profiles and match results.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "flatmatch-core";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be a finite number, got {value}")]
    InvalidNumber { field: &'static str, value: f64 },
    #[error("`{field}` lower bound {min} exceeds upper bound {max}")]
    InvertedRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
    #[error("search location must not be empty")]
    EmptyLocation,
    #[error("invalid email address `{0}`")]
    InvalidEmail(String),
    #[error("unknown notification frequency `{0}` (expected hourly, daily or realtime)")]
    UnknownFrequency(String),
    #[error("unknown feature tag `{0}`")]
    UnknownFeature(String),
    #[error("malformed search criteria: {0}")]
    MalformedCriteria(String),
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn check_finite(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_finite() => Err(ValidationError::InvalidNumber { field, value: v }),
        _ => Ok(()),
    }
}

fn check_range(field: &'static str, min: Option<f64>, max: Option<f64>) -> Result<(), ValidationError> {
    check_finite(field, min)?;
    check_finite(field, max)?;
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ValidationError::InvertedRange { field, min, max });
        }
    }
    Ok(())
}

/// Normalized amenity tag. Scraped labels in French or English collapse onto
/// this vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Balcony,
    Elevator,
    Parking,
    Terrace,
    Garden,
    Furnished,
}

const SITE_LABELS: &[(&str, Feature)] = &[
    ("balcon", Feature::Balcony),
    ("ascenseur", Feature::Elevator),
    ("elevator", Feature::Elevator),
    ("lift", Feature::Elevator),
    ("parking", Feature::Parking),
    ("garage", Feature::Parking),
    ("terrasse", Feature::Terrace),
    ("terrace", Feature::Terrace),
    ("jardin", Feature::Garden),
    ("garden", Feature::Garden),
    ("meublé", Feature::Furnished),
    ("meuble", Feature::Furnished),
    ("furnished", Feature::Furnished),
];

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Balcony,
        Feature::Elevator,
        Feature::Parking,
        Feature::Terrace,
        Feature::Garden,
        Feature::Furnished,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::Balcony => "balcony",
            Feature::Elevator => "elevator",
            Feature::Parking => "parking",
            Feature::Terrace => "terrace",
            Feature::Garden => "garden",
            Feature::Furnished => "furnished",
        }
    }

    /// Maps a free-text amenity label as shown on a listing site ("Balcon",
    /// "Place de parc / garage", "Meublé") to a tag. First match wins.
    pub fn from_site_label(label: &str) -> Option<Feature> {
        let lower = label.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        SITE_LABELS
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, feature)| *feature)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::UnknownFeature(s.to_string()))
    }
}

/// User-supplied query. A range only takes part in matching when both of its
/// bounds are present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub location: String,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_rooms: Option<f64>,
    #[serde(default)]
    pub max_rooms: Option<f64>,
    #[serde(default)]
    pub min_size: Option<f64>,
    #[serde(default)]
    pub max_size: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: BTreeSet<Feature>,
}

impl SearchCriteria {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn with_price(mut self, min: f64, max: f64) -> Self {
        self.min_price = Some(min);
        self.max_price = Some(max);
        self
    }

    pub fn with_rooms(mut self, min: f64, max: f64) -> Self {
        self.min_rooms = Some(min);
        self.max_rooms = Some(max);
        self
    }

    pub fn with_size(mut self, min: f64, max: f64) -> Self {
        self.min_size = Some(min);
        self.max_size = Some(max);
        self
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        self.features = features.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.location.trim().is_empty() {
            return Err(ValidationError::EmptyLocation);
        }
        check_range("price", self.min_price, self.max_price)?;
        check_range("rooms", self.min_rooms, self.max_rooms)?;
        check_range("size", self.min_size, self.max_size)?;
        Ok(())
    }

    pub fn price_range(&self) -> Option<(f64, f64)> {
        self.min_price.zip(self.max_price)
    }

    pub fn rooms_range(&self) -> Option<(f64, f64)> {
        self.min_rooms.zip(self.max_rooms)
    }

    pub fn size_range(&self) -> Option<(f64, f64)> {
        self.min_size.zip(self.max_size)
    }
}

/// Raw record handed over by a scrape adapter. Every field is optional here;
/// [`ListingDraft::validate`] enforces the required ones before anything is
/// stored or scored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingDraft {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub rooms: Option<f64>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    #[serde(default, alias = "url")]
    pub link: Option<String>,
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

impl ListingDraft {
    pub fn validate(self) -> Result<NewListing, ValidationError> {
        let source = required_text("source", self.source)?;
        let title = required_text("title", self.title)?;
        let location = required_text("location", self.location)?;
        let link = required_text("link", self.link)?;
        let price = self.price.ok_or(ValidationError::MissingField("price"))?;
        check_finite("price", Some(price))?;
        check_finite("rooms", self.rooms)?;
        check_finite("size", self.size)?;

        let external_id = self
            .external_id
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| link.clone());
        let features = self
            .features
            .iter()
            .filter_map(|label| label.parse::<Feature>().ok().or_else(|| Feature::from_site_label(label)))
            .collect();

        Ok(NewListing {
            source,
            external_id,
            title,
            price,
            location,
            rooms: self.rooms,
            size: self.size,
            features,
            link,
        })
    }
}

/// Validated listing payload, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewListing {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub location: String,
    pub rooms: Option<f64>,
    pub size: Option<f64>,
    pub features: BTreeSet<Feature>,
    pub link: String,
}

/// Persisted listing. `external_id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub price: f64,
    pub location: String,
    pub rooms: Option<f64>,
    pub size: Option<f64>,
    pub features: BTreeSet<Feature>,
    pub link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn first_seen(new: NewListing, now: DateTime<Utc>) -> Self {
        Self {
            source: new.source,
            external_id: new.external_id,
            title: new.title,
            price: new.price,
            location: new.location,
            rooms: new.rooms,
            size: new.size,
            features: new.features,
            link: new.link,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites every mutable field. `external_id` and `created_at` stay.
    pub fn refresh(&mut self, new: NewListing, now: DateTime<Utc>) {
        self.source = new.source;
        self.title = new.title;
        self.price = new.price;
        self.location = new.location;
        self.rooms = new.rooms;
        self.size = new.size;
        self.features = new.features;
        self.link = new.link;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFrequency {
    Hourly,
    Daily,
    Realtime,
}

impl NotificationFrequency {
    pub const ALL: [NotificationFrequency; 3] = [
        NotificationFrequency::Hourly,
        NotificationFrequency::Daily,
        NotificationFrequency::Realtime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationFrequency::Hourly => "hourly",
            NotificationFrequency::Daily => "daily",
            NotificationFrequency::Realtime => "realtime",
        }
    }

    /// Minimum spacing between two digests. Realtime has no cadence wired up,
    /// so it carries no cooldown either.
    pub fn cooldown(self) -> Option<Duration> {
        match self {
            NotificationFrequency::Hourly => Some(Duration::hours(1)),
            NotificationFrequency::Daily => Some(Duration::days(1)),
            NotificationFrequency::Realtime => None,
        }
    }
}

impl fmt::Display for NotificationFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationFrequency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        NotificationFrequency::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::UnknownFrequency(s.to_string()))
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let trimmed = email.trim();
    let valid = match trimmed.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !trimmed.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail(email.to_string()))
    }
}

/// Durable notification subscription. Criteria are kept in their serialized
/// form and decoded per match cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchProfile {
    pub id: Uuid,
    pub user_email: String,
    pub criteria: serde_json::Value,
    pub notification_frequency: NotificationFrequency,
    pub created_at: DateTime<Utc>,
    pub last_notification: Option<DateTime<Utc>>,
}

impl SearchProfile {
    pub fn new(
        email: &str,
        criteria: &SearchCriteria,
        frequency: NotificationFrequency,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        validate_email(email)?;
        criteria.validate()?;
        let criteria = serde_json::to_value(criteria)
            .map_err(|e| ValidationError::MalformedCriteria(e.to_string()))?;
        Ok(Self {
            id: Uuid::new_v4(),
            user_email: email.trim().to_string(),
            criteria,
            notification_frequency: frequency,
            created_at: now,
            last_notification: None,
        })
    }

    pub fn decode_criteria(&self) -> Result<SearchCriteria, ValidationError> {
        let criteria: SearchCriteria = serde_json::from_value(self.criteria.clone())
            .map_err(|e| ValidationError::MalformedCriteria(e.to_string()))?;
        criteria.validate()?;
        Ok(criteria)
    }

    /// True while the profile's tier cooldown since its last digest has not
    /// yet elapsed.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match (self.last_notification, self.notification_frequency.cooldown()) {
            (Some(last), Some(cooldown)) => now - last < cooldown,
            _ => false,
        }
    }

    /// Start of the candidate window: the last digest, but never further back
    /// than `fallback` before `now`.
    pub fn candidate_window_start(&self, now: DateTime<Utc>, fallback: Duration) -> DateTime<Utc> {
        let floor = now - fallback;
        match self.last_notification {
            Some(last) => last.max(floor),
            None => floor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    PriceRange,
    Location,
    Rooms,
    Size,
    Features,
}

impl Criterion {
    pub fn as_str(self) -> &'static str {
        match self {
            Criterion::PriceRange => "price_range",
            Criterion::Location => "location",
            Criterion::Rooms => "rooms",
            Criterion::Size => "size",
            Criterion::Features => "features",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scoring one listing against one set of criteria. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub listing: Listing,
    pub match_score: f64,
    pub matching_criteria: Vec<Criterion>,
    pub missing_criteria: Vec<Criterion>,
}
