use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of the real-estate listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Immobiliare,
    Idealista,
}

impl Source {
    /// Every source a zone may have a stored snapshot for.
    pub const ALL: [Source; 2] = [Source::Immobiliare, Source::Idealista];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Immobiliare => "immobiliare",
            Source::Idealista => "idealista",
        }
    }

    /// Public detail-page URL for a listing on this source.
    pub fn listing_url(&self, source_id: &str) -> String {
        match self {
            Source::Immobiliare => format!("https://www.immobiliare.it/annunci/{source_id}/"),
            Source::Idealista => format!("https://www.idealista.it/immobile/{source_id}/"),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneCoordinates {
    pub lat: f64,
    pub lng: f64,
}

/// A named geographic unit in the fixed hierarchy region > city > area > slug,
/// e.g. lazio > roma > litorale > axa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub region: String,
    pub city: String,
    pub area: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<ZoneCoordinates>,
    /// Immobiliare.it macrozone ID (z2 parameter) - broad area grouping multiple neighborhoods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immobiliare_z2: Option<u32>,
    /// Immobiliare.it microzone ID (z3 parameter) - specific neighborhood
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immobiliare_z3: Option<u32>,
}

/// On-disk shape of `data/zones.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonesFile {
    pub version: u32,
    pub updated_at: String,
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneFilter {
    pub area: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Location information for a listing, derived from the owning zone plus
/// whatever the source reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingLocation {
    pub region: String,
    pub province: String,
    pub city: String,
    pub zone: String,
    pub zone_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Per-listing property features. Counts carry both a best-effort numeric
/// value and the raw source string when the string says more than the number
/// (e.g. "5+"). Amenity booleans are `None` when the source gave no signal,
/// never `false` by omission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListingFeatures {
    pub area: Option<i64>,
    pub rooms: Option<i64>,
    pub rooms_raw: Option<String>,
    pub bedrooms: Option<i64>,
    pub bedrooms_raw: Option<String>,
    pub bathrooms: Option<i64>,
    pub bathrooms_raw: Option<String>,
    pub floor: Option<i64>,
    pub floor_raw: Option<String>,
    pub total_floors: Option<i64>,
    pub elevator: Option<bool>,
    pub energy_class: Option<String>,
    pub year_built: Option<i64>,
    pub condition: Option<String>,
    pub typology: Option<String>,
    pub heating: Option<String>,
    pub balcony: Option<bool>,
    pub terrace: Option<bool>,
    pub furnished: Option<bool>,
    pub cellar: Option<bool>,
    pub luxury: Option<bool>,
    pub air_conditioning: Option<bool>,
    pub parking: Option<bool>,
    pub other_features: Option<Vec<String>>,
}

/// One real-estate advertisement from one external source.
///
/// Identity is (source, sourceId); `id` is the derived composite key used for
/// storage lookups. A price of 0 means the source did not disclose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub source: Source,
    pub source_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: i64,
    pub price_formatted: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<i64>,
    pub images: Vec<String>,
    pub location: ListingLocation,
    pub features: ListingFeatures,
    pub url: String,
    pub scraped_at: DateTime<Utc>,
}

impl Listing {
    /// Composite identity key, `{source}-{sourceId}`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.source, self.source_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_limit: Option<bool>,
}

/// One scrape run's output for one (zone, source) pair. The unit of
/// persistence: each write fully replaces the stored file for the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub zone_id: String,
    pub scraped_at: DateTime<Utc>,
    pub source: Source,
    pub listing_count: usize,
    pub listings: Vec<Listing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SnapshotMetadata>,
}

/// Storage projection of a listing: everything reconstructible from the
/// owning zone and the source tag is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactListing {
    pub source_id: String,
    pub title: String,
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<i64>,
    pub images: Vec<String>,
    pub features: ListingFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactSnapshot {
    pub zone_id: String,
    pub scraped_at: DateTime<Utc>,
    pub source: Source,
    pub listing_count: usize,
    pub listings: Vec<CompactListing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SnapshotMetadata>,
}
