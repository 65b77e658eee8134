//! Paid scraping-service adapter. Runs an actor against the zone's search
//! page and normalizes the dataset items it returns. Requires `APIFY_TOKEN`.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::images::image_ref;
use crate::models::{Listing, ListingFeatures, ListingLocation, Source, Zone};
use crate::parsing::{parse_count_text, parse_floor_text, parse_number_text, parse_price};
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::{ScrapeMetadata, ScrapeOptions, ScrapeResult};
use crate::scrapers::{dedupe_listings, USER_AGENT};

const BASE_URL: &str = "https://api.apify.com/v2";
// Actor for immobiliare.it scraping, pay-per-result.
const ACTOR_ID: &str = "memo23~immobiliare-scraper";
const DEFAULT_LIMIT: usize = 1000;
const DEFAULT_MAX_PAGES: usize = 20;

pub struct ApifyScraper {
    client: Client,
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActorInput {
    start_urls: Vec<StartUrl>,
    max_items: usize,
    max_pages: usize,
}

#[derive(Debug, Serialize)]
struct StartUrl {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawItem {
    id: Option<i64>,
    title: Option<String>,
    share_url: Option<String>,
    analytics: Option<RawAnalytics>,
    price: Option<RawPrice>,
    media: Option<RawMedia>,
    main_data: Option<Vec<RawSection>>,
    energy_class: Option<RawValueField>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawAnalytics {
    price: Option<String>,
    region: Option<String>,
    province: Option<String>,
    macrozone: Option<String>,
    microzone: Option<String>,
    typology: Option<String>,
    num_bedrooms: Option<String>,
    elevator: Option<bool>,
    property_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawPrice {
    formatted_value: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMedia {
    images: Vec<RawImage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawImage {
    hd: Option<String>,
    sd: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSection {
    rows: Vec<RawRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRow {
    label: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawValueField {
    value: Option<String>,
}

fn search_url(zone: &Zone) -> String {
    // Sort by newest first so we always get the most recent listings
    format!(
        "https://www.immobiliare.it/vendita-case/{}/{}/?criterio=dataModifica&ordine=desc",
        zone.city, zone.slug
    )
}

fn main_data_value<'a>(item: &'a RawItem, label: &str) -> Option<&'a str> {
    for section in item.main_data.as_deref().unwrap_or_default() {
        let row = section
            .rows
            .iter()
            .find(|row| row.label.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(label)));
        if let Some(value) = row.and_then(|r| r.value.as_deref()) {
            return Some(value);
        }
    }
    None
}

fn extract_images(item: &RawItem) -> Vec<String> {
    let Some(media) = item.media.as_ref() else {
        return Vec::new();
    };
    media
        .images
        .iter()
        .filter_map(|img| img.hd.as_deref().or(img.sd.as_deref()))
        .filter(|url| !url.contains("placeholder") && !url.contains("data:image"))
        .map(image_ref)
        .collect()
}

/// Normalize one dataset item. Items without an id, or whose price fails to
/// parse, are skipped: this actor does not report undisclosed prices in a
/// distinguishable way.
fn normalize_listing(item: &RawItem, zone: &Zone, scraped_at: DateTime<Utc>) -> Option<Listing> {
    let source_id = item.id.filter(|&id| id != 0)?.to_string();
    let analytics = item.analytics.as_ref();

    let price_text = analytics
        .and_then(|a| a.price.as_deref())
        .or_else(|| item.price.as_ref().and_then(|p| p.value.as_deref()))
        .or_else(|| item.price.as_ref().and_then(|p| p.formatted_value.as_deref()))?;
    let (price, price_formatted) = parse_price(price_text);
    if price == 0 {
        return None;
    }

    let area = main_data_value(item, "Surface").and_then(parse_number_text);
    let rooms = main_data_value(item, "Rooms").map(parse_count_text).unwrap_or_default();
    let bathrooms = main_data_value(item, "Bathrooms")
        .map(parse_count_text)
        .unwrap_or_default();
    let floor = main_data_value(item, "Floor").map(parse_floor_text).unwrap_or_default();
    let bedrooms = main_data_value(item, "Bedrooms")
        .or_else(|| analytics.and_then(|a| a.num_bedrooms.as_deref()))
        .map(parse_count_text)
        .unwrap_or_default();

    let typology = analytics.and_then(|a| a.typology.clone());
    let title_typology = typology
        .as_deref()
        .or(item.title.as_deref())
        .unwrap_or("Immobile");
    let microzone = analytics
        .and_then(|a| a.microzone.clone())
        .unwrap_or_else(|| zone.name.clone());
    let title = format!("{title_typology} in {microzone}");

    let url = item
        .share_url
        .clone()
        .unwrap_or_else(|| Source::Immobiliare.listing_url(&source_id));

    Some(Listing {
        id: format!("{}-{}", Source::Immobiliare, source_id),
        source: Source::Immobiliare,
        title,
        description: None,
        price,
        price_formatted,
        previous_price: None,
        images: extract_images(item),
        location: ListingLocation {
            region: analytics
                .and_then(|a| a.region.clone())
                .unwrap_or_else(|| zone.region.clone()),
            province: analytics
                .and_then(|a| a.province.clone())
                .unwrap_or_default(),
            city: zone.city.clone(),
            zone: microzone,
            zone_id: zone.id.clone(),
            address: analytics.and_then(|a| a.macrozone.clone()),
        },
        features: ListingFeatures {
            area,
            rooms: rooms.value,
            rooms_raw: rooms.raw,
            bedrooms: bedrooms.value,
            bedrooms_raw: bedrooms.raw,
            bathrooms: bathrooms.value,
            bathrooms_raw: bathrooms.raw,
            floor: floor.value,
            floor_raw: floor.raw,
            elevator: analytics.and_then(|a| a.elevator),
            energy_class: item.energy_class.as_ref().and_then(|e| e.value.clone()),
            condition: analytics.and_then(|a| a.property_status.clone()),
            typology,
            ..ListingFeatures::default()
        },
        url,
        source_id,
        scraped_at,
    })
}

impl ApifyScraper {
    pub fn new() -> Result<Self> {
        let token = std::env::var("APIFY_TOKEN").context(
            "APIFY_TOKEN environment variable is required \
             (get a token at https://console.apify.com/account/integrations)",
        )?;
        // Synchronous actor runs take 30-60s, well past the usual request
        // timeout.
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, token })
    }

    async fn run_actor(&self, input: &ActorInput) -> Result<Vec<Value>> {
        let url = format!("{BASE_URL}/acts/{ACTOR_ID}/run-sync-get-dataset-items");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await
            .context("apify request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("apify run failed: {status}: {body}");
        }
        response.json().await.context("apify returned invalid JSON")
    }
}

#[async_trait]
impl SourceAdapter for ApifyScraper {
    async fn scrape(&self, zone: &Zone, options: &ScrapeOptions) -> Result<ScrapeResult> {
        let limit = options.limit.unwrap_or(DEFAULT_LIMIT);
        let scraped_at = Utc::now();
        let url = search_url(zone);

        info!("using apify actor {ACTOR_ID}");
        debug!("search URL: {url}");

        let input = ActorInput {
            start_urls: vec![StartUrl { url }],
            max_items: limit,
            max_pages: options.max_pages.unwrap_or(DEFAULT_MAX_PAGES),
        };

        let started = Instant::now();
        let items = self.run_actor(&input).await?;
        info!(
            "actor finished in {:.1}s, processing {} raw results",
            started.elapsed().as_secs_f64(),
            items.len()
        );

        let mut listings = Vec::new();
        let mut failed = 0;
        for item in &items {
            let parsed: RawItem = match serde_json::from_value(item.clone()) {
                Ok(parsed) => parsed,
                Err(_) => {
                    failed += 1;
                    continue;
                }
            };
            match normalize_listing(&parsed, zone, scraped_at) {
                Some(listing) => listings.push(listing),
                None => failed += 1,
            }
        }
        if failed > 0 {
            info!("normalized {} valid, {failed} failed", listings.len());
        }

        let unique = dedupe_listings(listings);
        let hit_limit = items.len() >= limit;

        Ok(ScrapeResult {
            listings: unique,
            metadata: ScrapeMetadata {
                requested_limit: limit,
                returned_count: items.len(),
                hit_limit,
                scraped_at,
            },
        })
    }

    fn source_name(&self) -> &'static str {
        "apify"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn axa() -> Zone {
        Zone {
            id: "axa".to_string(),
            name: "Axa".to_string(),
            slug: "axa".to_string(),
            region: "lazio".to_string(),
            city: "roma".to_string(),
            area: "litorale".to_string(),
            coordinates: None,
            immobiliare_z2: None,
            immobiliare_z3: None,
        }
    }

    fn raw_item(value: serde_json::Value) -> RawItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn normalizes_a_dataset_item() {
        let item = raw_item(json!({
            "id": 456,
            "title": "Trilocale via Eschilo",
            "shareUrl": "https://www.immobiliare.it/annunci/456/",
            "analytics": {
                "price": "€ 320.000",
                "region": "Lazio",
                "province": "RM",
                "microzone": "Axa",
                "macrozone": "Axa, Casal Palocco",
                "typology": "Trilocale",
                "elevator": true
            },
            "mainData": [{
                "rows": [
                    {"label": "Surface", "value": "95 m²"},
                    {"label": "Rooms", "value": "3"},
                    {"label": "Bathrooms", "value": "2"},
                    {"label": "Floor", "value": "T"}
                ]
            }],
            "energyClass": {"value": "B"},
            "media": {"images": [{"hd": "https://pwm.im-cdn.it/image/777/xl.jpg"}]}
        }));

        let listing = normalize_listing(&item, &axa(), Utc::now()).unwrap();
        assert_eq!(listing.source_id, "456");
        assert_eq!(listing.title, "Trilocale in Axa");
        assert_eq!(listing.price, 320_000);
        assert_eq!(listing.price_formatted, "€ 320.000");
        assert_eq!(listing.images, vec!["777"]);
        assert_eq!(listing.features.area, Some(95));
        assert_eq!(listing.features.rooms, Some(3));
        assert_eq!(listing.features.bathrooms, Some(2));
        assert_eq!(listing.features.floor, None);
        assert_eq!(listing.features.floor_raw.as_deref(), Some("T"));
        assert_eq!(listing.features.elevator, Some(true));
        assert_eq!(listing.features.energy_class.as_deref(), Some("B"));
    }

    #[test]
    fn skips_unpriced_items() {
        let item = raw_item(json!({
            "id": 456,
            "analytics": {"price": "Prezzo su richiesta"}
        }));
        assert!(normalize_listing(&item, &axa(), Utc::now()).is_none());

        let no_price = raw_item(json!({"id": 456}));
        assert!(normalize_listing(&no_price, &axa(), Utc::now()).is_none());
    }

    #[test]
    fn skips_items_without_an_id() {
        let item = raw_item(json!({"analytics": {"price": "€ 100.000"}}));
        assert!(normalize_listing(&item, &axa(), Utc::now()).is_none());
    }

    #[test]
    fn bedrooms_fall_back_to_analytics() {
        let item = raw_item(json!({
            "id": 1,
            "analytics": {"price": "€ 100.000", "numBedrooms": "2"}
        }));
        let listing = normalize_listing(&item, &axa(), Utc::now()).unwrap();
        assert_eq!(listing.features.bedrooms, Some(2));
    }
}
