//! Listing-page HTML scraper. No API key and no zone ids needed: fetches the
//! public search result pages for a zone and parses the listing cards.
//! Coarser data than the mobile API (no amenity tags, no floor), but a useful
//! fallback when neither of the other adapters is available.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::images::image_ref;
use crate::models::{Listing, ListingFeatures, ListingLocation, Source, Zone};
use crate::parsing::{format_price_eur, parse_count_text, parse_number_text, parse_price};
use crate::scrapers::traits::SourceAdapter;
use crate::scrapers::types::{ScrapeMetadata, ScrapeOptions, ScrapeResult};
use crate::scrapers::{dedupe_listings, default_client};

const RESULTS_PER_PAGE: usize = 25;
const DEFAULT_LIMIT: usize = 1000;
const DEFAULT_MAX_PAGES: usize = 4;

pub struct HtmlScraper {
    client: Client,
}

fn search_url(zone: &Zone) -> String {
    // Sort by newest first so we always get the most recent listings
    format!(
        "https://www.immobiliare.it/vendita-case/{}/{}/?criterio=dataModifica&ordine=desc",
        zone.city, zone.slug
    )
}

/// Parse one search-result page into listings plus the total result count
/// advertised in the page header.
fn parse_page(html: &str, zone: &Zone, scraped_at: DateTime<Utc>) -> (Vec<Listing>, usize) {
    let document = Html::parse_document(html);
    let card_selector = Selector::parse(".in-realEstateResults__item").unwrap();
    let title_selector = Selector::parse("a.in-card__title").unwrap();
    let price_selector = Selector::parse(".in-feat__item--main").unwrap();
    let image_selector = Selector::parse("img[src]").unwrap();
    let location_selector = Selector::parse(".in-card__location, .in-card__address").unwrap();
    let feat_selector = Selector::parse(".in-feat__item").unwrap();
    let total_selector = Selector::parse(".in-searchList__title").unwrap();

    let total_results = document
        .select(&total_selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .and_then(|text| parse_number_text(&text))
        .unwrap_or(0) as usize;

    let mut listings = Vec::new();
    for card in document.select(&card_selector) {
        let Some(link) = card.select(&title_selector).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or("");
        let Some(source_id) = parse_number_text(href).map(|id| id.to_string()) else {
            continue;
        };

        let (price, price_formatted) = match card.select(&price_selector).next() {
            Some(el) => parse_price(el.text().collect::<String>().trim()),
            None => (0, format_price_eur(0)),
        };

        let images: Vec<String> = card
            .select(&image_selector)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.contains("placeholder") && !src.contains("data:image"))
            .map(image_ref)
            .collect();

        let address = card
            .select(&location_selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        let mut area = None;
        let mut rooms = crate::parsing::Parsed::default();
        for feat in card.select(&feat_selector) {
            let text = feat.text().collect::<String>();
            if text.contains("m²") && area.is_none() {
                area = parse_number_text(&text);
            }
            if text.to_lowercase().contains("local") && rooms.value.is_none() {
                rooms = parse_count_text(text.trim());
            }
        }

        let title = link
            .value()
            .attr("title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Immobile in {}", zone.name));

        let url = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("https://www.immobiliare.it{href}")
        };

        listings.push(Listing {
            id: format!("{}-{}", Source::Immobiliare, source_id),
            source: Source::Immobiliare,
            title,
            description: None,
            price,
            price_formatted,
            previous_price: None,
            images,
            location: ListingLocation {
                region: zone.region.clone(),
                province: String::new(),
                city: zone.city.clone(),
                zone: zone.name.clone(),
                zone_id: zone.id.clone(),
                address,
            },
            features: ListingFeatures {
                area,
                rooms: rooms.value,
                rooms_raw: rooms.raw,
                ..ListingFeatures::default()
            },
            url,
            source_id,
            scraped_at,
        });
    }

    (listings, total_results)
}

impl HtmlScraper {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: default_client()?,
        })
    }

    async fn fetch_page(&self, base_url: &str, page: usize) -> Result<String> {
        let url = if page <= 1 {
            base_url.to_string()
        } else {
            format!("{base_url}&pag={page}")
        };
        debug!("fetching {url}");
        let response = self
            .client
            .get(&url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7")
            .send()
            .await
            .context("search page request failed")?;
        if !response.status().is_success() {
            bail!("search page fetch failed: {}", response.status());
        }
        response.text().await.context("failed to read response body")
    }
}

#[async_trait]
impl SourceAdapter for HtmlScraper {
    async fn scrape(&self, zone: &Zone, options: &ScrapeOptions) -> Result<ScrapeResult> {
        let limit = options.limit.unwrap_or(DEFAULT_LIMIT);
        let max_pages = options.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let scraped_at = Utc::now();
        let base_url = search_url(zone);

        let first = self.fetch_page(&base_url, 1).await?;
        let (mut all, total_results) = parse_page(&first, zone, scraped_at);
        let total_pages = total_results.div_ceil(RESULTS_PER_PAGE).max(1);
        let pages = total_pages.min(max_pages);
        info!("{total_results} results over {total_pages} pages, fetching {pages}");

        for page in 2..=pages {
            if all.len() >= limit {
                break;
            }
            tokio::time::sleep(options.page_delay).await;
            match self.fetch_page(&base_url, page).await {
                Ok(html) => {
                    let (listings, _) = parse_page(&html, zone, scraped_at);
                    if listings.is_empty() {
                        break;
                    }
                    all.extend(listings);
                }
                Err(err) => {
                    warn!("page {page} fetch failed: {err:#}");
                    break;
                }
            }
        }

        let returned_count = all.len();
        all.truncate(limit);
        let unique = dedupe_listings(all);

        Ok(ScrapeResult {
            listings: unique,
            metadata: ScrapeMetadata {
                requested_limit: limit,
                returned_count,
                hit_limit: total_pages > pages || returned_count > limit,
                scraped_at,
            },
        })
    }

    fn source_name(&self) -> &'static str {
        "html"
    }
}
