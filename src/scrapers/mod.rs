pub mod apify;
pub mod html;
pub mod mobile;
pub mod traits;
pub mod types;

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use crate::models::Listing;

pub use apify::ApifyScraper;
pub use html::HtmlScraper;
pub use mobile::MobileApiScraper;
pub use traits::SourceAdapter;
pub use types::{ScrapeMetadata, ScrapeOptions, ScrapeResult};

pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared HTTP client: request timeout plus a browser user agent.
pub fn default_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")
}

/// Drop repeated (source, sourceId) pairs from one scrape pass, keeping the
/// first occurrence in input order. Sources can return the same listing on
/// overlapping pages.
pub fn dedupe_listings(listings: Vec<Listing>) -> Vec<Listing> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .filter(|listing| seen.insert(listing.key()))
        .collect()
}
