use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::Listing;

/// Tuning knobs for a scrape run over one zone.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Maximum listings to fetch for the zone; each adapter applies its own
    /// default when unset.
    pub limit: Option<usize>,
    /// Maximum result pages to walk (page-oriented adapters only).
    pub max_pages: Option<usize>,
    /// Pause between successive page fetches, as a courtesy to the source.
    pub page_delay: Duration,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            limit: None,
            max_pages: None,
            page_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeMetadata {
    pub requested_limit: usize,
    pub returned_count: usize,
    pub hit_limit: bool,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub listings: Vec<Listing>,
    pub metadata: ScrapeMetadata,
}
