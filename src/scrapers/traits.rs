use anyhow::Result;
use async_trait::async_trait;

use crate::models::Zone;
use crate::scrapers::types::{ScrapeOptions, ScrapeResult};

/// Common contract for all listing sources.
/// Implementations may call a mobile API, a paid scraping service, or parse
/// listing pages directly; the pipeline only depends on this interface.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Produce normalized, intra-batch-deduplicated listings for a zone.
    async fn scrape(&self, zone: &Zone, options: &ScrapeOptions) -> Result<ScrapeResult>;

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
