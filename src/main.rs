//! Data-collection job: scrapes the selected zones, merges the results
//! against stored listings, and reports what changed. One zone failing never
//! aborts the run.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn, Level};

use prezzo_giusto::db::{LocalDb, MergeStats};
use prezzo_giusto::models::{Snapshot, SnapshotMetadata, Source, Zone};
use prezzo_giusto::scrapers::{
    self, mobile, ApifyScraper, HtmlScraper, MobileApiScraper, ScrapeOptions, SourceAdapter,
};
use prezzo_giusto::zones;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScraperKind {
    Mobile,
    Apify,
    Html,
}

impl ScraperKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "mobile" => Some(Self::Mobile),
            "apify" => Some(Self::Apify),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Apify => "apify",
            Self::Html => "html",
        }
    }
}

struct CollectOptions {
    zones: Vec<String>,
    area: Option<String>,
    all: bool,
    scraper: ScraperKind,
    limit: Option<usize>,
    max_pages: Option<usize>,
    page_delay_ms: Option<u64>,
    zone_delay_s: u64,
    dry_run: bool,
}

fn parse_args(args: &[String]) -> Result<CollectOptions> {
    let mut options = CollectOptions {
        zones: Vec::new(),
        area: None,
        all: false,
        scraper: ScraperKind::Mobile,
        limit: None,
        max_pages: None,
        page_delay_ms: None,
        zone_delay_s: 0,
        dry_run: false,
    };

    for arg in args {
        if let Some(value) = arg.strip_prefix("--zones=") {
            options.zones = value.split(',').map(str::to_string).collect();
        } else if let Some(value) = arg.strip_prefix("--area=") {
            options.area = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--limit=") {
            options.limit = Some(value.parse().context("invalid --limit")?);
        } else if let Some(value) = arg.strip_prefix("--max-pages=") {
            options.max_pages = Some(value.parse().context("invalid --max-pages")?);
        } else if let Some(value) = arg.strip_prefix("--scraper=") {
            options.scraper = ScraperKind::parse(value)
                .with_context(|| format!("unknown scraper: {value} (use mobile, apify or html)"))?;
        } else if let Some(value) = arg.strip_prefix("--sleep-between-listings-ms=") {
            options.page_delay_ms =
                Some(value.parse().context("invalid --sleep-between-listings-ms")?);
        } else if let Some(value) = arg.strip_prefix("--sleep-between-zones-s=") {
            options.zone_delay_s = value.parse().context("invalid --sleep-between-zones-s")?;
        } else if arg == "--dry-run" {
            options.dry_run = true;
        } else if arg == "--all" {
            options.all = true;
        } else {
            bail!("unknown flag: {arg}");
        }
    }

    Ok(options)
}

fn print_usage(data_dir: &Path) {
    println!("\n🏠 Il Prezzo Giusto - Data Collection\n");
    println!("Usage: collect [options]\n");
    println!("Options:");
    println!("  --zones=axa,trastevere          Comma-separated zone slugs");
    println!("  --area=litorale                 Scrape all zones in an area");
    println!("  --all                           Collect all zones");
    println!("  --limit=500                     Max listings per zone");
    println!("  --max-pages=10                  Max result pages (apify/html)");
    println!("  --scraper=mobile|apify|html     Scraper to use (default: mobile)");
    println!("  --sleep-between-listings-ms=50  Milliseconds between page fetches");
    println!("  --sleep-between-zones-s=2       Seconds between zones");
    println!("  --dry-run                       Don't actually scrape");
    println!("\nScrapers:");
    println!("  mobile   Free, fast, uses the immobiliare.it mobile API");
    println!("  apify    Paid, requires APIFY_TOKEN");
    println!("  html     Parses public search pages, no credentials needed");
    println!("\nEnvironment:");
    println!("  APIFY_TOKEN       API token for the apify scraper");
    println!("  PREZZO_DATA_DIR   Data directory (default: ./data)");

    match zones::all_zones(data_dir) {
        Ok(all) => {
            let areas = zones::areas(data_dir).unwrap_or_default();
            println!("\nAreas ({}):", areas.len());
            for area in &areas {
                let count = all.iter().filter(|z| &z.area == area).count();
                println!("  - {area} ({count} zones)");
            }
            println!("\nZones ({}):", all.len());
            for zone in all.iter() {
                println!("  - {} ({}) [{}]", zone.slug, zone.name, zone.area);
            }
        }
        Err(err) => println!("\nZone catalog unavailable: {err:#}"),
    }
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let mins = seconds / 60;
    let secs = seconds % 60;
    if mins < 60 {
        return format!("{mins}m {secs}s");
    }
    format!("{}h {}m", mins / 60, mins % 60)
}

async fn collect_zone(
    db: &LocalDb,
    adapter: &dyn SourceAdapter,
    zone: &Zone,
    options: &ScrapeOptions,
    dry_run: bool,
) -> Result<Option<MergeStats>> {
    info!("📍 {} ({})", zone.name, zone.slug);

    if dry_run {
        info!("[dry run] would scrape {} with the {} scraper", zone.name, adapter.source_name());
        return Ok(None);
    }

    let result = adapter.scrape(zone, options).await?;
    info!("found {} unique listings", result.listings.len());
    if result.listings.is_empty() {
        warn!("no listings found");
        return Ok(None);
    }

    let snapshot = Snapshot {
        zone_id: zone.id.clone(),
        scraped_at: result.metadata.scraped_at,
        source: Source::Immobiliare,
        listing_count: result.listings.len(),
        listings: result.listings,
        metadata: Some(SnapshotMetadata {
            requested_limit: Some(result.metadata.requested_limit),
            returned_count: Some(result.metadata.returned_count),
            hit_limit: Some(result.metadata.hit_limit),
        }),
    };

    let stats = db.save_snapshot_deduped(&snapshot).await?;
    if stats.added > 0 || stats.updated > 0 {
        info!(
            "✅ added {} new, updated {} changed ({} unchanged)",
            stats.added, stats.updated, stats.unchanged
        );
    } else {
        info!("all {} listings unchanged", stats.unchanged);
    }
    Ok(Some(stats))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_args(&args)?;
    let data_dir =
        PathBuf::from(env::var("PREZZO_DATA_DIR").unwrap_or_else(|_| "data".to_string()));

    let selected: Vec<Zone> = if options.all {
        zones::all_zones(&data_dir)?.to_vec()
    } else if let Some(area) = &options.area {
        let area_zones = zones::zones_by_area(&data_dir, area)?;
        if area_zones.is_empty() {
            error!("unknown area: {area}");
            info!("available areas: {}", zones::areas(&data_dir)?.join(", "));
            return Ok(());
        }
        area_zones
    } else if !options.zones.is_empty() {
        zones::zones_by_slug(&data_dir, &options.zones)?
    } else {
        print_usage(&data_dir);
        return Ok(());
    };

    if selected.is_empty() {
        error!("no valid zones found");
        return Ok(());
    }

    info!("🏠 Il Prezzo Giusto - Data Collection");
    info!("Scraper: {}", options.scraper.as_str());
    info!(
        "Zones: {} ({})",
        selected.len(),
        selected.iter().map(|z| z.slug.as_str()).collect::<Vec<_>>().join(", ")
    );
    if let Some(limit) = options.limit {
        info!("Limit: {limit} per zone");
    }
    if options.dry_run {
        info!("Mode: DRY RUN");
    }

    // Cheap per-zone counts to estimate run time before committing to it.
    let page_delay_ms = options.page_delay_ms.unwrap_or(50);
    if !options.dry_run {
        info!("📊 Fetching listing counts...");
        let client = scrapers::default_client()?;
        let mut total_listings = 0usize;
        let mut unknown_zones = 0usize;
        for zone in &selected {
            match mobile::fetch_zone_count(&client, zone).await {
                Some(count) => total_listings += count,
                None => unknown_zones += 1,
            }
        }
        let total_pages = total_listings.div_ceil(mobile::PAGE_SIZE);
        let api_secs = (total_pages as u64 * page_delay_ms).div_ceil(1000);
        let sleep_secs = options.zone_delay_s * selected.len().saturating_sub(1) as u64;
        info!(
            "📈 Estimate: ~{total_listings} listings{} over ~{total_pages} pages, ~{}",
            if unknown_zones > 0 {
                format!(" ({unknown_zones} zones with unknown counts)")
            } else {
                String::new()
            },
            format_duration(api_secs + sleep_secs)
        );
    }

    let scrape_options = ScrapeOptions {
        limit: options.limit,
        max_pages: options.max_pages,
        page_delay: Duration::from_millis(page_delay_ms),
    };
    let adapter: Box<dyn SourceAdapter> = match options.scraper {
        ScraperKind::Mobile => Box::new(MobileApiScraper::new()?),
        ScraperKind::Apify => Box::new(ApifyScraper::new()?),
        ScraperKind::Html => Box::new(HtmlScraper::new()?),
    };
    let db = LocalDb::new(&data_dir);

    let mut totals = MergeStats::default();
    let mut failed_zones = 0usize;
    for (i, zone) in selected.iter().enumerate() {
        match collect_zone(&db, adapter.as_ref(), zone, &scrape_options, options.dry_run).await {
            Ok(Some(stats)) => {
                totals.added += stats.added;
                totals.updated += stats.updated;
                totals.unchanged += stats.unchanged;
            }
            Ok(None) => {}
            Err(err) => {
                error!("❌ {}: {err:#}", zone.slug);
                failed_zones += 1;
            }
        }
        if options.zone_delay_s > 0 && i + 1 < selected.len() {
            info!("💤 sleeping {}s...", options.zone_delay_s);
            tokio::time::sleep(Duration::from_secs(options.zone_delay_s)).await;
        }
    }

    info!(
        "✨ Done: {} added, {} updated, {} unchanged{}",
        totals.added,
        totals.updated,
        totals.unchanged,
        if failed_zones > 0 {
            format!(", {failed_zones} zones failed")
        } else {
            String::new()
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_collection_flags() {
        let options = parse_args(&args(&[
            "--zones=axa,trastevere",
            "--limit=500",
            "--scraper=html",
            "--sleep-between-zones-s=2",
            "--dry-run",
        ]))
        .unwrap();
        assert_eq!(options.zones, vec!["axa", "trastevere"]);
        assert_eq!(options.limit, Some(500));
        assert_eq!(options.scraper, ScraperKind::Html);
        assert_eq!(options.zone_delay_s, 2);
        assert!(options.dry_run);
    }

    #[test]
    fn rejects_unknown_flags_and_scrapers() {
        assert!(parse_args(&args(&["--nope"])).is_err());
        assert!(parse_args(&args(&["--scraper=selenium"])).is_err());
        assert!(parse_args(&args(&["--limit=many"])).is_err());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3700), "1h 1m");
    }
}
