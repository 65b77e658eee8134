//! File-based listing store.
//!
//! Data lives in a hierarchical layout keyed by the zone hierarchy:
//!
//! ```text
//! data/
//! ├── zones.json                           # Zone definitions
//! └── listings/                            # Listing data
//!     └── {region}/                        # e.g., lazio
//!         └── {city}/                      # e.g., roma
//!             └── {area}/                  # e.g., litorale
//!                 └── {slug}/              # e.g., axa
//!                     └── immobiliare.json # Source-specific listings
//! ```
//!
//! Snapshots are stored in a compact format that drops everything
//! reconstructible from the owning zone; reads hydrate them back to full
//! listings transparently.

mod merge;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{
    CompactListing, CompactSnapshot, Listing, ListingLocation, Snapshot, Source, Zone, ZoneFilter,
    ZonesFile,
};
use crate::parsing::format_price_eur;

pub use merge::{listing_changed, merge_listings, MergeStats};

#[derive(Debug, Error)]
pub enum DbError {
    /// Writing data for an untracked zone would be unrecoverable, so this is
    /// a hard stop rather than a skip.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Count projection: answering "how many listings" only needs the source id
/// and the price, not the full records.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CountSnapshot {
    listings: Vec<CountListing>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CountListing {
    source_id: Option<String>,
    price: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountOptions {
    pub playable_only: bool,
    pub source: Option<Source>,
}

pub struct LocalDb {
    listings_dir: PathBuf,
    zones_file: PathBuf,
    zones_cache: RwLock<Option<Arc<Vec<Zone>>>>,
}

fn is_compact_snapshot(value: &Value) -> bool {
    value
        .get("listings")
        .and_then(|listings| listings.get(0))
        .map(|first| {
            first.get("sourceId").is_some()
                && first.get("id").is_none()
                && first.get("url").is_none()
        })
        .unwrap_or(false)
}

fn compact_listing(listing: &Listing) -> CompactListing {
    CompactListing {
        source_id: listing.source_id.clone(),
        title: listing.title.clone(),
        price: listing.price,
        previous_price: listing.previous_price,
        images: listing.images.clone(),
        features: listing.features.clone(),
    }
}

fn compact_snapshot(snapshot: &Snapshot) -> CompactSnapshot {
    CompactSnapshot {
        zone_id: snapshot.zone_id.clone(),
        scraped_at: snapshot.scraped_at,
        source: snapshot.source,
        listing_count: snapshot.listing_count,
        listings: snapshot.listings.iter().map(compact_listing).collect(),
        metadata: snapshot.metadata.clone(),
    }
}

fn hydrate_listing(
    compact: CompactListing,
    source: Source,
    zone: &Zone,
    scraped_at: chrono::DateTime<chrono::Utc>,
) -> Listing {
    let CompactListing {
        source_id,
        title,
        price,
        previous_price,
        images,
        features,
    } = compact;
    Listing {
        id: format!("{source}-{source_id}"),
        url: source.listing_url(&source_id),
        source,
        title,
        description: None,
        price,
        price_formatted: format_price_eur(price),
        previous_price,
        images,
        location: ListingLocation {
            region: zone.region.clone(),
            province: if zone.city == "roma" {
                "Roma".to_string()
            } else {
                zone.city.clone()
            },
            city: zone.city.clone(),
            zone: zone.name.clone(),
            zone_id: zone.id.clone(),
            address: None,
        },
        features,
        source_id,
        scraped_at,
    }
}

fn hydrate_snapshot(compact: CompactSnapshot, zone: &Zone) -> Snapshot {
    let scraped_at = compact.scraped_at;
    let source = compact.source;
    Snapshot {
        zone_id: compact.zone_id,
        scraped_at,
        source,
        listing_count: compact.listing_count,
        listings: compact
            .listings
            .into_iter()
            .map(|listing| hydrate_listing(listing, source, zone, scraped_at))
            .collect(),
        metadata: compact.metadata,
    }
}

impl LocalDb {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            listings_dir: data_dir.join("listings"),
            zones_file: data_dir.join("zones.json"),
            zones_cache: RwLock::new(None),
        }
    }

    async fn load_zones(&self) -> Result<Arc<Vec<Zone>>, DbError> {
        if let Some(zones) = self.zones_cache.read().await.as_ref() {
            return Ok(Arc::clone(zones));
        }

        let mut guard = self.zones_cache.write().await;
        if let Some(zones) = guard.as_ref() {
            return Ok(Arc::clone(zones));
        }

        let zones = match fs::read_to_string(&self.zones_file).await {
            Ok(content) => {
                let value: Value = serde_json::from_str(&content)?;
                // Tolerate both the versioned catalog shape and a bare array.
                if value.is_array() {
                    serde_json::from_value::<Vec<Zone>>(value)?
                } else {
                    serde_json::from_value::<ZonesFile>(value)?.zones
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let zones = Arc::new(zones);
        *guard = Some(Arc::clone(&zones));
        Ok(zones)
    }

    pub async fn get_zone(&self, zone_id: &str) -> Result<Option<Zone>, DbError> {
        let zones = self.load_zones().await?;
        Ok(zones.iter().find(|z| z.id == zone_id).cloned())
    }

    pub async fn get_zones(&self, filter: Option<&ZoneFilter>) -> Result<Vec<Zone>, DbError> {
        let zones = self.load_zones().await?;
        let Some(filter) = filter else {
            return Ok(zones.to_vec());
        };
        Ok(zones
            .iter()
            .filter(|z| {
                filter.area.as_ref().map_or(true, |area| &z.area == area)
                    && filter.region.as_ref().map_or(true, |region| &z.region == region)
                    && filter.city.as_ref().map_or(true, |city| &z.city == city)
            })
            .cloned()
            .collect())
    }

    /// The catalog is externally maintained; writes degrade to a warning so
    /// zone identity never changes mid-run.
    pub fn save_zones(&self, _zones: &[Zone]) {
        warn!("zone catalog is read-only - edit data/zones.json directly");
    }

    /// Path: listings/{region}/{city}/{area}/{slug}/{source}.json
    fn listing_path(&self, zone: &Zone, source: Source) -> PathBuf {
        self.listings_dir
            .join(&zone.region)
            .join(&zone.city)
            .join(&zone.area)
            .join(&zone.slug)
            .join(format!("{source}.json"))
    }

    /// Persist a snapshot in compact form, fully replacing the stored file
    /// for its (zone, source) pair.
    pub async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DbError> {
        let zone = self
            .get_zone(&snapshot.zone_id)
            .await?
            .ok_or_else(|| DbError::ZoneNotFound(snapshot.zone_id.clone()))?;

        let compact = compact_snapshot(snapshot);
        let path = self.listing_path(&zone, snapshot.source);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_string_pretty(&compact)?).await?;
        debug!("wrote {} listings to {}", compact.listing_count, path.display());
        Ok(())
    }

    /// Merge the snapshot against stored listings from the same source, then
    /// write the merged set. The write always happens, even when nothing
    /// changed, so the stored timestamp and metadata reflect the latest run.
    pub async fn save_snapshot_deduped(&self, snapshot: &Snapshot) -> Result<MergeStats, DbError> {
        let existing = self
            .get_existing_listings(&snapshot.zone_id, Some(snapshot.source))
            .await?;
        let (merged, stats) = merge_listings(snapshot.listings.clone(), &existing);

        let merged_snapshot = Snapshot {
            listing_count: merged.len(),
            listings: merged,
            ..snapshot.clone()
        };
        self.save_snapshot(&merged_snapshot).await?;
        Ok(stats)
    }

    async fn read_snapshot(&self, zone: &Zone, source: Source) -> Option<Snapshot> {
        let path = self.listing_path(zone, source);
        let content = fs::read_to_string(&path).await.ok()?;
        // Invalid files are treated as "no snapshot": one corrupt source must
        // not block the others.
        let value: Value = serde_json::from_str(&content).ok()?;
        if is_compact_snapshot(&value) {
            let compact: CompactSnapshot = serde_json::from_value(value).ok()?;
            Some(hydrate_snapshot(compact, zone))
        } else {
            serde_json::from_value(value).ok()
        }
    }

    /// Stored snapshots for a zone across all sources, most recent first.
    pub async fn get_snapshots(&self, zone_id: &str) -> Result<Vec<Snapshot>, DbError> {
        let Some(zone) = self.get_zone(zone_id).await? else {
            return Ok(Vec::new());
        };

        let mut snapshots = Vec::new();
        for source in Source::ALL {
            if let Some(snapshot) = self.read_snapshot(&zone, source).await {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| b.scraped_at.cmp(&a.scraped_at));
        Ok(snapshots)
    }

    pub async fn get_latest_snapshot(
        &self,
        zone_id: &str,
        source: Option<Source>,
    ) -> Result<Option<Snapshot>, DbError> {
        let snapshots = self.get_snapshots(zone_id).await?;
        Ok(snapshots
            .into_iter()
            .find(|s| source.map_or(true, |wanted| s.source == wanted)))
    }

    /// Union of listings across sources, de-duplicated by composite key.
    /// With `playable_only`, listings without a disclosed price are dropped:
    /// the game needs a guessable number.
    pub async fn get_listings(
        &self,
        zone_id: &str,
        playable_only: bool,
    ) -> Result<Vec<Listing>, DbError> {
        let snapshots = self.get_snapshots(zone_id).await?;

        // Keep only the most recent snapshot per source.
        let mut taken: HashSet<Source> = HashSet::new();
        let mut listings = Vec::new();
        for snapshot in snapshots {
            if taken.insert(snapshot.source) {
                listings.extend(snapshot.listings);
            }
        }

        let mut seen = HashSet::new();
        Ok(listings
            .into_iter()
            .filter(|listing| {
                if !seen.insert(listing.key()) {
                    return false;
                }
                !(playable_only && listing.price == 0)
            })
            .collect())
    }

    /// Listing count without hydrating full records.
    pub async fn get_listing_count(
        &self,
        zone_id: &str,
        options: CountOptions,
    ) -> Result<usize, DbError> {
        let Some(zone) = self.get_zone(zone_id).await? else {
            return Ok(0);
        };

        let sources: Vec<Source> = match options.source {
            Some(source) => vec![source],
            None => Source::ALL.to_vec(),
        };

        let mut seen = HashSet::new();
        for source in sources {
            let path = self.listing_path(&zone, source);
            let Ok(content) = fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(parsed) = serde_json::from_str::<CountSnapshot>(&content) else {
                continue;
            };
            for listing in parsed.listings {
                let Some(source_id) = listing.source_id else {
                    continue;
                };
                if options.playable_only && listing.price.unwrap_or(0) == 0 {
                    continue;
                }
                seen.insert(format!("{source}-{source_id}"));
            }
        }
        Ok(seen.len())
    }

    /// Uniform random playable listing, or `None` when the zone has none.
    pub async fn get_random_listing(&self, zone_id: &str) -> Result<Option<Listing>, DbError> {
        let mut listings = self.get_listings(zone_id, true).await?;
        if listings.is_empty() {
            return Ok(None);
        }
        let idx = rand::thread_rng().gen_range(0..listings.len());
        Ok(Some(listings.swap_remove(idx)))
    }

    /// Up to `count` distinct random playable listings (full shuffle, so no
    /// repeats).
    pub async fn get_random_listings(
        &self,
        zone_id: &str,
        count: usize,
    ) -> Result<Vec<Listing>, DbError> {
        let mut listings = self.get_listings(zone_id, true).await?;
        listings.shuffle(&mut rand::thread_rng());
        listings.truncate(count);
        Ok(listings)
    }

    /// Stored listings for a zone keyed by composite id, optionally scoped to
    /// one source. Scoping keeps a merge for one source from touching the
    /// others' listings.
    pub async fn get_existing_listings(
        &self,
        zone_id: &str,
        source: Option<Source>,
    ) -> Result<HashMap<String, Listing>, DbError> {
        let mut map = HashMap::new();
        for snapshot in self.get_snapshots(zone_id).await? {
            if source.is_some_and(|wanted| wanted != snapshot.source) {
                continue;
            }
            for listing in snapshot.listings {
                map.entry(listing.key()).or_insert(listing);
            }
        }
        Ok(map)
    }
}

impl std::fmt::Debug for LocalDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDb")
            .field("listings_dir", &self.listings_dir)
            .field("zones_file", &self.zones_file)
            .finish()
    }
}
