//! Zone probe: asks the listings endpoint for the active count of every
//! cataloged zone. Useful for spotting zones with missing or stale search
//! ids before running a full collection.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::Level;

use prezzo_giusto::scrapers::{self, mobile};
use prezzo_giusto::zones;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::WARN).init();

    let data_dir =
        PathBuf::from(env::var("PREZZO_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    let zones = zones::all_zones(&data_dir)?;
    let client = scrapers::default_client()?;

    println!("🔍 Probing {} zones...\n", zones.len());
    println!("{:<24} {:<6} {:>8}", "zone", "param", "count");
    println!("{:-<24} {:-<6} {:->8}", "", "", "");

    let mut no_ids = Vec::new();
    let mut total = 0usize;
    for zone in zones.iter() {
        let param = if zone.immobiliare_z3.is_some() {
            "z3"
        } else if zone.immobiliare_z2.is_some() {
            "z2"
        } else {
            no_ids.push(zone.slug.clone());
            "-"
        };
        match mobile::fetch_zone_count(&client, zone).await {
            Some(count) => {
                total += count;
                println!("{:<24} {:<6} {:>8}", zone.slug, param, count);
            }
            None => println!("{:<24} {:<6} {:>8}", zone.slug, param, "?"),
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    println!("\n📊 {total} active listings across the catalog");
    if !no_ids.is_empty() {
        println!(
            "⚠️  zones without search ids (will use the URL resolver): {}",
            no_ids.join(", ")
        );
    }
    Ok(())
}
