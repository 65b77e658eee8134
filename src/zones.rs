//! Zone catalog registry.
//!
//! `data/zones.json` is the externally maintained source of truth for the
//! zone hierarchy. It is read once per process and cached; the cache is
//! immutable after load. `reset` exists for test isolation only.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use crate::models::{Zone, ZonesFile};

static CACHE: Mutex<Option<Arc<Vec<Zone>>>> = Mutex::new(None);

fn load(data_dir: &Path) -> Result<Arc<Vec<Zone>>> {
    let mut cache = CACHE.lock().expect("zone cache lock poisoned");
    if let Some(zones) = cache.as_ref() {
        return Ok(Arc::clone(zones));
    }

    let path = data_dir.join("zones.json");
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read zone catalog at {}", path.display()))?;
    let parsed: ZonesFile = serde_json::from_str(&content)
        .with_context(|| format!("invalid zone catalog at {}", path.display()))?;

    let zones = Arc::new(parsed.zones);
    *cache = Some(Arc::clone(&zones));
    Ok(zones)
}

/// Drop the cached catalog so the next access reloads from disk.
pub fn reset() {
    *CACHE.lock().expect("zone cache lock poisoned") = None;
}

pub fn all_zones(data_dir: &Path) -> Result<Arc<Vec<Zone>>> {
    load(data_dir)
}

pub fn zone_by_id(data_dir: &Path, zone_id: &str) -> Result<Option<Zone>> {
    let zones = load(data_dir)?;
    Ok(zones.iter().find(|z| z.id == zone_id).cloned())
}

pub fn zones_by_slug(data_dir: &Path, slugs: &[String]) -> Result<Vec<Zone>> {
    let zones = load(data_dir)?;
    Ok(zones
        .iter()
        .filter(|z| slugs.iter().any(|s| s == &z.slug))
        .cloned()
        .collect())
}

pub fn zone_by_slug(data_dir: &Path, slug: &str) -> Result<Option<Zone>> {
    let zones = load(data_dir)?;
    Ok(zones.iter().find(|z| z.slug == slug).cloned())
}

pub fn zones_by_area(data_dir: &Path, area: &str) -> Result<Vec<Zone>> {
    let zones = load(data_dir)?;
    Ok(zones.iter().filter(|z| z.area == area).cloned().collect())
}

/// Distinct areas in catalog order.
pub fn areas(data_dir: &Path) -> Result<Vec<String>> {
    let zones = load(data_dir)?;
    let mut seen = Vec::new();
    for zone in zones.iter() {
        if !seen.contains(&zone.area) {
            seen.push(zone.area.clone());
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_catalog(dir: &Path) {
        fs::write(
            dir.join("zones.json"),
            r#"{
              "version": 1,
              "updatedAt": "2026-05-11",
              "zones": [
                {"id": "axa", "name": "Axa", "slug": "axa", "region": "lazio", "city": "roma", "area": "litorale", "immobiliareZ3": 12721},
                {"id": "infernetto", "name": "Infernetto", "slug": "infernetto", "region": "lazio", "city": "roma", "area": "litorale", "immobiliareZ2": 10261},
                {"id": "trastevere", "name": "Trastevere", "slug": "trastevere", "region": "lazio", "city": "roma", "area": "centro"}
              ]
            }"#,
        )
        .unwrap();
    }

    // Single test covering the registry: the cache is process-global, so
    // parallel tests over different catalogs would trample each other.
    #[test]
    fn registry_loads_filters_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        write_catalog(dir.path());
        reset();

        let all = all_zones(dir.path()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].immobiliare_z3, Some(12721));

        let litorale = zones_by_area(dir.path(), "litorale").unwrap();
        assert_eq!(litorale.len(), 2);

        let picked =
            zones_by_slug(dir.path(), &["trastevere".to_string(), "axa".to_string()]).unwrap();
        assert_eq!(picked.len(), 2);

        assert_eq!(
            zone_by_slug(dir.path(), "infernetto").unwrap().unwrap().name,
            "Infernetto"
        );
        assert!(zone_by_slug(dir.path(), "nope").unwrap().is_none());
        assert_eq!(zone_by_id(dir.path(), "axa").unwrap().unwrap().slug, "axa");

        assert_eq!(areas(dir.path()).unwrap(), vec!["litorale", "centro"]);

        // After reset a different catalog is picked up.
        let other = tempfile::tempdir().unwrap();
        fs::write(
            other.path().join("zones.json"),
            r#"{"version": 1, "updatedAt": "2026-05-11", "zones": []}"#,
        )
        .unwrap();
        reset();
        assert!(all_zones(other.path()).unwrap().is_empty());
        reset();
    }
}
