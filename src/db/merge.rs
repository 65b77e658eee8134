//! Reconciles a freshly scraped batch against the listings already stored
//! for the same zone and source, preserving one step of price history.

use std::collections::HashMap;

use crate::models::Listing;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// A listing counts as changed when any tracked field differs: price, title,
/// the features record (structural equality), or the image list (order
/// matters).
pub fn listing_changed(existing: &Listing, updated: &Listing) -> bool {
    existing.price != updated.price
        || existing.title != updated.title
        || existing.features != updated.features
        || existing.images != updated.images
}

/// Merge a new batch against the stored listings, keyed by composite id.
///
/// New listings are kept as-is. Changed listings take the new data, with
/// `previous_price` set to the stored price on a price change, or carried
/// forward when the price is flat but something else moved. Unchanged
/// listings keep the stored copy verbatim. Stored listings absent from the
/// batch are dropped.
pub fn merge_listings(
    batch: Vec<Listing>,
    existing: &HashMap<String, Listing>,
) -> (Vec<Listing>, MergeStats) {
    let mut stats = MergeStats::default();
    let mut merged = Vec::with_capacity(batch.len());

    for listing in batch {
        match existing.get(&listing.key()) {
            None => {
                stats.added += 1;
                merged.push(listing);
            }
            Some(stored) if listing_changed(stored, &listing) => {
                let mut next = listing;
                if stored.price != next.price {
                    next.previous_price = Some(stored.price);
                } else if next.previous_price.is_none() {
                    next.previous_price = stored.previous_price;
                }
                stats.updated += 1;
                merged.push(next);
            }
            Some(stored) => {
                stats.unchanged += 1;
                merged.push(stored.clone());
            }
        }
    }

    (merged, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingFeatures, ListingLocation, Source};
    use chrono::Utc;

    fn listing(source_id: &str, price: i64) -> Listing {
        Listing {
            id: format!("immobiliare-{source_id}"),
            source: Source::Immobiliare,
            source_id: source_id.to_string(),
            title: format!("Immobile {source_id}"),
            description: None,
            price,
            price_formatted: crate::parsing::format_price_eur(price),
            previous_price: None,
            images: vec!["1".to_string()],
            location: ListingLocation {
                region: "lazio".to_string(),
                province: "Roma".to_string(),
                city: "roma".to_string(),
                zone: "Axa".to_string(),
                zone_id: "axa".to_string(),
                address: None,
            },
            features: ListingFeatures {
                area: Some(100),
                ..ListingFeatures::default()
            },
            url: Source::Immobiliare.listing_url(source_id),
            scraped_at: Utc::now(),
        }
    }

    fn keyed(listings: &[Listing]) -> HashMap<String, Listing> {
        listings.iter().map(|l| (l.key(), l.clone())).collect()
    }

    #[test]
    fn everything_is_added_against_empty_storage() {
        let (merged, stats) = merge_listings(vec![listing("1", 100), listing("2", 200)], &HashMap::new());
        assert_eq!(merged.len(), 2);
        assert_eq!(stats, MergeStats { added: 2, updated: 0, unchanged: 0 });
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![listing("1", 100), listing("2", 200)];
        let stored = keyed(&batch);
        let (merged, stats) = merge_listings(batch.clone(), &stored);
        assert_eq!(stats, MergeStats { added: 0, updated: 0, unchanged: 2 });
        assert_eq!(merged, batch);
    }

    #[test]
    fn price_change_records_previous_price() {
        let stored = keyed(&[listing("123", 300_000)]);
        let (merged, stats) = merge_listings(vec![listing("123", 320_000)], &stored);
        assert_eq!(stats, MergeStats { added: 0, updated: 1, unchanged: 0 });
        assert_eq!(merged[0].price, 320_000);
        assert_eq!(merged[0].previous_price, Some(300_000));
    }

    #[test]
    fn flat_price_with_other_changes_carries_history_forward() {
        let mut stored_listing = listing("123", 320_000);
        stored_listing.previous_price = Some(300_000);
        let stored = keyed(&[stored_listing]);

        let mut updated = listing("123", 320_000);
        updated.title = "Nuovo titolo".to_string();
        let (merged, stats) = merge_listings(vec![updated], &stored);
        assert_eq!(stats.updated, 1);
        assert_eq!(merged[0].previous_price, Some(300_000));
    }

    #[test]
    fn unchanged_merge_keeps_stored_previous_price() {
        // P1 -> P2, then P2 again: the second run must not touch history.
        let stored_map = keyed(&[listing("123", 300_000)]);
        let (first, _) = merge_listings(vec![listing("123", 320_000)], &stored_map);
        assert_eq!(first[0].previous_price, Some(300_000));

        let second_stored = keyed(&first);
        let (second, stats) = merge_listings(vec![listing("123", 320_000)], &second_stored);
        assert_eq!(stats, MergeStats { added: 0, updated: 0, unchanged: 1 });
        assert_eq!(second[0].previous_price, Some(300_000));
    }

    #[test]
    fn feature_change_alone_marks_updated() {
        let stored = keyed(&[listing("1", 100)]);
        let mut updated = listing("1", 100);
        updated.features.rooms = Some(4);
        let (_, stats) = merge_listings(vec![updated], &stored);
        assert_eq!(stats.updated, 1);
    }

    #[test]
    fn image_order_matters() {
        let stored = keyed(&[listing("1", 100)]);
        let mut updated = listing("1", 100);
        updated.images = vec!["2".to_string(), "1".to_string()];
        let (_, stats) = merge_listings(vec![updated], &stored);
        assert_eq!(stats.updated, 1);
    }

    #[test]
    fn listings_absent_from_the_batch_are_dropped() {
        let stored = keyed(&[listing("1", 100), listing("2", 200)]);
        let (merged, stats) = merge_listings(vec![listing("1", 100)], &stored);
        assert_eq!(merged.len(), 1);
        assert_eq!(stats.unchanged, 1);
    }
}
