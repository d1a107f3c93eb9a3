// Enricher - per-row derived fields over the cleaned core rows

use crate::model::{AgeBucket, CleanedRecord, Dimensions, EnrichedRecord};
use log::info;

/// Augment every core row with AOV, store age, lifecycle bucket and
/// per-capita revenue. Ratio fields guard their denominators and stay
/// None rather than coercing to zero.
pub fn enrich(
    rows: &[CleanedRecord],
    dims: &Dimensions,
    age_bucket_days: [i64; 3],
) -> Vec<EnrichedRecord> {
    let mut enriched = Vec::new();

    for row in rows {
        if !row.keep_core {
            continue;
        }
        // core rows always carry a date (date_null rows are excluded) and
        // joined dimensions; skip defensively if either is gone
        let date = match row.date {
            Some(date) => date,
            None => continue,
        };
        let store = match dims.store(&row.store_id) {
            Some(store) => store,
            None => continue,
        };
        let region = match dims.region(&row.region) {
            Some(region) => region,
            None => continue,
        };

        let aov = if row.transaction_count > 0 {
            Some(row.revenue / row.transaction_count as f64)
        } else {
            None
        };

        let raw_age_days = (date - store.opening_date).num_days();

        let revenue_per_capita = if region.population > 0 {
            Some(row.revenue / region.population as f64)
        } else {
            None
        };

        enriched.push(EnrichedRecord {
            store_id: row.store_id.clone(),
            date,
            region: row.region.clone(),
            city: row.city.clone(),
            revenue: row.revenue,
            transaction_count: row.transaction_count,
            aov,
            store_age_days: raw_age_days.max(0),
            age_bucket: AgeBucket::classify(raw_age_days, age_bucket_days),
            revenue_per_capita,
            flags: row.flags,
            keep_core: row.keep_core,
        });
    }

    info!("enriched {} core rows", enriched.len());
    enriched
}
