// Cleaning Engine - anomaly flagging, winsorization, deduplication
//
// Rules, in precedence order:
//   1. tx_negative:       transaction_count < 0            -> excluded
//   2. date_null:         date missing                     -> excluded
//   3. tx0_revpos:        tx == 0 with revenue > 0         -> excluded
//   4. rev_nonpos_txpos:  tx > 0 with revenue <= 0         -> retained, flagged
// Winsorization caps revenue per (region, date) group; dedup keeps one row
// per (store_id, date). Every flagged or dropped row stays visible in the
// anomalies view; `keep_core` decides inclusion in downstream KPIs.

use crate::config::PipelineConfig;
use crate::model::{AnomalyFlags, CleanedRecord, Dimensions, SalesRecord};
use crate::stats::percentile_of_sorted;
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

// ============================================================================
// DATA QUALITY COUNTS
// ============================================================================

/// Data-integrity metrics for one cleaning pass. Never fatal; these ship in
/// the report bundle so the dashboard can show pipeline health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityCounts {
    pub raw_rows: usize,
    /// Sales rows whose store_id has no store master row.
    pub orphan_store_rows: usize,
    /// Sales rows whose store references an unknown region.
    pub orphan_region_rows: usize,
    pub tx_negative: usize,
    pub date_null: usize,
    pub tx0_revpos: usize,
    pub rev_nonpos_txpos: usize,
    pub revenue_capped: usize,
    pub duplicates_dropped: usize,
    pub kept_rows: usize,
}

impl DataQualityCounts {
    pub fn summary(&self) -> String {
        format!(
            "{} raw rows -> {} kept | orphans: {} store / {} region | flags: {} tx<0, {} no date, {} tx0/rev+, {} returns | {} capped, {} duplicates dropped",
            self.raw_rows,
            self.kept_rows,
            self.orphan_store_rows,
            self.orphan_region_rows,
            self.tx_negative,
            self.date_null,
            self.tx0_revpos,
            self.rev_nonpos_txpos,
            self.revenue_capped,
            self.duplicates_dropped,
        )
    }
}

/// Cleaned row set plus its quality metrics.
#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub rows: Vec<CleanedRecord>,
    pub counts: DataQualityCounts,
}

// ============================================================================
// CLEANING ENGINE
// ============================================================================

pub struct CleaningEngine {
    /// Winsorization percentile bounds in [0, 100].
    pub winsor_lower_pct: f64,
    pub winsor_upper_pct: f64,
}

impl CleaningEngine {
    pub fn new() -> Self {
        CleaningEngine {
            winsor_lower_pct: 1.0,
            winsor_upper_pct: 99.0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        CleaningEngine {
            winsor_lower_pct: config.winsor_lower_pct,
            winsor_upper_pct: config.winsor_upper_pct,
        }
    }

    /// Run the full cleaning pass: join, flag, winsorize, deduplicate.
    /// Input order is preserved, which also fixes every tie-break.
    pub fn clean(&self, sales: &[SalesRecord], dims: &Dimensions) -> CleanOutcome {
        let mut counts = DataQualityCounts {
            raw_rows: sales.len(),
            ..Default::default()
        };

        let mut rows = self.join_and_flag(sales, dims, &mut counts);
        self.winsorize(&mut rows, &mut counts);
        self.deduplicate(&mut rows, &mut counts);

        counts.kept_rows = rows.iter().filter(|r| r.keep_core).count();
        info!("cleaning: {}", counts.summary());

        CleanOutcome { rows, counts }
    }

    /// Join each sales row to its dimensions and apply the flag rules.
    /// Rows that fail the join are a data-integrity error: dropped before
    /// flagging, reported only as counts.
    fn join_and_flag(
        &self,
        sales: &[SalesRecord],
        dims: &Dimensions,
        counts: &mut DataQualityCounts,
    ) -> Vec<CleanedRecord> {
        let mut rows = Vec::with_capacity(sales.len());

        for sale in sales {
            let store = match dims.store(&sale.store_id) {
                Some(store) => store,
                None => {
                    counts.orphan_store_rows += 1;
                    continue;
                }
            };
            if dims.region(&store.region).is_none() {
                counts.orphan_region_rows += 1;
                continue;
            }

            let mut flags = AnomalyFlags::default();
            if sale.transaction_count < 0 {
                flags.tx_negative = true;
                counts.tx_negative += 1;
            }
            if sale.date.is_none() {
                flags.date_null = true;
                counts.date_null += 1;
            }
            if sale.transaction_count == 0 && sale.revenue > 0.0 {
                flags.tx0_revpos = true;
                counts.tx0_revpos += 1;
            }
            if sale.transaction_count > 0 && sale.revenue <= 0.0 {
                flags.rev_nonpos_txpos = true;
                counts.rev_nonpos_txpos += 1;
            }

            let keep_core = !flags.excludes();
            rows.push(CleanedRecord {
                store_id: sale.store_id.clone(),
                date: sale.date,
                region: store.region.clone(),
                city: store.city.clone(),
                revenue: sale.revenue,
                revenue_raw: sale.revenue,
                transaction_count: sale.transaction_count,
                flags,
                keep_core,
            });
        }

        rows
    }

    /// Cap revenue into the configured percentile range per (region, date)
    /// group. Bounds are computed over the rows that survived exclusion;
    /// groups without two rows have no distinct order statistics and are
    /// left unchanged.
    fn winsorize(&self, rows: &mut [CleanedRecord], counts: &mut DataQualityCounts) {
        let mut groups: HashMap<(&str, NaiveDate), Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            if !row.keep_core {
                continue;
            }
            if let Some(date) = row.date {
                groups.entry((row.region.as_str(), date)).or_default().push(i);
            }
        }

        // Resolve group membership to plain indexes first so the map's
        // borrow of `rows` ends before mutation.
        let groups: Vec<Vec<usize>> = groups.into_values().collect();

        for members in groups {
            let mut revenues: Vec<f64> = members.iter().map(|&i| rows[i].revenue).collect();
            let bounds = match winsor_bounds(
                &mut revenues,
                self.winsor_lower_pct,
                self.winsor_upper_pct,
            ) {
                Some(bounds) => bounds,
                None => continue,
            };

            for &i in &members {
                let capped = cap(rows[i].revenue, bounds);
                if capped != rows[i].revenue {
                    debug!(
                        "capping {} on {:?}: {} -> {}",
                        rows[i].store_id, rows[i].date, rows[i].revenue, capped
                    );
                    rows[i].revenue = capped;
                    rows[i].flags.revenue_capped = true;
                    counts.revenue_capped += 1;
                }
            }
        }
    }

    /// Keep exactly one row per (store_id, date): highest capped revenue,
    /// then highest transaction count, then first encountered. Losers stay
    /// in the anomalies view with `duplicate_dropped` set.
    fn deduplicate(&self, rows: &mut [CleanedRecord], counts: &mut DataQualityCounts) {
        let mut best: HashMap<(String, NaiveDate), usize> = HashMap::new();

        for (i, row) in rows.iter().enumerate() {
            if !row.keep_core {
                continue;
            }
            let date = match row.date {
                Some(date) => date,
                None => continue,
            };
            match best.entry((row.store_id.clone(), date)) {
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
                Entry::Occupied(mut slot) => {
                    let current = &rows[*slot.get()];
                    let better = row.revenue > current.revenue
                        || (row.revenue == current.revenue
                            && row.transaction_count > current.transaction_count);
                    if better {
                        slot.insert(i);
                    }
                }
            }
        }

        let winners: HashSet<usize> = best.into_values().collect();
        for (i, row) in rows.iter_mut().enumerate() {
            if row.keep_core && !winners.contains(&i) {
                row.flags.duplicate_dropped = true;
                row.keep_core = false;
                counts.duplicates_dropped += 1;
            }
        }
    }
}

impl Default for CleaningEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile bounds for one winsorization group. Sorts in place; None when
/// the group is too small for distinct order statistics.
pub fn winsor_bounds(revenues: &mut [f64], lower_pct: f64, upper_pct: f64) -> Option<(f64, f64)> {
    if revenues.len() < 2 {
        return None;
    }
    revenues.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let lo = percentile_of_sorted(revenues, lower_pct)?;
    let hi = percentile_of_sorted(revenues, upper_pct)?;
    Some((lo, hi))
}

fn cap(value: f64, (lo, hi): (f64, f64)) -> f64 {
    value.min(hi).max(lo)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RegionInfo, StoreMaster};

    fn make_dims() -> Dimensions {
        let regions = vec![RegionInfo {
            region: "North".to_string(),
            population: 100_000,
            avg_income: 52_000.0,
        }];
        let stores = vec![
            StoreMaster {
                store_id: "S1".to_string(),
                city: "Aurora".to_string(),
                region: "North".to_string(),
                opening_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            },
            StoreMaster {
                store_id: "S2".to_string(),
                city: "Brio".to_string(),
                region: "North".to_string(),
                opening_date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            },
            StoreMaster {
                store_id: "S9".to_string(),
                city: "Ghost".to_string(),
                region: "Atlantis".to_string(),
                opening_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            },
        ];
        Dimensions::build(&stores, &regions)
    }

    fn make_sale(store_id: &str, day: u32, revenue: f64, tx: i64) -> SalesRecord {
        SalesRecord {
            store_id: store_id.to_string(),
            date: Some(NaiveDate::from_ymd_opt(2024, 5, day).unwrap()),
            revenue,
            transaction_count: tx,
        }
    }

    #[test]
    fn test_flag_rules() {
        let dims = make_dims();
        let sales = vec![
            make_sale("S1", 1, 500.0, 20),
            make_sale("S1", 2, 150.0, 0), // test/data-entry noise
            make_sale("S1", 3, -80.0, 5), // returns day
            make_sale("S1", 4, 100.0, -3),
            SalesRecord {
                store_id: "S1".to_string(),
                date: None,
                revenue: 100.0,
                transaction_count: 4,
            },
        ];

        let outcome = CleaningEngine::new().clean(&sales, &dims);

        assert_eq!(outcome.counts.tx0_revpos, 1);
        assert_eq!(outcome.counts.rev_nonpos_txpos, 1);
        assert_eq!(outcome.counts.tx_negative, 1);
        assert_eq!(outcome.counts.date_null, 1);
        assert_eq!(outcome.counts.kept_rows, 2, "clean row + returns day");

        let noise = &outcome.rows[1];
        assert!(noise.flags.tx0_revpos);
        assert!(!noise.keep_core, "tx=0 with revenue stays out of the core");

        let returns = &outcome.rows[2];
        assert!(returns.flags.rev_nonpos_txpos);
        assert!(returns.keep_core, "returns day is retained");
    }

    #[test]
    fn test_orphan_rows_counted_not_fatal() {
        let dims = make_dims();
        let sales = vec![
            make_sale("S1", 1, 500.0, 20),
            make_sale("UNKNOWN", 1, 500.0, 20),
            make_sale("S9", 1, 500.0, 20), // store exists, region does not
        ];

        let outcome = CleaningEngine::new().clean(&sales, &dims);

        assert_eq!(outcome.counts.orphan_store_rows, 1);
        assert_eq!(outcome.counts.orphan_region_rows, 1);
        assert_eq!(outcome.rows.len(), 1);
    }

    #[test]
    fn test_winsorization_caps_extremes() {
        let dims = make_dims();
        // one (region, date) group: ten steady rows plus a wild outlier
        let mut group: Vec<SalesRecord> =
            (0..10).map(|_| make_sale("S1", 1, 1000.0, 10)).collect();
        group.push(make_sale("S2", 1, 1_000_000.0, 10));

        let outcome = CleaningEngine::new().clean(&group, &dims);

        let outlier = outcome
            .rows
            .iter()
            .find(|r| r.revenue_raw == 1_000_000.0)
            .unwrap();
        assert!(outlier.flags.revenue_capped);
        assert!(outlier.revenue < 1_000_000.0);
        assert_eq!(outlier.revenue_raw, 1_000_000.0, "raw revenue preserved");
    }

    #[test]
    fn test_winsorization_skips_small_groups() {
        let dims = make_dims();
        let sales = vec![make_sale("S1", 1, 123_456.0, 10)];

        let outcome = CleaningEngine::new().clean(&sales, &dims);

        assert_eq!(outcome.counts.revenue_capped, 0);
        assert_eq!(outcome.rows[0].revenue, 123_456.0);
    }

    #[test]
    fn test_capping_idempotent_with_fixed_bounds() {
        let mut revenues = vec![5.0, 1.0, 9.0, 3.0, 100.0, -50.0, 7.0, 2.0];
        let bounds = winsor_bounds(&mut revenues, 1.0, 99.0).unwrap();

        let once: Vec<f64> = revenues.iter().map(|&v| cap(v, bounds)).collect();
        let twice: Vec<f64> = once.iter().map(|&v| cap(v, bounds)).collect();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_dedup_keeps_max_revenue_then_max_tx_then_first() {
        let dims = make_dims();
        let sales = vec![
            make_sale("S1", 1, 500.0, 20),
            make_sale("S1", 1, 800.0, 10), // winner: highest revenue
            make_sale("S1", 2, 300.0, 5),
            make_sale("S1", 2, 300.0, 9), // winner: revenue tie, more tx
            make_sale("S2", 3, 100.0, 4), // winner: revenue+tx tie, first seen
            make_sale("S2", 3, 100.0, 4),
        ];

        // neutral winsorization bounds so dedup is exercised in isolation
        let engine = CleaningEngine {
            winsor_lower_pct: 0.0,
            winsor_upper_pct: 100.0,
        };
        let outcome = engine.clean(&sales, &dims);

        let kept: Vec<&CleanedRecord> =
            outcome.rows.iter().filter(|r| r.keep_core).collect();
        assert_eq!(kept.len(), 3, "one row per (store_id, date)");
        assert_eq!(outcome.counts.duplicates_dropped, 3);

        let day1 = kept
            .iter()
            .find(|r| r.date == Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()))
            .unwrap();
        assert_eq!(day1.revenue, 800.0);

        let day2 = kept
            .iter()
            .find(|r| r.date == Some(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()))
            .unwrap();
        assert_eq!(day2.transaction_count, 9);

        let day3 = kept.iter().find(|r| r.store_id == "S2").unwrap();
        assert_eq!(day3.transaction_count, 4);
        // the dropped twin is still visible in the anomalies view
        let dropped: Vec<&CleanedRecord> = outcome
            .rows
            .iter()
            .filter(|r| r.flags.duplicate_dropped)
            .collect();
        assert_eq!(dropped.len(), 3);
    }
}
