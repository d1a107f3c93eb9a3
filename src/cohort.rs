// Cohort/Ramp Analyzer - weekly buckets since opening, ramp curves,
// time-to-benchmark against network medians

use crate::kpi::StoreWindowAggregate;
use crate::model::{Dimensions, EnrichedRecord};
use crate::stats::{mean, median, percentile};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// TYPES
// ============================================================================

/// One store-week since opening: offset 0 covers opening day through day 6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortWeek {
    pub store_id: String,
    pub weeks_since_open: i64,
    pub week_revenue: f64,
    pub week_transactions: i64,
    pub week_aov: Option<f64>,
}

/// Averaged ramp-curve point for one cohort key (opening month or region)
/// at one week offset. `store_count` is the number of stores contributing;
/// low counts make the point statistically unreliable and callers are
/// expected to treat it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampPoint {
    pub key: String,
    pub week_offset: i64,
    pub store_count: usize,
    pub avg_revenue: f64,
    pub avg_transactions: f64,
    pub avg_aov: Option<f64>,
}

/// Network benchmark: continuous medians across stores of the trailing
/// window AOV and transaction totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtbBenchmark {
    pub aov: Option<f64>,
    pub transactions: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreTtb {
    pub store_id: String,
    pub region: String,
    pub cohort_month: String,
    /// Smallest week offset meeting both benchmarks simultaneously;
    /// None if never achieved in observed history.
    pub weeks_to_benchmark: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtbSummary {
    pub group: String,
    pub achieved: usize,
    pub total: usize,
    pub mean_weeks: Option<f64>,
    pub median_weeks: Option<f64>,
    pub p90_weeks: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CohortReport {
    pub weeks: Vec<CohortWeek>,
    pub ramp_by_cohort: Vec<RampPoint>,
    pub ramp_by_region: Vec<RampPoint>,
    pub benchmark: TtbBenchmark,
    pub store_ttb: Vec<StoreTtb>,
    pub ttb_by_region: Vec<TtbSummary>,
    pub ttb_by_cohort: Vec<TtbSummary>,
}

// ============================================================================
// ANALYZER
// ============================================================================

pub struct CohortAnalyzer;

impl CohortAnalyzer {
    pub fn new() -> Self {
        CohortAnalyzer
    }

    /// Bucket core rows into weeks since opening and derive the ramp and
    /// time-to-benchmark views. `window_stores` feeds the network medians.
    pub fn analyze(
        &self,
        rows: &[EnrichedRecord],
        dims: &Dimensions,
        window_stores: &[StoreWindowAggregate],
    ) -> CohortReport {
        let weeks = weekly_buckets(rows, dims);
        let ramp_by_cohort = ramp_curve(&weeks, dims, |store| {
            store.opening_date.format("%Y-%m").to_string()
        });
        let ramp_by_region = ramp_curve(&weeks, dims, |store| store.region.clone());

        let benchmark = TtbBenchmark {
            aov: median(
                &window_stores
                    .iter()
                    .filter_map(|s| s.aov)
                    .collect::<Vec<f64>>(),
            ),
            transactions: median(
                &window_stores
                    .iter()
                    .map(|s| s.transaction_sum as f64)
                    .collect::<Vec<f64>>(),
            ),
        };

        let store_ttb = time_to_benchmark(&weeks, dims, &benchmark);
        let ttb_by_region = summarize(&store_ttb, |t| t.region.clone());
        let ttb_by_cohort = summarize(&store_ttb, |t| t.cohort_month.clone());

        info!(
            "cohort: {} store-weeks, benchmark aov {:?} / tx {:?}, {}/{} stores reached it",
            weeks.len(),
            benchmark.aov,
            benchmark.transactions,
            store_ttb
                .iter()
                .filter(|t| t.weeks_to_benchmark.is_some())
                .count(),
            store_ttb.len()
        );

        CohortReport {
            weeks,
            ramp_by_cohort,
            ramp_by_region,
            benchmark,
            store_ttb,
            ttb_by_region,
            ttb_by_cohort,
        }
    }
}

impl Default for CohortAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate rows on/after opening into whole weeks since opening,
/// floor(days / 7). Pre-opening rows do not form cohort weeks.
fn weekly_buckets(rows: &[EnrichedRecord], dims: &Dimensions) -> Vec<CohortWeek> {
    let mut acc: BTreeMap<(String, i64), (f64, i64)> = BTreeMap::new();

    for row in rows {
        let store = match dims.store(&row.store_id) {
            Some(store) => store,
            None => continue,
        };
        let days_since_open = (row.date - store.opening_date).num_days();
        if days_since_open < 0 {
            continue;
        }
        let offset = days_since_open / 7;
        let slot = acc.entry((row.store_id.clone(), offset)).or_insert((0.0, 0));
        slot.0 += row.revenue;
        slot.1 += row.transaction_count;
    }

    acc.into_iter()
        .map(|((store_id, weeks_since_open), (revenue, transactions))| CohortWeek {
            store_id,
            weeks_since_open,
            week_revenue: revenue,
            week_transactions: transactions,
            week_aov: if transactions > 0 {
                Some(revenue / transactions as f64)
            } else {
                None
            },
        })
        .collect()
}

/// Average the per-store weekly metrics by (key, week offset). The AOV
/// average runs over the stores whose weekly AOV is defined.
fn ramp_curve<F>(weeks: &[CohortWeek], dims: &Dimensions, key_of: F) -> Vec<RampPoint>
where
    F: Fn(&crate::model::StoreMaster) -> String,
{
    let mut groups: BTreeMap<(String, i64), Vec<&CohortWeek>> = BTreeMap::new();
    for week in weeks {
        let store = match dims.store(&week.store_id) {
            Some(store) => store,
            None => continue,
        };
        groups
            .entry((key_of(store), week.weeks_since_open))
            .or_default()
            .push(week);
    }

    groups
        .into_iter()
        .map(|((key, week_offset), members)| {
            let revenues: Vec<f64> = members.iter().map(|w| w.week_revenue).collect();
            let transactions: Vec<f64> =
                members.iter().map(|w| w.week_transactions as f64).collect();
            let aovs: Vec<f64> = members.iter().filter_map(|w| w.week_aov).collect();
            RampPoint {
                key,
                week_offset,
                store_count: members.len(),
                avg_revenue: mean(&revenues).unwrap_or(0.0),
                avg_transactions: mean(&transactions).unwrap_or(0.0),
                avg_aov: mean(&aovs),
            }
        })
        .collect()
}

/// First week offset where a store meets both benchmarks at once. A week
/// that meets only one of the two does not count.
fn time_to_benchmark(
    weeks: &[CohortWeek],
    dims: &Dimensions,
    benchmark: &TtbBenchmark,
) -> Vec<StoreTtb> {
    let mut per_store: BTreeMap<&str, Vec<&CohortWeek>> = BTreeMap::new();
    for week in weeks {
        per_store.entry(week.store_id.as_str()).or_default().push(week);
    }

    let mut stores: Vec<&crate::model::StoreMaster> = dims.joinable_stores().collect();
    stores.sort_by(|a, b| a.store_id.cmp(&b.store_id));

    stores
        .into_iter()
        .map(|store| {
            let weeks_to_benchmark = match (benchmark.aov, benchmark.transactions) {
                (Some(bench_aov), Some(bench_tx)) => per_store
                    .get(store.store_id.as_str())
                    .and_then(|store_weeks| {
                        // BTreeMap grouping keeps offsets ascending per store
                        store_weeks
                            .iter()
                            .find(|w| {
                                w.week_aov.map_or(false, |aov| aov >= bench_aov)
                                    && w.week_transactions as f64 >= bench_tx
                            })
                            .map(|w| w.weeks_since_open)
                    }),
                _ => None,
            };

            StoreTtb {
                store_id: store.store_id.clone(),
                region: store.region.clone(),
                cohort_month: store.opening_date.format("%Y-%m").to_string(),
                weeks_to_benchmark,
            }
        })
        .collect()
}

/// TTB distribution per group: mean/median/p90 over the stores that
/// achieved the benchmark.
fn summarize<F>(store_ttb: &[StoreTtb], key_of: F) -> Vec<TtbSummary>
where
    F: Fn(&StoreTtb) -> String,
{
    let mut groups: BTreeMap<String, Vec<&StoreTtb>> = BTreeMap::new();
    for t in store_ttb {
        groups.entry(key_of(t)).or_default().push(t);
    }

    groups
        .into_iter()
        .map(|(group, members)| {
            let achieved_weeks: Vec<f64> = members
                .iter()
                .filter_map(|t| t.weeks_to_benchmark)
                .map(|w| w as f64)
                .collect();
            TtbSummary {
                group,
                achieved: achieved_weeks.len(),
                total: members.len(),
                mean_weeks: mean(&achieved_weeks),
                median_weeks: median(&achieved_weeks),
                p90_weeks: percentile(&achieved_weeks, 90.0),
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgeBucket, AnomalyFlags, RegionInfo, StoreMaster};
    use chrono::NaiveDate;

    fn opening() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn make_dims() -> Dimensions {
        let regions = vec![
            RegionInfo {
                region: "North".to_string(),
                population: 100_000,
                avg_income: 52_000.0,
            },
            RegionInfo {
                region: "South".to_string(),
                population: 80_000,
                avg_income: 47_000.0,
            },
        ];
        let stores = vec![
            StoreMaster {
                store_id: "S1".to_string(),
                city: "Aurora".to_string(),
                region: "North".to_string(),
                opening_date: opening(),
            },
            StoreMaster {
                store_id: "S2".to_string(),
                city: "Brio".to_string(),
                region: "South".to_string(),
                opening_date: opening(),
            },
        ];
        Dimensions::build(&stores, &regions)
    }

    fn make_row(store: &str, region: &str, date: NaiveDate, revenue: f64, tx: i64) -> EnrichedRecord {
        EnrichedRecord {
            store_id: store.to_string(),
            date,
            region: region.to_string(),
            city: "City".to_string(),
            revenue,
            transaction_count: tx,
            aov: if tx > 0 { Some(revenue / tx as f64) } else { None },
            store_age_days: (date - opening()).num_days().max(0),
            age_bucket: AgeBucket::M0to6,
            revenue_per_capita: Some(revenue / 100_000.0),
            flags: AnomalyFlags::default(),
            keep_core: true,
        }
    }

    fn make_window_store(id: &str, revenue: f64, tx: i64) -> StoreWindowAggregate {
        StoreWindowAggregate {
            store_id: id.to_string(),
            region: "North".to_string(),
            revenue_sum: revenue,
            transaction_sum: tx,
            aov: if tx > 0 { Some(revenue / tx as f64) } else { None },
            row_count: 1,
        }
    }

    #[test]
    fn test_weekly_bucket_boundaries() {
        let dims = make_dims();
        let rows = vec![
            make_row("S1", "North", opening(), 100.0, 10),                            // day 0
            make_row("S1", "North", opening() + chrono::Duration::days(6), 50.0, 5),  // day 6
            make_row("S1", "North", opening() + chrono::Duration::days(7), 70.0, 7),  // day 7
        ];

        let report = CohortAnalyzer::new().analyze(&rows, &dims, &[]);

        let week0 = report
            .weeks
            .iter()
            .find(|w| w.weeks_since_open == 0)
            .unwrap();
        assert_eq!(week0.week_revenue, 150.0);
        assert_eq!(week0.week_transactions, 15);
        assert_eq!(week0.week_aov, Some(10.0));

        let week1 = report
            .weeks
            .iter()
            .find(|w| w.weeks_since_open == 1)
            .unwrap();
        assert_eq!(week1.week_revenue, 70.0);
    }

    #[test]
    fn test_pre_opening_rows_form_no_cohort_week() {
        let dims = make_dims();
        let rows = vec![make_row(
            "S1",
            "North",
            opening() - chrono::Duration::days(3),
            100.0,
            10,
        )];

        let report = CohortAnalyzer::new().analyze(&rows, &dims, &[]);
        assert!(report.weeks.is_empty());
    }

    #[test]
    fn test_time_to_benchmark_needs_both_metrics() {
        let dims = make_dims();
        // single window store fixes the medians at aov 10.0 and tx 50
        let window = vec![make_window_store("S1", 500.0, 50)];

        let rows = vec![
            // week 2: aov 10.5 meets the benchmark, 40 transactions do not
            make_row("S1", "North", opening() + chrono::Duration::days(14), 420.0, 40),
            // week 3: aov 10.5 and 52 transactions, first week meeting both
            make_row("S1", "North", opening() + chrono::Duration::days(21), 546.0, 52),
        ];

        let report = CohortAnalyzer::new().analyze(&rows, &dims, &window);

        assert_eq!(report.benchmark.aov, Some(10.0));
        assert_eq!(report.benchmark.transactions, Some(50.0));

        let s1 = report.store_ttb.iter().find(|t| t.store_id == "S1").unwrap();
        assert_eq!(s1.weeks_to_benchmark, Some(3));

        // a store with no qualifying week never achieves the benchmark
        let s2 = report.store_ttb.iter().find(|t| t.store_id == "S2").unwrap();
        assert_eq!(s2.weeks_to_benchmark, None);
    }

    #[test]
    fn test_ramp_store_count_shrinks_with_offset() {
        let dims = make_dims();
        let rows = vec![
            make_row("S1", "North", opening(), 100.0, 10),
            make_row("S1", "North", opening() + chrono::Duration::days(8), 80.0, 8),
            make_row("S2", "South", opening(), 60.0, 6),
        ];

        let report = CohortAnalyzer::new().analyze(&rows, &dims, &[]);

        // both stores opened the same month, so the cohort view merges them
        let week0 = report
            .ramp_by_cohort
            .iter()
            .find(|p| p.week_offset == 0)
            .unwrap();
        assert_eq!(week0.store_count, 2);
        assert_eq!(week0.avg_revenue, 80.0);

        let week1 = report
            .ramp_by_cohort
            .iter()
            .find(|p| p.week_offset == 1)
            .unwrap();
        assert_eq!(week1.store_count, 1);

        // the region view keeps them apart
        let north0 = report
            .ramp_by_region
            .iter()
            .find(|p| p.key == "North" && p.week_offset == 0)
            .unwrap();
        assert_eq!(north0.store_count, 1);
        assert_eq!(north0.avg_revenue, 100.0);
    }

    #[test]
    fn test_ttb_summaries_cover_achievers_only() {
        let dims = make_dims();
        let window = vec![make_window_store("S1", 500.0, 50)];
        let rows = vec![
            make_row("S1", "North", opening() + chrono::Duration::days(14), 600.0, 55),
        ];

        let report = CohortAnalyzer::new().analyze(&rows, &dims, &window);

        let north = report
            .ttb_by_region
            .iter()
            .find(|s| s.group == "North")
            .unwrap();
        assert_eq!(north.achieved, 1);
        assert_eq!(north.total, 1);
        assert_eq!(north.mean_weeks, Some(2.0));
        assert_eq!(north.median_weeks, Some(2.0));

        let south = report
            .ttb_by_region
            .iter()
            .find(|s| s.group == "South")
            .unwrap();
        assert_eq!(south.achieved, 0);
        assert_eq!(south.total, 1);
        assert_eq!(south.mean_weeks, None);
    }
}
