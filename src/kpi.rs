// KPI Aggregator - trailing-window rollups, time series, league quartiles

use crate::config::PipelineConfig;
use crate::model::EnrichedRecord;
use crate::stats::mean;
use chrono::{Datelike, Duration, NaiveDate};
use log::info;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// ROLLUP TYPES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkKpis {
    pub revenue: f64,
    pub transactions: i64,
    pub aov: Option<f64>,
    pub active_stores: usize,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionKpis {
    pub region: String,
    pub revenue: f64,
    pub transactions: i64,
    pub aov: Option<f64>,
    /// Mean of the defined per-row revenue_per_capita values in the window.
    pub avg_revenue_per_capita: Option<f64>,
    pub store_count: usize,
}

/// Per-store totals over the trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreWindowAggregate {
    pub store_id: String,
    pub region: String,
    pub revenue_sum: f64,
    pub transaction_sum: i64,
    /// revenue_sum / transaction_sum; None when transaction_sum == 0.
    pub aov: Option<f64>,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayKpis {
    /// ISO weekday, 1 = Monday .. 7 = Sunday.
    pub weekday: u32,
    pub revenue: f64,
    pub transactions: i64,
    pub aov: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub revenue: f64,
    pub transactions: i64,
    pub aov: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPoint {
    /// Monday of the ISO week.
    pub week_start: NaiveDate,
    pub revenue: f64,
    pub transactions: i64,
    pub aov: Option<f64>,
}

/// Quartile bucket per store within its region, independently per metric.
/// 1 = top band, descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueEntry {
    pub store_id: String,
    pub region: String,
    pub revenue_quartile: u8,
    pub aov_quartile: u8,
    pub transactions_quartile: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowKpis {
    pub reference_date: Option<NaiveDate>,
    pub window_start: Option<NaiveDate>,
    pub network: NetworkKpis,
    pub regions: Vec<RegionKpis>,
    pub stores: Vec<StoreWindowAggregate>,
    pub weekday_seasonality: Vec<WeekdayKpis>,
    pub daily: Vec<DailyPoint>,
    pub weekly: Vec<WeeklyPoint>,
    pub leagues: Vec<LeagueEntry>,
}

fn derive_aov(revenue: f64, transactions: i64) -> Option<f64> {
    if transactions > 0 {
        Some(revenue / transactions as f64)
    } else {
        None
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Compute every windowed rollup. The reference date defaults to the latest
/// date in the core rows; the window is inclusive on both ends,
/// [reference - (window_days - 1), reference].
pub fn compute_window_kpis(rows: &[EnrichedRecord], config: &PipelineConfig) -> WindowKpis {
    let reference = config
        .reference_date
        .or_else(|| rows.iter().map(|r| r.date).max());
    let reference = match reference {
        Some(date) => date,
        None => return WindowKpis::default(),
    };
    let window_start = reference - Duration::days(config.window_days - 1);

    let window: Vec<&EnrichedRecord> = rows
        .iter()
        .filter(|r| r.date >= window_start && r.date <= reference)
        .collect();
    info!(
        "window {} .. {}: {} rows",
        window_start,
        reference,
        window.len()
    );

    let stores = store_aggregates(&window);
    let leagues = league_table(&stores);

    // network rollup
    let revenue: f64 = window.iter().map(|r| r.revenue).sum();
    let transactions: i64 = window.iter().map(|r| r.transaction_count).sum();
    let network = NetworkKpis {
        revenue,
        transactions,
        aov: derive_aov(revenue, transactions),
        active_stores: stores.len(),
        row_count: window.len(),
    };

    // region rollup
    let mut region_rev: BTreeMap<&str, (f64, i64)> = BTreeMap::new();
    let mut region_rpc: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in &window {
        let slot = region_rev.entry(r.region.as_str()).or_insert((0.0, 0));
        slot.0 += r.revenue;
        slot.1 += r.transaction_count;
        if let Some(rpc) = r.revenue_per_capita {
            region_rpc.entry(r.region.as_str()).or_default().push(rpc);
        }
    }
    let mut region_stores: HashMap<&str, usize> = HashMap::new();
    for s in &stores {
        *region_stores.entry(s.region.as_str()).or_insert(0) += 1;
    }
    let regions: Vec<RegionKpis> = region_rev
        .into_iter()
        .map(|(region, (revenue, transactions))| RegionKpis {
            region: region.to_string(),
            revenue,
            transactions,
            aov: derive_aov(revenue, transactions),
            avg_revenue_per_capita: region_rpc.get(region).and_then(|v| mean(v)),
            store_count: region_stores.get(region).copied().unwrap_or(0),
        })
        .collect();

    // weekday seasonality, always all seven rows
    let mut weekday_acc = [(0.0f64, 0i64); 7];
    for r in &window {
        let idx = (r.date.weekday().number_from_monday() - 1) as usize;
        weekday_acc[idx].0 += r.revenue;
        weekday_acc[idx].1 += r.transaction_count;
    }
    let weekday_seasonality: Vec<WeekdayKpis> = weekday_acc
        .iter()
        .enumerate()
        .map(|(i, &(revenue, transactions))| WeekdayKpis {
            weekday: i as u32 + 1,
            revenue,
            transactions,
            aov: derive_aov(revenue, transactions),
        })
        .collect();

    // daily and weekly series
    let mut daily_acc: BTreeMap<NaiveDate, (f64, i64)> = BTreeMap::new();
    let mut weekly_acc: BTreeMap<NaiveDate, (f64, i64)> = BTreeMap::new();
    for r in &window {
        let slot = daily_acc.entry(r.date).or_insert((0.0, 0));
        slot.0 += r.revenue;
        slot.1 += r.transaction_count;

        let monday = r.date - Duration::days(r.date.weekday().number_from_monday() as i64 - 1);
        let slot = weekly_acc.entry(monday).or_insert((0.0, 0));
        slot.0 += r.revenue;
        slot.1 += r.transaction_count;
    }
    let daily = daily_acc
        .into_iter()
        .map(|(date, (revenue, transactions))| DailyPoint {
            date,
            revenue,
            transactions,
            aov: derive_aov(revenue, transactions),
        })
        .collect();
    let weekly = weekly_acc
        .into_iter()
        .map(|(week_start, (revenue, transactions))| WeeklyPoint {
            week_start,
            revenue,
            transactions,
            aov: derive_aov(revenue, transactions),
        })
        .collect();

    let mut stores_sorted = stores;
    stores_sorted.sort_by(|a, b| a.store_id.cmp(&b.store_id));

    WindowKpis {
        reference_date: Some(reference),
        window_start: Some(window_start),
        network,
        regions,
        stores: stores_sorted,
        weekday_seasonality,
        daily,
        weekly,
        leagues,
    }
}

/// Per-store aggregates in first-appearance order; that order is the stable
/// tie-break the league ranking relies on.
fn store_aggregates(window: &[&EnrichedRecord]) -> Vec<StoreWindowAggregate> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut aggs: Vec<StoreWindowAggregate> = Vec::new();

    for r in window {
        let i = *index.entry(r.store_id.as_str()).or_insert_with(|| {
            aggs.push(StoreWindowAggregate {
                store_id: r.store_id.clone(),
                region: r.region.clone(),
                revenue_sum: 0.0,
                transaction_sum: 0,
                aov: None,
                row_count: 0,
            });
            aggs.len() - 1
        });
        aggs[i].revenue_sum += r.revenue;
        aggs[i].transaction_sum += r.transaction_count;
        aggs[i].row_count += 1;
    }

    for agg in &mut aggs {
        agg.aov = derive_aov(agg.revenue_sum, agg.transaction_sum);
    }
    aggs
}

/// Quartile leagues per region, one ranking per metric. Explicit stable
/// descending sort plus NTILE bucket assignment: the first `n mod 4`
/// buckets take the extra rows, ties keep input order, undefined AOV ranks
/// below every defined value.
fn league_table(stores: &[StoreWindowAggregate]) -> Vec<LeagueEntry> {
    let mut by_region: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, s) in stores.iter().enumerate() {
        by_region.entry(s.region.as_str()).or_default().push(i);
    }

    let mut entries = Vec::with_capacity(stores.len());
    for (region, members) in by_region {
        let revenue: Vec<Option<f64>> =
            members.iter().map(|&i| Some(stores[i].revenue_sum)).collect();
        let transactions: Vec<Option<f64>> = members
            .iter()
            .map(|&i| Some(stores[i].transaction_sum as f64))
            .collect();
        let aov: Vec<Option<f64>> = members.iter().map(|&i| stores[i].aov).collect();

        let revenue_q = quartiles_desc(&revenue);
        let transactions_q = quartiles_desc(&transactions);
        let aov_q = quartiles_desc(&aov);

        for (slot, &i) in members.iter().enumerate() {
            entries.push(LeagueEntry {
                store_id: stores[i].store_id.clone(),
                region: region.to_string(),
                revenue_quartile: revenue_q[slot],
                aov_quartile: aov_q[slot],
                transactions_quartile: transactions_q[slot],
            });
        }
    }

    entries.sort_by(|a, b| a.region.cmp(&b.region).then(a.store_id.cmp(&b.store_id)));
    entries
}

/// Descending order with undefined values last; equal values tie.
fn desc_cmp(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Quartile index per input slot from a stable descending ranking.
fn quartiles_desc(values: &[Option<f64>]) -> Vec<u8> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| desc_cmp(values[a], values[b]));

    let mut out = vec![0u8; values.len()];
    for (position, &idx) in order.iter().enumerate() {
        out[idx] = ntile(values.len(), position, 4);
    }
    out
}

/// SQL NTILE bucket for a 0-based position: the first `count % buckets`
/// buckets hold one extra row.
fn ntile(count: usize, position: usize, buckets: usize) -> u8 {
    let base = count / buckets;
    let extra = count % buckets;
    let cutoff = extra * (base + 1);
    if position < cutoff {
        (position / (base + 1) + 1) as u8
    } else {
        (extra + (position - cutoff) / base.max(1) + 1) as u8
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgeBucket, AnomalyFlags};

    fn make_row(store: &str, region: &str, date: NaiveDate, revenue: f64, tx: i64) -> EnrichedRecord {
        EnrichedRecord {
            store_id: store.to_string(),
            date,
            region: region.to_string(),
            city: "City".to_string(),
            revenue,
            transaction_count: tx,
            aov: if tx > 0 { Some(revenue / tx as f64) } else { None },
            store_age_days: 100,
            age_bucket: AgeBucket::M0to6,
            revenue_per_capita: Some(revenue / 100_000.0),
            flags: AnomalyFlags::default(),
            keep_core: true,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_window_is_inclusive() {
        let config = PipelineConfig {
            window_days: 7,
            ..Default::default()
        };
        let rows = vec![
            make_row("S1", "North", d(2024, 5, 24), 100.0, 10), // day before window
            make_row("S1", "North", d(2024, 5, 25), 200.0, 10), // first day in
            make_row("S1", "North", d(2024, 5, 31), 400.0, 10), // reference day
        ];

        let kpis = compute_window_kpis(&rows, &config);

        assert_eq!(kpis.reference_date, Some(d(2024, 5, 31)));
        assert_eq!(kpis.window_start, Some(d(2024, 5, 25)));
        assert_eq!(kpis.network.row_count, 2);
        assert_eq!(kpis.network.revenue, 600.0);
    }

    #[test]
    fn test_network_aov_guard() {
        let config = PipelineConfig::default();
        let rows = vec![make_row("S1", "North", d(2024, 5, 1), 0.0, 0)];

        let kpis = compute_window_kpis(&rows, &config);

        assert_eq!(kpis.network.aov, None);
        assert_eq!(kpis.stores[0].aov, None);
    }

    #[test]
    fn test_weekday_seasonality() {
        let config = PipelineConfig::default();
        // 2024-05-06 is a Monday, 2024-05-12 a Sunday
        let rows = vec![
            make_row("S1", "North", d(2024, 5, 6), 100.0, 5),
            make_row("S1", "North", d(2024, 5, 12), 70.0, 7),
        ];

        let kpis = compute_window_kpis(&rows, &config);

        assert_eq!(kpis.weekday_seasonality.len(), 7);
        assert_eq!(kpis.weekday_seasonality[0].weekday, 1);
        assert_eq!(kpis.weekday_seasonality[0].revenue, 100.0);
        assert_eq!(kpis.weekday_seasonality[6].revenue, 70.0);
        assert_eq!(kpis.weekday_seasonality[1].revenue, 0.0);
        assert_eq!(kpis.weekday_seasonality[1].aov, None);
    }

    #[test]
    fn test_weekly_series_keyed_by_monday() {
        let config = PipelineConfig::default();
        let rows = vec![
            make_row("S1", "North", d(2024, 5, 7), 100.0, 5),  // Tue
            make_row("S1", "North", d(2024, 5, 9), 50.0, 5),   // Thu, same ISO week
            make_row("S1", "North", d(2024, 5, 13), 30.0, 3),  // next Monday
        ];

        let kpis = compute_window_kpis(&rows, &config);

        assert_eq!(kpis.weekly.len(), 2);
        assert_eq!(kpis.weekly[0].week_start, d(2024, 5, 6));
        assert_eq!(kpis.weekly[0].revenue, 150.0);
        assert_eq!(kpis.weekly[1].week_start, d(2024, 5, 13));
    }

    #[test]
    fn test_league_quartiles_descending_by_revenue() {
        let config = PipelineConfig::default();
        let date = d(2024, 5, 1);
        let rows: Vec<EnrichedRecord> = (0..8)
            .map(|i| {
                make_row(
                    &format!("S{i}"),
                    "North",
                    date,
                    1000.0 - 100.0 * i as f64,
                    10,
                )
            })
            .collect();

        let kpis = compute_window_kpis(&rows, &config);

        // 8 stores -> quartile sizes 2/2/2/2, highest revenue first
        let q: Vec<u8> = (0..8)
            .map(|i| {
                kpis.leagues
                    .iter()
                    .find(|l| l.store_id == format!("S{i}"))
                    .unwrap()
                    .revenue_quartile
            })
            .collect();
        assert_eq!(q, vec![1, 1, 2, 2, 3, 3, 4, 4]);

        // monotone: as revenue decreases the quartile never decreases
        for pair in q.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_league_tie_break_is_input_order() {
        let config = PipelineConfig::default();
        let date = d(2024, 5, 1);
        // four stores, all identical: quartiles follow first appearance
        let rows: Vec<EnrichedRecord> = ["S3", "S1", "S4", "S2"]
            .iter()
            .map(|s| make_row(s, "North", date, 500.0, 10))
            .collect();

        let kpis = compute_window_kpis(&rows, &config);

        let quartile = |id: &str| {
            kpis.leagues
                .iter()
                .find(|l| l.store_id == id)
                .unwrap()
                .revenue_quartile
        };
        assert_eq!(quartile("S3"), 1);
        assert_eq!(quartile("S1"), 2);
        assert_eq!(quartile("S4"), 3);
        assert_eq!(quartile("S2"), 4);
    }

    #[test]
    fn test_undefined_aov_ranks_last() {
        let config = PipelineConfig::default();
        let date = d(2024, 5, 1);
        let rows = vec![
            make_row("S1", "North", date, 500.0, 0), // aov undefined
            make_row("S2", "North", date, 100.0, 10),
        ];

        let kpis = compute_window_kpis(&rows, &config);

        let entry = |id: &str| kpis.leagues.iter().find(|l| l.store_id == id).unwrap().clone();
        assert_eq!(entry("S2").aov_quartile, 1);
        assert_eq!(entry("S1").aov_quartile, 2);
        // but S1 still wins on revenue
        assert_eq!(entry("S1").revenue_quartile, 1);
    }

    #[test]
    fn test_ntile_matches_sql_sizing() {
        // 6 rows over 4 buckets -> sizes 2, 2, 1, 1
        let buckets: Vec<u8> = (0..6).map(|p| ntile(6, p, 4)).collect();
        assert_eq!(buckets, vec![1, 1, 2, 2, 3, 4]);

        // fewer rows than buckets -> one per bucket
        let buckets: Vec<u8> = (0..3).map(|p| ntile(3, p, 4)).collect();
        assert_eq!(buckets, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_input_yields_empty_kpis() {
        let config = PipelineConfig::default();
        let kpis = compute_window_kpis(&[], &config);
        assert_eq!(kpis.reference_date, None);
        assert!(kpis.stores.is_empty());
        assert!(kpis.leagues.is_empty());
    }
}
