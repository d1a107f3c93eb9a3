// Report assembly - the full result bundle the dashboard consumes
//
// Everything that can be undefined serializes as an explicit null, and all
// table/board ordering is fixed (sort key plus id tie-break) so identical
// inputs produce a byte-identical bundle.

use crate::cleaner::DataQualityCounts;
use crate::cohort::{CohortReport, RampPoint, TtbBenchmark, TtbSummary};
use crate::config::PipelineConfig;
use crate::kpi::{
    DailyPoint, LeagueEntry, NetworkKpis, RegionKpis, WeekdayKpis, WeeklyPoint, WindowKpis,
};
use crate::model::{AgeBucket, CleanedRecord, Dimensions, EnrichedRecord};
use crate::risk::{RegionRiskSummary, RiskAssessment, RiskRecord};
use crate::stats::{linear_regression, Regression};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

// ============================================================================
// BUNDLE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub reference_date: Option<NaiveDate>,
    pub window_start: Option<NaiveDate>,
    pub window_days: i64,
    /// Echo of the effective configuration for the consuming dashboard.
    pub config: PipelineConfig,
}

/// One ranked board row. Boards only list entities whose metric is defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardEntry {
    pub id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleKpis {
    pub bucket: AgeBucket,
    pub rows: usize,
    pub stores: usize,
    pub revenue: f64,
    pub transactions: i64,
    pub aov: Option<f64>,
}

/// Per-region leader board plus its watchlist members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBoard {
    pub region: String,
    pub leaders: Vec<BoardEntry>,
    pub watchlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBundle {
    pub run: RunInfo,
    pub data_quality: DataQualityCounts,
    /// Every flagged row, excluded or retained, with raw and capped revenue.
    pub anomalies: Vec<CleanedRecord>,
    pub network: NetworkKpis,
    pub regions: Vec<RegionKpis>,
    pub top_regions_by_aov: Vec<BoardEntry>,
    pub bottom_regions_by_aov: Vec<BoardEntry>,
    pub top_stores_by_aov: Vec<BoardEntry>,
    pub bottom_stores_by_aov: Vec<BoardEntry>,
    pub top_stores_by_z_revenue: Vec<BoardEntry>,
    pub bottom_stores_by_z_revenue: Vec<BoardEntry>,
    pub weekday_seasonality: Vec<WeekdayKpis>,
    pub daily_series: Vec<DailyPoint>,
    pub weekly_series: Vec<WeeklyPoint>,
    pub store_leagues: Vec<LeagueEntry>,
    pub lifecycle: Vec<LifecycleKpis>,
    /// Region avg_income against region window AOV.
    pub income_aov_regression: Regression,
    pub ramp_by_cohort: Vec<RampPoint>,
    pub ramp_by_region: Vec<RampPoint>,
    pub ttb_benchmark: TtbBenchmark,
    pub ttb_by_region: Vec<TtbSummary>,
    pub ttb_by_cohort: Vec<TtbSummary>,
    pub store_risk: Vec<RiskRecord>,
    pub region_risk: Vec<RegionRiskSummary>,
    pub region_boards: Vec<RegionBoard>,
    /// SHA-256 of the bundle body; identical inputs reproduce it exactly.
    pub fingerprint: String,
}

impl ReportBundle {
    /// Compute the content fingerprint over the canonical JSON body.
    pub fn seal(&mut self) -> Result<(), serde_json::Error> {
        self.fingerprint = String::new();
        let body = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&body);
        self.fingerprint = format!("{:x}", hasher.finalize());
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} core rows | {} regions, {} active stores | {} anomalies | {} stores on watchlist",
            self.data_quality.kept_rows,
            self.regions.len(),
            self.network.active_stores,
            self.anomalies.len(),
            self.store_risk.iter().filter(|r| r.is_watchlist).count(),
        )
    }
}

// ============================================================================
// ASSEMBLY
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub fn assemble(
    config: &PipelineConfig,
    dims: &Dimensions,
    cleaned: &[CleanedRecord],
    counts: &DataQualityCounts,
    enriched: &[EnrichedRecord],
    window: &WindowKpis,
    risk: &RiskAssessment,
    cohort: &CohortReport,
) -> ReportBundle {
    let n = config.board_size;

    let anomalies: Vec<CleanedRecord> = cleaned
        .iter()
        .filter(|r| r.flags.any())
        .cloned()
        .collect();

    let region_aov: Vec<BoardEntry> = window
        .regions
        .iter()
        .filter_map(|r| {
            r.aov.map(|aov| BoardEntry {
                id: r.region.clone(),
                value: aov,
            })
        })
        .collect();
    let store_aov: Vec<BoardEntry> = window
        .stores
        .iter()
        .filter_map(|s| {
            s.aov.map(|aov| BoardEntry {
                id: s.store_id.clone(),
                value: aov,
            })
        })
        .collect();
    let store_z: Vec<BoardEntry> = risk
        .records
        .iter()
        .filter_map(|r| {
            r.z_revenue.map(|z| BoardEntry {
                id: r.store_id.clone(),
                value: z,
            })
        })
        .collect();

    let lifecycle = lifecycle_table(enriched, window);
    let income_aov_regression = income_aov_regression(dims, &window.regions);
    let region_boards = region_boards(window, risk, n);

    ReportBundle {
        run: RunInfo {
            reference_date: window.reference_date,
            window_start: window.window_start,
            window_days: config.window_days,
            config: config.clone(),
        },
        data_quality: counts.clone(),
        anomalies,
        network: window.network.clone(),
        regions: window.regions.clone(),
        top_regions_by_aov: top_n(region_aov.clone(), n),
        bottom_regions_by_aov: bottom_n(region_aov, n),
        top_stores_by_aov: top_n(store_aov.clone(), n),
        bottom_stores_by_aov: bottom_n(store_aov, n),
        top_stores_by_z_revenue: top_n(store_z.clone(), n),
        bottom_stores_by_z_revenue: bottom_n(store_z, n),
        weekday_seasonality: window.weekday_seasonality.clone(),
        daily_series: window.daily.clone(),
        weekly_series: window.weekly.clone(),
        store_leagues: window.leagues.clone(),
        lifecycle,
        income_aov_regression,
        ramp_by_cohort: cohort.ramp_by_cohort.clone(),
        ramp_by_region: cohort.ramp_by_region.clone(),
        ttb_benchmark: cohort.benchmark.clone(),
        ttb_by_region: cohort.ttb_by_region.clone(),
        ttb_by_cohort: cohort.ttb_by_cohort.clone(),
        store_risk: risk.records.clone(),
        region_risk: risk.region_summaries.clone(),
        region_boards,
        fingerprint: String::new(),
    }
}

fn top_n(mut entries: Vec<BoardEntry>, n: usize) -> Vec<BoardEntry> {
    entries.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    entries.truncate(n);
    entries
}

fn bottom_n(mut entries: Vec<BoardEntry>, n: usize) -> Vec<BoardEntry> {
    entries.sort_by(|a, b| {
        a.value
            .partial_cmp(&b.value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    entries.truncate(n);
    entries
}

/// KPI rollup per lifecycle bucket over the window rows. All five buckets
/// are always emitted so the table keeps a stable shape.
fn lifecycle_table(enriched: &[EnrichedRecord], window: &WindowKpis) -> Vec<LifecycleKpis> {
    let (start, end) = match (window.window_start, window.reference_date) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return AgeBucket::ALL
                .iter()
                .map(|&bucket| LifecycleKpis {
                    bucket,
                    rows: 0,
                    stores: 0,
                    revenue: 0.0,
                    transactions: 0,
                    aov: None,
                })
                .collect()
        }
    };

    let mut acc: HashMap<AgeBucket, (usize, HashSet<&str>, f64, i64)> = HashMap::new();
    for row in enriched {
        if row.date < start || row.date > end {
            continue;
        }
        let slot = acc
            .entry(row.age_bucket)
            .or_insert_with(|| (0, HashSet::new(), 0.0, 0));
        slot.0 += 1;
        slot.1.insert(row.store_id.as_str());
        slot.2 += row.revenue;
        slot.3 += row.transaction_count;
    }

    AgeBucket::ALL
        .iter()
        .map(|&bucket| match acc.get(&bucket) {
            Some((rows, stores, revenue, transactions)) => LifecycleKpis {
                bucket,
                rows: *rows,
                stores: stores.len(),
                revenue: *revenue,
                transactions: *transactions,
                aov: if *transactions > 0 {
                    Some(revenue / *transactions as f64)
                } else {
                    None
                },
            },
            None => LifecycleKpis {
                bucket,
                rows: 0,
                stores: 0,
                revenue: 0.0,
                transactions: 0,
                aov: None,
            },
        })
        .collect()
}

/// Region average income against region window AOV; regions without a
/// defined AOV drop out of the sample.
fn income_aov_regression(dims: &Dimensions, regions: &[RegionKpis]) -> Regression {
    let points: Vec<(f64, f64)> = regions
        .iter()
        .filter_map(|r| {
            let aov = r.aov?;
            let info = dims.region(&r.region)?;
            Some((info.avg_income, aov))
        })
        .collect();
    linear_regression(&points)
}

fn region_boards(window: &WindowKpis, risk: &RiskAssessment, n: usize) -> Vec<RegionBoard> {
    let mut watchlists: HashMap<&str, Vec<&RiskRecord>> = HashMap::new();
    for record in risk.records.iter().filter(|r| r.is_watchlist) {
        watchlists.entry(record.region.as_str()).or_default().push(record);
    }

    window
        .regions
        .iter()
        .map(|region| {
            let leaders = top_n(
                window
                    .stores
                    .iter()
                    .filter(|s| s.region == region.region)
                    .map(|s| BoardEntry {
                        id: s.store_id.clone(),
                        value: s.revenue_sum,
                    })
                    .collect(),
                n,
            );

            let mut members: Vec<&RiskRecord> = watchlists
                .get(region.region.as_str())
                .cloned()
                .unwrap_or_default();
            members.sort_by(|a, b| {
                b.risk_score
                    .partial_cmp(&a.risk_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.store_id.cmp(&b.store_id))
            });

            RegionBoard {
                region: region.region.clone(),
                leaders,
                watchlist: members.iter().map(|r| r.store_id.clone()).collect(),
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
