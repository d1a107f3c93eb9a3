// Risk Engine - regional peer benchmarks, z-scores, watchlist classification
//
// Score shape: weighted sum of inverted, clamped z-scores squashed through
// the logistic, so 50.0 marks "at the regional mean" and higher is worse.

use crate::config::PipelineConfig;
use crate::kpi::{LeagueEntry, StoreWindowAggregate};
use crate::stats::{logistic, mean, percentile, population_std_dev};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// BENCHMARKS & RECORDS
// ============================================================================

/// Peer moments per region, used only as z-score denominators. Population
/// standard deviation, not sample. AOV moments are computed over the stores
/// with a defined AOV and are None when there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBenchmark {
    pub region: String,
    pub store_count: usize,
    pub revenue_mean: f64,
    pub revenue_std_dev: f64,
    pub transactions_mean: f64,
    pub transactions_std_dev: f64,
    pub aov_mean: Option<f64>,
    pub aov_std_dev: Option<f64>,
}

/// Scored store over the trailing window. z-scores are stored unclamped;
/// clamping happens only inside the weighted sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub store_id: String,
    pub region: String,
    pub revenue_sum: f64,
    pub transaction_sum: i64,
    pub aov: Option<f64>,
    /// None when the region stddev is 0 or the store metric is undefined.
    pub z_revenue: Option<f64>,
    pub z_transactions: Option<f64>,
    pub z_aov: Option<f64>,
    pub raw_risk: f64,
    /// 100 * logistic(raw_risk), rounded to one decimal.
    pub risk_score: f64,
    /// Revenue quartile within the region (1 = top).
    pub revenue_quartile: u8,
    pub is_watchlist: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRiskSummary {
    pub region: String,
    pub store_count: usize,
    pub avg_risk_score: Option<f64>,
    pub watchlist_count: usize,
    pub watchlist_pct: f64,
    /// 10th/90th percentile of store window revenue within the region.
    pub revenue_p10: Option<f64>,
    pub revenue_p90: Option<f64>,
    /// p90 / p10; None when the 10th percentile is 0.
    pub dispersion_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskAssessment {
    pub benchmarks: Vec<RegionBenchmark>,
    pub records: Vec<RiskRecord>,
    pub region_summaries: Vec<RegionRiskSummary>,
}

// ============================================================================
// RISK ENGINE
// ============================================================================

pub struct RiskEngine {
    pub weight_revenue: f64,
    pub weight_transactions: f64,
    pub weight_aov: f64,
    pub z_clamp: f64,
    pub risk_threshold: f64,
    pub z_threshold: f64,
}

impl RiskEngine {
    pub fn new() -> Self {
        RiskEngine {
            weight_revenue: 0.5,
            weight_transactions: 0.3,
            weight_aov: 0.2,
            z_clamp: 3.0,
            risk_threshold: 70.0,
            z_threshold: -0.5,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        RiskEngine {
            weight_revenue: config.risk_weight_revenue,
            weight_transactions: config.risk_weight_transactions,
            weight_aov: config.risk_weight_aov,
            z_clamp: config.z_clamp,
            risk_threshold: config.watchlist_risk_threshold,
            z_threshold: config.watchlist_z_threshold,
        }
    }

    /// Score every store aggregate against its regional peers.
    pub fn assess(
        &self,
        stores: &[StoreWindowAggregate],
        leagues: &[LeagueEntry],
    ) -> RiskAssessment {
        let benchmarks = compute_benchmarks(stores);
        let benchmark_index: HashMap<&str, &RegionBenchmark> =
            benchmarks.iter().map(|b| (b.region.as_str(), b)).collect();
        let revenue_quartiles: HashMap<&str, u8> = leagues
            .iter()
            .map(|l| (l.store_id.as_str(), l.revenue_quartile))
            .collect();

        let mut records = Vec::with_capacity(stores.len());
        for store in stores {
            let bench = match benchmark_index.get(store.region.as_str()) {
                Some(bench) => *bench,
                None => continue,
            };

            let z_revenue = z_score(store.revenue_sum, bench.revenue_mean, bench.revenue_std_dev);
            let z_transactions = z_score(
                store.transaction_sum as f64,
                bench.transactions_mean,
                bench.transactions_std_dev,
            );
            let z_aov = match (store.aov, bench.aov_mean, bench.aov_std_dev) {
                (Some(value), Some(mean), Some(std_dev)) => z_score(value, mean, std_dev),
                _ => None,
            };

            // missing z contributes 0 to the weighted sum only
            let raw_risk = self.weight_revenue * -self.clamped(z_revenue)
                + self.weight_transactions * -self.clamped(z_transactions)
                + self.weight_aov * -self.clamped(z_aov);
            let risk_score = round1(100.0 * logistic(raw_risk));

            let revenue_quartile = revenue_quartiles
                .get(store.store_id.as_str())
                .copied()
                .unwrap_or(0);

            // first branch: scored risk plus bottom revenue quartile;
            // second branch: raw (unclamped, None -> 0) z-scores
            let is_watchlist = (risk_score >= self.risk_threshold && revenue_quartile == 4)
                || (z_transactions.unwrap_or(0.0) < self.z_threshold
                    && z_aov.unwrap_or(0.0) < self.z_threshold);

            records.push(RiskRecord {
                store_id: store.store_id.clone(),
                region: store.region.clone(),
                revenue_sum: store.revenue_sum,
                transaction_sum: store.transaction_sum,
                aov: store.aov,
                z_revenue,
                z_transactions,
                z_aov,
                raw_risk,
                risk_score,
                revenue_quartile,
                is_watchlist,
            });
        }

        let region_summaries = summarize_regions(&records);
        info!(
            "risk: scored {} stores, {} on watchlist",
            records.len(),
            records.iter().filter(|r| r.is_watchlist).count()
        );

        RiskAssessment {
            benchmarks,
            records,
            region_summaries,
        }
    }

    fn clamped(&self, z: Option<f64>) -> f64 {
        z.map(|z| z.clamp(-self.z_clamp, self.z_clamp)).unwrap_or(0.0)
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn z_score(value: f64, mean: f64, std_dev: f64) -> Option<f64> {
    if std_dev > 0.0 {
        Some((value - mean) / std_dev)
    } else {
        None
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn compute_benchmarks(stores: &[StoreWindowAggregate]) -> Vec<RegionBenchmark> {
    let mut by_region: BTreeMap<&str, Vec<&StoreWindowAggregate>> = BTreeMap::new();
    for s in stores {
        by_region.entry(s.region.as_str()).or_default().push(s);
    }

    by_region
        .into_iter()
        .map(|(region, members)| {
            let revenues: Vec<f64> = members.iter().map(|s| s.revenue_sum).collect();
            let transactions: Vec<f64> =
                members.iter().map(|s| s.transaction_sum as f64).collect();
            let aovs: Vec<f64> = members.iter().filter_map(|s| s.aov).collect();

            RegionBenchmark {
                region: region.to_string(),
                store_count: members.len(),
                revenue_mean: mean(&revenues).unwrap_or(0.0),
                revenue_std_dev: population_std_dev(&revenues).unwrap_or(0.0),
                transactions_mean: mean(&transactions).unwrap_or(0.0),
                transactions_std_dev: population_std_dev(&transactions).unwrap_or(0.0),
                aov_mean: mean(&aovs),
                aov_std_dev: population_std_dev(&aovs),
            }
        })
        .collect()
}

fn summarize_regions(records: &[RiskRecord]) -> Vec<RegionRiskSummary> {
    let mut by_region: BTreeMap<&str, Vec<&RiskRecord>> = BTreeMap::new();
    for r in records {
        by_region.entry(r.region.as_str()).or_default().push(r);
    }

    by_region
        .into_iter()
        .map(|(region, members)| {
            let scores: Vec<f64> = members.iter().map(|r| r.risk_score).collect();
            let revenues: Vec<f64> = members.iter().map(|r| r.revenue_sum).collect();
            let watchlist_count = members.iter().filter(|r| r.is_watchlist).count();

            let revenue_p10 = percentile(&revenues, 10.0);
            let revenue_p90 = percentile(&revenues, 90.0);
            let dispersion_ratio = match (revenue_p10, revenue_p90) {
                (Some(p10), Some(p90)) if p10 != 0.0 => Some(p90 / p10),
                _ => None,
            };

            RegionRiskSummary {
                region: region.to_string(),
                store_count: members.len(),
                avg_risk_score: mean(&scores),
                watchlist_count,
                watchlist_pct: 100.0 * watchlist_count as f64 / members.len() as f64,
                revenue_p10,
                revenue_p90,
                dispersion_ratio,
            }
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
