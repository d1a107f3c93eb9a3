// Core data model - raw tables, cleaned/enriched rows, dimension indexes

use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

// ============================================================================
// RAW INPUT TABLES
// ============================================================================

/// One raw daily sales row. Immutable input; cleaning produces new snapshots
/// rather than mutating these in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesRecord {
    pub store_id: String,

    /// Missing or unparseable dates load as None and are flagged downstream.
    #[serde(deserialize_with = "de_opt_date", default)]
    pub date: Option<NaiveDate>,

    pub revenue: f64,

    pub transaction_count: i64,
}

/// Static store reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMaster {
    pub store_id: String,
    pub city: String,
    pub region: String,
    pub opening_date: NaiveDate,
}

/// Static region reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region: String,
    pub population: i64,
    pub avg_income: f64,
}

/// The three flat input relations, loaded wholesale per run.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub regions: Vec<RegionInfo>,
    pub stores: Vec<StoreMaster>,
    pub sales: Vec<SalesRecord>,
}

fn de_opt_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            Ok(date) => Ok(Some(date)),
            Err(_) => {
                warn!("unparseable sales date {:?}, treating as missing", s);
                Ok(None)
            }
        },
    }
}

// ============================================================================
// DIMENSION INDEXES
// ============================================================================

/// Indexed store/region lookups, built once per run instead of repeated
/// linear scans. A store row whose region is unknown stays in the index;
/// the cleaner counts its sales rows as orphan-region references.
#[derive(Debug, Clone)]
pub struct Dimensions {
    pub stores: HashMap<String, StoreMaster>,
    pub regions: HashMap<String, RegionInfo>,
}

impl Dimensions {
    pub fn build(stores: &[StoreMaster], regions: &[RegionInfo]) -> Self {
        let mut region_index: HashMap<String, RegionInfo> = HashMap::new();
        for r in regions {
            if region_index.insert(r.region.clone(), r.clone()).is_some() {
                warn!("duplicate region key {:?}, keeping the last row", r.region);
            }
        }

        let mut store_index: HashMap<String, StoreMaster> = HashMap::new();
        for s in stores {
            if !region_index.contains_key(&s.region) {
                warn!(
                    "store {:?} references unknown region {:?}",
                    s.store_id, s.region
                );
            }
            if store_index.insert(s.store_id.clone(), s.clone()).is_some() {
                warn!("duplicate store key {:?}, keeping the last row", s.store_id);
            }
        }

        Dimensions {
            stores: store_index,
            regions: region_index,
        }
    }

    pub fn store(&self, store_id: &str) -> Option<&StoreMaster> {
        self.stores.get(store_id)
    }

    pub fn region(&self, region: &str) -> Option<&RegionInfo> {
        self.regions.get(region)
    }

    /// Stores whose region resolves, in other words the joinable universe.
    pub fn joinable_stores(&self) -> impl Iterator<Item = &StoreMaster> {
        self.stores
            .values()
            .filter(|s| self.regions.contains_key(&s.region))
    }
}

// ============================================================================
// ANOMALY FLAGS
// ============================================================================

/// Per-row anomaly flags. A row keeps its flags whether or not it stays in
/// the core row set; `CleanedRecord::keep_core` decides inclusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFlags {
    /// transaction_count < 0
    pub tx_negative: bool,
    /// date missing
    pub date_null: bool,
    /// transaction_count == 0 with positive revenue (test/data-entry noise)
    pub tx0_revpos: bool,
    /// transaction_count > 0 with revenue <= 0 (legitimate returns day)
    pub rev_nonpos_txpos: bool,
    /// revenue was capped by winsorization
    pub revenue_capped: bool,
    /// lost the (store_id, date) dedup
    pub duplicate_dropped: bool,
}

impl AnomalyFlags {
    pub fn any(&self) -> bool {
        self.tx_negative
            || self.date_null
            || self.tx0_revpos
            || self.rev_nonpos_txpos
            || self.revenue_capped
            || self.duplicate_dropped
    }

    /// Flags that exclude a row from the core set. Returns days
    /// (rev_nonpos_txpos) and capped rows stay in.
    pub fn excludes(&self) -> bool {
        self.tx_negative || self.date_null || self.tx0_revpos || self.duplicate_dropped
    }
}

// ============================================================================
// CLEANED / ENRICHED ROWS
// ============================================================================

/// A sales row after join, flagging, winsorization and dedup. All joined
/// rows are kept here (the anomalies view needs the excluded ones);
/// `keep_core` marks the rows every downstream KPI consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub store_id: String,
    pub date: Option<NaiveDate>,
    pub region: String,
    pub city: String,
    /// Revenue after winsorization capping.
    pub revenue: f64,
    /// Revenue as loaded, before capping.
    pub revenue_raw: f64,
    pub transaction_count: i64,
    pub flags: AnomalyFlags,
    pub keep_core: bool,
}

/// Lifecycle bucket by store age at the time of the sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "pre-open")]
    PreOpen,
    #[serde(rename = "0-6m")]
    M0to6,
    #[serde(rename = "6-12m")]
    M6to12,
    #[serde(rename = "1-2y")]
    Y1to2,
    #[serde(rename = "2y+")]
    Y2Plus,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 5] = [
        AgeBucket::PreOpen,
        AgeBucket::M0to6,
        AgeBucket::M6to12,
        AgeBucket::Y1to2,
        AgeBucket::Y2Plus,
    ];

    /// Classify from the raw (unclamped) age in days. `boundaries` are the
    /// three inner cutoffs, ascending; zero always separates pre-open.
    pub fn classify(raw_age_days: i64, boundaries: [i64; 3]) -> AgeBucket {
        if raw_age_days < 0 {
            AgeBucket::PreOpen
        } else if raw_age_days < boundaries[0] {
            AgeBucket::M0to6
        } else if raw_age_days < boundaries[1] {
            AgeBucket::M6to12
        } else if raw_age_days < boundaries[2] {
            AgeBucket::Y1to2
        } else {
            AgeBucket::Y2Plus
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgeBucket::PreOpen => "pre-open",
            AgeBucket::M0to6 => "0-6m",
            AgeBucket::M6to12 => "6-12m",
            AgeBucket::Y1to2 => "1-2y",
            AgeBucket::Y2Plus => "2y+",
        }
    }
}

/// A core row joined to its dimensions plus the derived per-row fields.
/// Only rows that survived cleaning are enriched, so `date` is concrete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub store_id: String,
    pub date: NaiveDate,
    pub region: String,
    pub city: String,
    pub revenue: f64,
    pub transaction_count: i64,
    /// revenue / transaction_count; None when transaction_count == 0.
    pub aov: Option<f64>,
    /// Days since opening, clamped at zero.
    pub store_age_days: i64,
    pub age_bucket: AgeBucket,
    /// revenue / region population; None when population <= 0.
    pub revenue_per_capita: Option<f64>,
    pub flags: AnomalyFlags,
    pub keep_core: bool,
}
