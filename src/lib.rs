// Storebench - retail store-sales analytics pipeline
// Cleans a daily sales dataset, derives KPIs, benchmarks stores against
// regional peers and produces the ranked/segmented bundles a dashboard
// consumes.

pub mod cleaner;
pub mod cohort;
pub mod config;
pub mod enricher;
pub mod kpi;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod risk;
pub mod stats;

// Re-export commonly used types
pub use cleaner::{CleanOutcome, CleaningEngine, DataQualityCounts};
pub use cohort::{
    CohortAnalyzer, CohortReport, CohortWeek, RampPoint, StoreTtb, TtbBenchmark, TtbSummary,
};
pub use config::{ConfigError, PipelineConfig};
pub use kpi::{
    DailyPoint, LeagueEntry, NetworkKpis, RegionKpis, StoreWindowAggregate, WeekdayKpis,
    WeeklyPoint, WindowKpis,
};
pub use loader::{load_dataset, LoaderError};
pub use model::{
    AgeBucket, AnomalyFlags, CleanedRecord, Dataset, Dimensions, EnrichedRecord, RegionInfo,
    SalesRecord, StoreMaster,
};
pub use report::{BoardEntry, LifecycleKpis, RegionBoard, ReportBundle, RunInfo};
pub use risk::{RegionBenchmark, RegionRiskSummary, RiskAssessment, RiskEngine, RiskRecord};
pub use stats::Regression;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
