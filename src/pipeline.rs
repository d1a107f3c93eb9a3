// Pipeline - staged composition over immutable snapshots
//
// raw sales -> cleaned rows -> enriched rows -> window rollups -> risk /
// cohort views -> sealed report bundle. Each stage is a pure function of
// the previous snapshot, so a re-run over identical inputs is deterministic
// down to the serialized bytes.

use crate::cleaner::CleaningEngine;
use crate::cohort::CohortAnalyzer;
use crate::config::PipelineConfig;
use crate::enricher;
use crate::kpi;
use crate::model::{Dataset, Dimensions};
use crate::report::{self, ReportBundle};
use crate::risk::RiskEngine;
use anyhow::Result;
use log::info;

/// Run the whole batch recompute and return the sealed report bundle.
pub fn run(dataset: &Dataset, config: &PipelineConfig) -> Result<ReportBundle> {
    config.validate()?;

    let dims = Dimensions::build(&dataset.stores, &dataset.regions);
    info!(
        "dimensions: {} stores across {} regions",
        dims.stores.len(),
        dims.regions.len()
    );

    let outcome = CleaningEngine::from_config(config).clean(&dataset.sales, &dims);
    let enriched = enricher::enrich(&outcome.rows, &dims, config.age_bucket_days);
    let window = kpi::compute_window_kpis(&enriched, config);
    let risk = RiskEngine::from_config(config).assess(&window.stores, &window.leagues);
    let cohort = CohortAnalyzer::new().analyze(&enriched, &dims, &window.stores);

    let mut bundle = report::assemble(
        config,
        &dims,
        &outcome.rows,
        &outcome.counts,
        &enriched,
        &window,
        &risk,
        &cohort,
    );
    bundle.seal()?;

    info!("pipeline complete: {}", bundle.summary());
    Ok(bundle)
}
