// CSV ingestion for the three flat input tables

use crate::model::{Dataset, RegionInfo, SalesRecord, StoreMaster};
use log::info;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to parse line {line} of {path}: {source}")]
    Row {
        path: PathBuf,
        line: usize,
        #[source]
        source: csv::Error,
    },
}

/// Load the three input relations. Parse failures in the dimension tables
/// are fatal (they are small, static reference data); sales rows with
/// missing dates load as None and are handled by the cleaner.
pub fn load_dataset(
    regions_path: &Path,
    stores_path: &Path,
    sales_path: &Path,
) -> Result<Dataset, LoaderError> {
    let regions: Vec<RegionInfo> = load_table(regions_path)?;
    let stores: Vec<StoreMaster> = load_table(stores_path)?;
    let sales: Vec<SalesRecord> = load_table(sales_path)?;

    info!(
        "loaded {} regions, {} stores, {} sales rows",
        regions.len(),
        stores.len(),
        sales.len()
    );

    Ok(Dataset {
        regions,
        stores,
        sales,
    })
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LoaderError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| LoaderError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    for (idx, result) in reader.deserialize().enumerate() {
        // line 1 is the header
        let row: T = result.map_err(|source| LoaderError::Row {
            path: path.to_path_buf(),
            line: idx + 2,
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_dataset_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let regions = write_file(
            &dir,
            "regions.csv",
            "region,population,avg_income\nNorth,120000,54000.0\nSouth,80000,47000.5\n",
        );
        let stores = write_file(
            &dir,
            "stores.csv",
            "store_id,city,region,opening_date\nS1,Aurora,North,2023-03-15\nS2,Brio,South,2024-01-02\n",
        );
        let sales = write_file(
            &dir,
            "sales.csv",
            "store_id,date,revenue,transaction_count\nS1,2024-05-01,1250.50,41\nS2,,300.0,10\n",
        );

        let dataset = load_dataset(&regions, &stores, &sales).unwrap();

        assert_eq!(dataset.regions.len(), 2);
        assert_eq!(dataset.stores.len(), 2);
        assert_eq!(dataset.sales.len(), 2);
        assert_eq!(dataset.regions[1].avg_income, 47000.5);
        assert_eq!(dataset.stores[0].store_id, "S1");
        assert_eq!(dataset.sales[0].revenue, 1250.50);
        assert!(dataset.sales[0].date.is_some());
        assert!(
            dataset.sales[1].date.is_none(),
            "empty date field loads as None"
        );
    }

    #[test]
    fn test_missing_file_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let regions = write_file(&dir, "regions.csv", "region,population,avg_income\n");
        let stores = write_file(&dir, "stores.csv", "store_id,city,region,opening_date\n");
        let missing = dir.path().join("nope.csv");

        let err = load_dataset(&regions, &stores, &missing).unwrap_err();
        assert!(matches!(err, LoaderError::Open { .. }));
    }

    #[test]
    fn test_malformed_dimension_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let regions = write_file(
            &dir,
            "regions.csv",
            "region,population,avg_income\nNorth,not_a_number,54000.0\n",
        );
        let stores = write_file(&dir, "stores.csv", "store_id,city,region,opening_date\n");
        let sales = write_file(&dir, "sales.csv", "store_id,date,revenue,transaction_count\n");

        let err = load_dataset(&regions, &stores, &sales).unwrap_err();
        match err {
            LoaderError::Row { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Row error, got {other:?}"),
        }
    }
}
