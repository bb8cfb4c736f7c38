//! Dataset I/O for CSV and Parquet files

use std::path::Path;

use anyhow::{Context, Result};
use polars::prelude::*;

/// Rows inspected when inferring CSV column types
pub const DEFAULT_INFER_SCHEMA_LENGTH: usize = 10_000;

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Load a dataset (CSV or Parquet, by extension) into memory
pub fn load_dataset(path: &Path, infer_schema_length: usize) -> Result<DataFrame> {
    let extension = extension_of(path);

    let lf = match extension.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(Some(infer_schema_length))
            .finish()
            .with_context(|| format!("Failed to load CSV file: {}", path.display()))?,
        "parquet" => LazyFrame::scan_parquet(path, Default::default())
            .with_context(|| format!("Failed to load Parquet file: {}", path.display()))?,
        _ => anyhow::bail!(
            "Unsupported file format: {}. Supported formats: csv, parquet",
            extension
        ),
    };

    let df = lf
        .collect()
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
    log::debug!("Loaded {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Write a dataset (CSV or Parquet, by extension)
pub fn save_dataset(df: &mut DataFrame, path: &Path) -> Result<()> {
    let extension = extension_of(path);

    match extension.as_str() {
        "csv" => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            CsvWriter::new(&mut file)
                .finish(df)
                .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;
        }
        "parquet" => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            ParquetWriter::new(file)
                .finish(df)
                .with_context(|| format!("Failed to write Parquet file: {}", path.display()))?;
        }
        _ => anyhow::bail!(
            "Unsupported output format: {}. Supported formats: csv, parquet",
            extension
        ),
    }

    Ok(())
}

/// Rows, columns and estimated in-memory size in MB
pub fn dataset_stats(df: &DataFrame) -> (usize, usize, f64) {
    let (rows, cols) = df.shape();
    let memory_mb = df.estimated_size() as f64 / (1024.0 * 1024.0);
    (rows, cols, memory_mb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_csv_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("portfolio.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "score,region,balance").unwrap();
        writeln!(file, "1.5,N,100").unwrap();
        writeln!(file, "2.5,S,200").unwrap();
        drop(file);

        let mut df = load_dataset(&path, DEFAULT_INFER_SCHEMA_LENGTH).unwrap();
        assert_eq!(df.shape(), (2, 3));

        let out = dir.path().join("scored.parquet");
        save_dataset(&mut df, &out).unwrap();
        let reloaded = load_dataset(&out, DEFAULT_INFER_SCHEMA_LENGTH).unwrap();
        assert_eq!(reloaded.shape(), (2, 3));
        assert_eq!(dataset_stats(&reloaded).0, 2);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_dataset(Path::new("portfolio.xlsx"), 100).unwrap_err();
        assert!(err.to_string().contains("Unsupported file format"));

        let mut df = df! { "a" => [1i64] }.unwrap();
        assert!(save_dataset(&mut df, Path::new("out.json")).is_err());
    }
}
