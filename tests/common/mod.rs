//! Shared test utilities and fixture generators

#![allow(dead_code)]

use polars::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

use tiering::engine::{
    AutoBandSettings, EngineConfig, FrameDataProvider, IterationsRepository, LossRateType, RiskSegment,
    RiskSegmentDetails,
};

/// A portfolio whose risk rises with `score`
///
/// - `score`: 0..rows, the DLR bad rate of a row is `3 * score / 1000`
/// - `income`: falls as score rises
/// - `region`: four categories cycling A, B, C, D
/// - `balance` / `bad_balance`: DLR denominator and numerator
/// - `count` / `bad_count`: ULR denominator and numerator (top fifth is bad)
pub fn create_portfolio_dataframe(rows: usize) -> DataFrame {
    let score: Vec<f64> = (0..rows).map(|i| i as f64).collect();
    let income: Vec<f64> = (0..rows).map(|i| (rows - i) as f64 * 10.0).collect();
    let region: Vec<&str> = (0..rows).map(|i| ["A", "B", "C", "D"][i % 4]).collect();
    let bad_balance: Vec<f64> = score.iter().map(|s| 3.0 * s).collect();
    let bad_count: Vec<f64> = (0..rows)
        .map(|i| if i * 5 >= rows * 4 { 1.0 } else { 0.0 })
        .collect();

    df! {
        "score" => score,
        "income" => income,
        "region" => region,
        "balance" => vec![1000.0f64; rows],
        "bad_balance" => bad_balance,
        "count" => vec![1.0f64; rows],
        "bad_count" => bad_count,
    }
    .unwrap()
}

pub fn portfolio_provider(rows: usize) -> FrameDataProvider {
    FrameDataProvider::from_frame("portfolio", create_portfolio_dataframe(rows)).unwrap()
}

/// Repository over a 100-row portfolio with default settings
pub fn create_repository() -> IterationsRepository {
    create_repository_with(EngineConfig::default())
}

pub fn create_repository_with(config: EngineConfig) -> IterationsRepository {
    IterationsRepository::new(config, Box::new(portfolio_provider(100))).unwrap()
}

/// Risk segment table with the given upper rates, named S0, S1, ...
pub fn details_with_caps(caps: &[f64]) -> RiskSegmentDetails {
    let rows = caps
        .iter()
        .enumerate()
        .map(|(i, cap)| RiskSegment::new(i, format!("S{}", i), *cap))
        .collect();
    RiskSegmentDetails::new(rows).unwrap()
}

/// Settings whose risk scalar factor is exactly one
pub fn unit_settings() -> AutoBandSettings {
    AutoBandSettings {
        loss_rate: LossRateType::Dlr,
        portfolio_scalar: 1.0,
        months_on_book: 12.0,
        max_iterations: 100,
    }
}

/// Write the portfolio as CSV into a temp directory
pub fn create_temp_csv(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("portfolio.csv");
    let mut df = create_portfolio_dataframe(rows);
    let mut file = std::fs::File::create(&path).unwrap();
    CsvWriter::new(&mut file).finish(&mut df).unwrap();
    (temp_dir, path)
}

/// Write the portfolio as Parquet into a temp directory
pub fn create_temp_parquet(rows: usize) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("portfolio.parquet");
    let mut df = create_portfolio_dataframe(rows);
    let file = std::fs::File::create(&path).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
    (temp_dir, path)
}

/// Write a TOML configuration file into `dir`
pub fn write_config(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("tiering.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{}", text).unwrap();
    path
}
