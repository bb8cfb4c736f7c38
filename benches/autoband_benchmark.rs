//! Benchmark of single- and double-variable auto-banding
//!
//! Run with: cargo bench --bench autoband_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use polars::prelude::*;
use rand::prelude::*;
use rand::SeedableRng;

use tiering::engine::{
    create_auto_bands, AutoBandSettings, BandingInput, EngineConfig, FrameDataProvider, IterationsRepository,
    LossRateType, NewIteration, RiskSegmentDetails, Variable, VariableType,
};

/// Synthetic portfolio where the bad balance rises with `score` and falls with `income`
fn generate_portfolio(n_rows: usize, seed: u64) -> DataFrame {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let score: Vec<f64> = (0..n_rows).map(|_| (rng.gen::<f64>() * 1000.0).round()).collect();
    let income: Vec<f64> = (0..n_rows).map(|_| (rng.gen::<f64>() * 200.0).round() * 500.0).collect();
    let balance: Vec<f64> = (0..n_rows).map(|_| 500.0 + rng.gen::<f64>() * 9500.0).collect();
    let bad_balance: Vec<f64> = (0..n_rows)
        .map(|i| {
            let risk = 0.2 * score[i] / 1000.0 + 0.05 * (1.0 - income[i] / 100_000.0);
            if rng.gen::<f64>() < risk {
                balance[i]
            } else {
                0.0
            }
        })
        .collect();
    let bad_count: Vec<f64> = bad_balance.iter().map(|b| if *b > 0.0 { 1.0 } else { 0.0 }).collect();

    df! {
        "score" => score,
        "income" => income,
        "balance" => balance,
        "bad_balance" => bad_balance,
        "count" => vec![1.0f64; n_rows],
        "bad_count" => bad_count,
    }
    .expect("Failed to create DataFrame")
}

fn numeric_column(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    df.column(name)
        .expect("column exists")
        .f64()
        .expect("float column")
        .into_iter()
        .collect()
}

/// Numeric single-variable banding for growing portfolios
fn benchmark_single_variable(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_variable_autoband");
    let details = RiskSegmentDetails::standard();
    let settings = AutoBandSettings::from_config(&EngineConfig::default(), LossRateType::Dlr, 1.0);

    for n_rows in [10_000, 50_000, 100_000] {
        let df = generate_portfolio(n_rows, 42);
        let variable = Variable::numeric("score", numeric_column(&df, "score"));
        let numerator = numeric_column(&df, "bad_balance");
        let denominator = numeric_column(&df, "balance");
        group.throughput(Throughput::Elements(n_rows as u64));

        group.bench_with_input(BenchmarkId::new("score", n_rows), &variable, |b, variable| {
            b.iter(|| {
                let input = BandingInput::new(variable, &numerator, &denominator).expect("aligned columns");
                let _ = create_auto_bands(black_box(&input), black_box(&details), black_box(&settings));
            });
        });
    }

    group.finish();
}

/// Root on score refined by income through the repository
fn benchmark_double_variable(c: &mut Criterion) {
    let mut group = c.benchmark_group("double_variable_autoband");
    group.sample_size(20);

    for n_rows in [10_000, 50_000] {
        let df = generate_portfolio(n_rows, 7);
        group.throughput(Throughput::Elements(n_rows as u64));

        group.bench_with_input(BenchmarkId::new("score_income", n_rows), &df, |b, df| {
            b.iter(|| {
                let provider = FrameDataProvider::from_frame("bench", df.clone()).expect("valid frame");
                let mut repository =
                    IterationsRepository::new(EngineConfig::default(), Box::new(provider)).expect("default config");
                let root = repository
                    .add_single_var_iteration(NewIteration::new("score", VariableType::Numerical).auto_band(false))
                    .expect("root bands");
                let _ = repository.add_double_var_iteration(
                    black_box(root),
                    NewIteration::new("income", VariableType::Numerical).auto_band(true),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_single_variable, benchmark_double_variable);
criterion_main!(benches);
