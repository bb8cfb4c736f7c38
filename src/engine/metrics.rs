//! Per-segment metrics
//!
//! A metric turns a slice of rows into one number. The repository slices
//! the data by resolved risk segment (or by group and parent segment for
//! grids) and evaluates every metric on each slice.

use std::collections::BTreeMap;
use std::sync::Arc;

use polars::prelude::*;
use serde::Serialize;

use super::config::LossRateColumns;
use super::error::{EngineError, EngineResult};
use super::output::IterationOutput;
use super::risk_segments::{LossRateType, RiskSegmentDetails};

/// How a metric value is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFormat {
    Integer,
    Decimal(usize),
    Percent(usize),
}

impl MetricFormat {
    pub fn format(&self, value: f64) -> String {
        if !value.is_finite() {
            return "-".to_string();
        }
        match self {
            MetricFormat::Integer => format!("{:.0}", value),
            MetricFormat::Decimal(places) => format!("{:.*}", places, value),
            MetricFormat::Percent(places) => format!("{:.*}%", places, value * 100.0),
        }
    }
}

pub trait Metric: Send + Sync {
    fn id(&self) -> &str;

    fn label(&self) -> &str {
        self.id()
    }

    /// Columns `calculate` reads
    fn columns(&self) -> Vec<String>;

    fn calculate(&self, frame: &DataFrame) -> EngineResult<f64>;

    fn format(&self) -> MetricFormat {
        MetricFormat::Decimal(2)
    }
}

fn column_sum(frame: &DataFrame, name: &str) -> EngineResult<f64> {
    let column = frame
        .column(name)
        .map_err(|_| EngineError::ColumnNotFound(name.to_string()))?;
    let values = column.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().flatten().filter(|v| !v.is_nan()).sum())
}

/// Number of rows
#[derive(Debug, Clone)]
pub struct CountMetric {
    pub id: String,
}

impl Metric for CountMetric {
    fn id(&self) -> &str {
        &self.id
    }

    fn columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn calculate(&self, frame: &DataFrame) -> EngineResult<f64> {
        Ok(frame.height() as f64)
    }

    fn format(&self) -> MetricFormat {
        MetricFormat::Integer
    }
}

/// Sum of one column
#[derive(Debug, Clone)]
pub struct SumMetric {
    pub id: String,
    pub column: String,
}

impl Metric for SumMetric {
    fn id(&self) -> &str {
        &self.id
    }

    fn columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }

    fn calculate(&self, frame: &DataFrame) -> EngineResult<f64> {
        column_sum(frame, &self.column)
    }
}

/// Sum of one column over the sum of another, e.g. a bad rate
#[derive(Debug, Clone)]
pub struct RatioMetric {
    pub id: String,
    pub numerator: String,
    pub denominator: String,
}

impl Metric for RatioMetric {
    fn id(&self) -> &str {
        &self.id
    }

    fn columns(&self) -> Vec<String> {
        vec![self.numerator.clone(), self.denominator.clone()]
    }

    fn calculate(&self, frame: &DataFrame) -> EngineResult<f64> {
        let numerator = column_sum(frame, &self.numerator)?;
        let denominator = column_sum(frame, &self.denominator)?;
        Ok(if denominator == 0.0 {
            f64::NAN
        } else {
            numerator / denominator
        })
    }

    fn format(&self) -> MetricFormat {
        MetricFormat::Percent(2)
    }
}

type MetricFn = dyn Fn(&DataFrame) -> EngineResult<f64> + Send + Sync;

/// Arbitrary calculation supplied as a closure
#[derive(Clone)]
pub struct FnMetric {
    pub id: String,
    pub columns: Vec<String>,
    pub format: MetricFormat,
    calculate: Arc<MetricFn>,
}

impl FnMetric {
    pub fn new<F>(id: impl Into<String>, columns: Vec<String>, format: MetricFormat, calculate: F) -> Self
    where
        F: Fn(&DataFrame) -> EngineResult<f64> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            columns,
            format,
            calculate: Arc::new(calculate),
        }
    }
}

impl Metric for FnMetric {
    fn id(&self) -> &str {
        &self.id
    }

    fn columns(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn calculate(&self, frame: &DataFrame) -> EngineResult<f64> {
        (self.calculate)(frame)
    }

    fn format(&self) -> MetricFormat {
        self.format
    }
}

pub trait MetricProvider {
    /// Every metric, keyed by id
    fn get_all_metrics(&self) -> BTreeMap<String, Arc<dyn Metric>>;
}

/// Row count, balances and both loss rates
#[derive(Clone, Default)]
pub struct StandardMetrics {
    metrics: BTreeMap<String, Arc<dyn Metric>>,
}

impl StandardMetrics {
    pub fn new(loss_rates: &LossRateColumns) -> Self {
        let mut standard = Self::default();
        standard.add(CountMetric { id: "count".to_string() });
        for loss_rate in [LossRateType::Dlr, LossRateType::Ulr] {
            let columns = loss_rates.get(loss_rate);
            standard.add(RatioMetric {
                id: loss_rate.to_string().to_lowercase(),
                numerator: columns.numerator.clone(),
                denominator: columns.denominator.clone(),
            });
        }
        standard.add(SumMetric {
            id: "balance".to_string(),
            column: loss_rates.get(LossRateType::Dlr).denominator.clone(),
        });
        standard
    }

    pub fn add<M: Metric + 'static>(&mut self, metric: M) {
        self.metrics.insert(metric.id().to_string(), Arc::new(metric));
    }
}

impl MetricProvider for StandardMetrics {
    fn get_all_metrics(&self) -> BTreeMap<String, Arc<dyn Metric>> {
        self.metrics.clone()
    }
}

/// Metric values for one resolved risk segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentMetric {
    pub segment: usize,
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

/// One metric over (group, parent segment) cells of a double-variable iteration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricGrid {
    pub metric: String,
    pub rows: Vec<usize>,
    pub columns: Vec<usize>,
    pub values: Vec<Vec<f64>>,
}

/// Union of the columns a set of metrics reads, in first-seen order
pub fn required_columns(metrics: &BTreeMap<String, Arc<dyn Metric>>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for metric in metrics.values() {
        for column in metric.columns() {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
    }
    columns
}

fn slice(frame: &DataFrame, mask: &[bool]) -> EngineResult<DataFrame> {
    let mask = BooleanChunked::from_slice("mask".into(), mask);
    Ok(frame.filter(&mask)?)
}

/// Evaluate every metric on each risk segment of `output`, in table order
pub fn metric_range(
    frame: &DataFrame,
    output: &IterationOutput,
    details: &RiskSegmentDetails,
    metrics: &BTreeMap<String, Arc<dyn Metric>>,
) -> EngineResult<Vec<SegmentMetric>> {
    if frame.height() != output.len() {
        return Err(EngineError::LengthMismatch {
            expected: output.len(),
            found: frame.height(),
        });
    }
    details
        .rows()
        .iter()
        .map(|segment| {
            let rows = slice(frame, &output.mask_for(segment.index))?;
            let mut values = BTreeMap::new();
            for (id, metric) in metrics {
                values.insert(id.clone(), metric.calculate(&rows)?);
            }
            Ok(SegmentMetric {
                segment: segment.index,
                name: segment.name.clone(),
                values,
            })
        })
        .collect()
}

/// Evaluate each metric on every (group, parent segment) cell
pub fn metric_grids(
    frame: &DataFrame,
    groups: &IterationOutput,
    previous: &IterationOutput,
    metrics: &BTreeMap<String, Arc<dyn Metric>>,
) -> EngineResult<Vec<MetricGrid>> {
    if frame.height() != groups.len() || groups.len() != previous.len() {
        return Err(EngineError::LengthMismatch {
            expected: groups.len(),
            found: frame.height().min(previous.len()),
        });
    }

    let mut cells: Vec<Vec<DataFrame>> = Vec::with_capacity(groups.levels.len());
    for &group in &groups.levels {
        let mut row = Vec::with_capacity(previous.levels.len());
        for &segment in &previous.levels {
            let mask: Vec<bool> = groups
                .values
                .iter()
                .zip(&previous.values)
                .map(|(g, s)| *g == Some(group) && *s == Some(segment))
                .collect();
            row.push(slice(frame, &mask)?);
        }
        cells.push(row);
    }

    metrics
        .iter()
        .map(|(id, metric)| {
            let values = cells
                .iter()
                .map(|row| row.iter().map(|cell| metric.calculate(cell)).collect::<EngineResult<Vec<f64>>>())
                .collect::<EngineResult<Vec<Vec<f64>>>>()?;
            Ok(MetricGrid {
                metric: id.clone(),
                rows: groups.levels.clone(),
                columns: previous.levels.clone(),
                values,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk_segments::RiskSegment;

    fn frame() -> DataFrame {
        df! {
            "bad_balance" => [0.0f64, 10.0, 0.0, 50.0],
            "balance" => [100.0f64, 100.0, 200.0, 100.0],
            "bad_count" => [0.0f64, 1.0, 0.0, 1.0],
            "count" => [1.0f64, 1.0, 1.0, 1.0],
        }
        .unwrap()
    }

    fn output() -> IterationOutput {
        IterationOutput {
            values: vec![Some(0), Some(0), Some(1), Some(1)],
            levels: vec![0, 1],
            ..Default::default()
        }
    }

    #[test]
    fn test_metric_range_per_segment() {
        let details = RiskSegmentDetails::new(vec![
            RiskSegment::new(0, "Low", 0.05),
            RiskSegment::new(1, "High", f64::INFINITY),
        ])
        .unwrap();
        let metrics = StandardMetrics::new(&LossRateColumns::default()).get_all_metrics();
        let range = metric_range(&frame(), &output(), &details, &metrics).unwrap();

        assert_eq!(range.len(), 2);
        assert_eq!(range[0].name, "Low");
        assert_eq!(range[0].values["count"], 2.0);
        assert!((range[0].values["dlr"] - 0.05).abs() < 1e-12);
        assert!((range[1].values["ulr"] - 0.5).abs() < 1e-12);
        assert_eq!(range[1].values["balance"], 300.0);
    }

    #[test]
    fn test_metric_grids_cells() {
        let groups = IterationOutput {
            values: vec![Some(0), Some(1), Some(0), Some(1)],
            levels: vec![0, 1],
            ..Default::default()
        };
        let mut metrics: BTreeMap<String, Arc<dyn Metric>> = BTreeMap::new();
        metrics.insert("count".to_string(), Arc::new(CountMetric { id: "count".to_string() }));
        let grids = metric_grids(&frame(), &groups, &output(), &metrics).unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].values, vec![vec![1.0, 1.0], vec![1.0, 1.0]]);
    }

    #[test]
    fn test_custom_metric_and_format() {
        let metric = FnMetric::new("max_balance", vec!["balance".to_string()], MetricFormat::Integer, |df| {
            let column = df.column("balance")?.cast(&DataType::Float64)?;
            Ok(column.f64()?.max().unwrap_or(f64::NAN))
        });
        assert_eq!(metric.calculate(&frame()).unwrap(), 200.0);
        assert_eq!(metric.format().format(200.0), "200");
        assert_eq!(MetricFormat::Percent(1).format(0.1234), "12.3%");
        assert_eq!(MetricFormat::Decimal(2).format(f64::NAN), "-");
    }
}
