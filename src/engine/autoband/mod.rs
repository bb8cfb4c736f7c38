//! Automatic derivation of group boundaries ("auto-banding")
//!
//! Given a variable, a loss-rate numerator/denominator pair and an ordered
//! risk segment table, derive groups whose observed bad rate stays just
//! under each segment's cap, walking from the lowest-risk segment to the
//! highest.
//!
//! Caps are the segments' upper annualised bad-rate bounds divided by a
//! per-segment risk scalar factor:
//!
//! `factor = max(1, portfolio_scalar * MAF * 12 / months_on_book)`
//!
//! Segments that share the same upper bound are first spread into evenly
//! spaced sub-targets so that each one gets a distinct cap.

mod categorical;
mod double;
mod numeric;

use std::collections::{BTreeMap, HashMap};

use super::config::EngineConfig;
use super::data::{ColumnData, Variable};
use super::error::{EngineError, EngineResult};
use super::groups::Group;
use super::risk_segments::{LossRateType, RiskSegmentDetails};

pub use categorical::{create_auto_categorical_bands, CategoricalBand};
pub use double::{auto_rank_ordering, create_double_var_bands, DoubleBandResult, SegmentLimits};
pub use numeric::{create_auto_numeric_bands, NumericBand, NumericBandOptions};

/// Aggregated loss figures for one distinct value or category
#[derive(Debug, Clone, PartialEq)]
pub struct RateStats<K> {
    pub key: K,
    pub numerator: f64,
    pub denominator: f64,
}

impl<K> RateStats<K> {
    /// Observed bad rate; zero-denominator groups with losses count as infinitely risky
    pub fn rate(&self) -> f64 {
        rate(self.numerator, self.denominator)
    }
}

pub(crate) fn rate(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else if numerator > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// One banding goal: keep the observed rate of the band below `cap`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandTarget {
    pub segment: usize,
    pub cap: f64,
}

/// Everything auto-banding needs besides the data
#[derive(Debug, Clone, PartialEq)]
pub struct AutoBandSettings {
    pub loss_rate: LossRateType,
    /// Lifetime over current loss rate of the portfolio
    pub portfolio_scalar: f64,
    pub months_on_book: f64,
    pub max_iterations: usize,
}

impl AutoBandSettings {
    pub fn from_config(config: &EngineConfig, loss_rate: LossRateType, portfolio_scalar: f64) -> Self {
        Self {
            loss_rate,
            portfolio_scalar,
            months_on_book: config.months_on_book,
            max_iterations: config.auto_band_max_iterations,
        }
    }
}

/// Rows to band: the variable plus aligned loss numerator and denominator
#[derive(Debug, Clone, Copy)]
pub struct BandingInput<'a> {
    pub variable: &'a Variable,
    pub numerator: &'a [Option<f64>],
    pub denominator: &'a [Option<f64>],
}

impl<'a> BandingInput<'a> {
    pub fn new(
        variable: &'a Variable,
        numerator: &'a [Option<f64>],
        denominator: &'a [Option<f64>],
    ) -> EngineResult<Self> {
        let rows = variable.len();
        for column in [numerator, denominator] {
            if column.len() != rows {
                return Err(EngineError::LengthMismatch {
                    expected: rows,
                    found: column.len(),
                });
            }
        }
        Ok(Self {
            variable,
            numerator,
            denominator,
        })
    }

    fn losses(&self, row: usize) -> Option<(f64, f64)> {
        match (self.numerator[row], self.denominator[row]) {
            (Some(n), Some(d)) if n.is_finite() && d.is_finite() => Some((n, d)),
            _ => None,
        }
    }

    /// Per-value sums for a numeric variable, sorted by value ascending.
    /// Rows with a missing value or missing losses, or outside `mask`, are skipped.
    pub fn numeric_stats(&self, mask: Option<&[bool]>) -> Vec<RateStats<f64>> {
        let Some(values) = self.variable.as_numeric() else {
            return Vec::new();
        };
        let mut rows: Vec<(f64, f64, f64)> = values
            .iter()
            .enumerate()
            .filter(|(row, _)| mask.map(|m| m[*row]).unwrap_or(true))
            .filter_map(|(row, value)| {
                let v = (*value)?;
                let (n, d) = self.losses(row)?;
                Some((v, n, d))
            })
            .collect();
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut stats: Vec<RateStats<f64>> = Vec::new();
        for (value, n, d) in rows {
            match stats.last_mut() {
                Some(last) if last.key == value => {
                    last.numerator += n;
                    last.denominator += d;
                }
                _ => stats.push(RateStats {
                    key: value,
                    numerator: n,
                    denominator: d,
                }),
            }
        }
        stats
    }

    /// Per-category sums, in label order
    pub fn categorical_stats(&self, mask: Option<&[bool]>) -> Vec<RateStats<String>> {
        let Some(values) = self.variable.as_categorical() else {
            return Vec::new();
        };
        let mut sums: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
        for (row, value) in values.iter().enumerate() {
            if !mask.map(|m| m[row]).unwrap_or(true) {
                continue;
            }
            let (Some(label), Some((n, d))) = (value, self.losses(row)) else {
                continue;
            };
            let entry = sums.entry(label.as_str()).or_insert((0.0, 0.0));
            entry.0 += n;
            entry.1 += d;
        }
        sums.into_iter()
            .map(|(label, (numerator, denominator))| RateStats {
                key: label.to_string(),
                numerator,
                denominator,
            })
            .collect()
    }
}

/// Risk scalar factor per segment, in table order
pub fn risk_scalar_factors(
    details: &RiskSegmentDetails,
    loss_rate: LossRateType,
    portfolio_scalar: f64,
    months_on_book: f64,
) -> Vec<f64> {
    details
        .rows()
        .iter()
        .map(|row| (portfolio_scalar * row.maf(loss_rate) * 12.0 / months_on_book).max(1.0))
        .collect()
}

/// Spread runs of equal upper bounds into evenly spaced sub-targets.
///
/// A run of `k` segments sharing bound `u`, preceded by distinct bound `p`
/// (zero for the first run), gets `p + (u - p) * i / k` for `i = 1..=k`.
/// Unbounded runs stay unbounded.
pub fn expand_equal_caps(uppers: &[f64]) -> Vec<f64> {
    let mut expanded = Vec::with_capacity(uppers.len());
    let mut previous = 0.0;
    let mut i = 0;
    while i < uppers.len() {
        let upper = uppers[i];
        let mut j = i;
        while j + 1 < uppers.len() && uppers[j + 1] == upper {
            j += 1;
        }
        let run = j - i + 1;
        if run == 1 || !upper.is_finite() {
            expanded.extend(std::iter::repeat(upper).take(run));
        } else {
            for step in 1..=run {
                expanded.push(previous + (upper - previous) * step as f64 / run as f64);
            }
        }
        previous = upper;
        i = j + 1;
    }
    expanded
}

/// Observed-rate caps for each segment of `details`, in table order
pub fn band_targets(details: &RiskSegmentDetails, settings: &AutoBandSettings) -> Vec<BandTarget> {
    let uppers: Vec<f64> = details.rows().iter().map(|r| r.upper_rate).collect();
    let expanded = expand_equal_caps(&uppers);
    let factors = risk_scalar_factors(
        details,
        settings.loss_rate,
        settings.portfolio_scalar,
        settings.months_on_book,
    );
    details
        .rows()
        .iter()
        .zip(expanded.iter().zip(&factors))
        .map(|(row, (upper, factor))| BandTarget {
            segment: row.index,
            cap: upper / factor,
        })
        .collect()
}

/// Whether higher values of the variable carry higher risk.
///
/// Treats the per-value bad rates as weights over the variable's values and
/// looks at the third central moment of that distribution: mass piling up at
/// high values (negative skew) means high value implies high risk.
pub fn does_high_value_implies_high_risk(stats: &[RateStats<f64>]) -> bool {
    let weighted: Vec<(f64, f64)> = stats
        .iter()
        .map(|s| (s.key, s.rate()))
        .filter(|(_, w)| w.is_finite() && *w > 0.0)
        .collect();
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return true;
    }
    let mean = weighted.iter().map(|(v, w)| v * w).sum::<f64>() / total;
    let third_moment = weighted
        .iter()
        .map(|(v, w)| w * (v - mean).powi(3))
        .sum::<f64>()
        / total;
    third_moment < 0.0
}

/// Derive groups for a single-variable iteration.
///
/// Groups are keyed by the risk segment index they target, so the group
/// index of a row is directly its risk segment. Segments that end up with
/// no values get no group.
pub fn create_auto_bands(
    input: &BandingInput<'_>,
    details: &RiskSegmentDetails,
    settings: &AutoBandSettings,
) -> EngineResult<BTreeMap<usize, Group>> {
    let targets = band_targets(details, settings);

    let groups: BTreeMap<usize, Group> = match &input.variable.data {
        ColumnData::Numeric(_) => {
            let stats = input.numeric_stats(None);
            if stats.is_empty() {
                return Err(EngineError::AutoBand(format!(
                    "'{}' has no rows with both a value and loss figures",
                    input.variable.name
                )));
            }
            let options = NumericBandOptions {
                high_value_high_risk: does_high_value_implies_high_risk(&stats),
                floor: None,
                ceiling: None,
                max_iterations: settings.max_iterations,
            };
            create_auto_numeric_bands(&stats, &targets, &options)
                .into_iter()
                .map(|band| (band.segment, Group::interval(band.lower, band.upper)))
                .collect()
        }
        ColumnData::Categorical { .. } => {
            let stats = input.categorical_stats(None);
            if stats.is_empty() {
                return Err(EngineError::AutoBand(format!(
                    "'{}' has no rows with both a category and loss figures",
                    input.variable.name
                )));
            }
            create_auto_categorical_bands(&stats, &targets)
                .into_iter()
                .map(|band| (band.segment, Group::Categories(band.members)))
                .collect()
        }
    };

    log::debug!(
        "Auto-banded '{}' into {} group(s) over {} segment(s)",
        input.variable.name,
        groups.len(),
        details.len()
    );
    Ok(groups)
}

/// Segment lookup by index, used when mapping bands back onto the table
pub(crate) fn segment_positions(details: &RiskSegmentDetails) -> HashMap<usize, usize> {
    details
        .indices()
        .into_iter()
        .enumerate()
        .map(|(position, index)| (index, position))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk_segments::RiskSegment;

    fn stats(pairs: &[(f64, f64)]) -> Vec<RateStats<f64>> {
        pairs
            .iter()
            .map(|&(key, rate)| RateStats {
                key,
                numerator: rate,
                denominator: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_expand_equal_caps() {
        assert_eq!(expand_equal_caps(&[0.1, 0.2]), vec![0.1, 0.2]);
        let expanded = expand_equal_caps(&[0.1, 0.1, 0.1, 0.1, 0.1]);
        let expected = [0.02, 0.04, 0.06, 0.08, 0.1];
        for (a, b) in expanded.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
        let with_prev = expand_equal_caps(&[0.1, 0.3, 0.3]);
        assert!((with_prev[1] - 0.2).abs() < 1e-12);
        assert!((with_prev[2] - 0.3).abs() < 1e-12);
        let unbounded = expand_equal_caps(&[0.1, f64::INFINITY, f64::INFINITY]);
        assert!(unbounded[1].is_infinite() && unbounded[2].is_infinite());
    }

    #[test]
    fn test_risk_scalar_factor_floor() {
        let mut rows = vec![RiskSegment::new(0, "A", 0.05), RiskSegment::new(1, "B", 0.10)];
        rows[1].maf_dlr = 3.0;
        let details = RiskSegmentDetails::new(rows).unwrap();
        let factors = risk_scalar_factors(&details, LossRateType::Dlr, 0.5, 12.0);
        assert_eq!(factors, vec![1.0, 1.5]);

        let annualised = risk_scalar_factors(&details, LossRateType::Dlr, 1.0, 6.0);
        assert_eq!(annualised, vec![2.0, 6.0]);
    }

    #[test]
    fn test_direction_detection() {
        let increasing = stats(&[(1.0, 0.01), (2.0, 0.02), (3.0, 0.05), (4.0, 0.20)]);
        assert!(does_high_value_implies_high_risk(&increasing));

        let decreasing = stats(&[(1.0, 0.20), (2.0, 0.05), (3.0, 0.02), (4.0, 0.01)]);
        assert!(!does_high_value_implies_high_risk(&decreasing));
    }

    #[test]
    fn test_numeric_stats_aggregates_duplicates() {
        let variable = Variable::numeric("x", vec![Some(2.0), Some(1.0), Some(2.0), None]);
        let num = vec![Some(1.0), Some(0.0), Some(3.0), Some(5.0)];
        let den = vec![Some(10.0), Some(10.0), Some(10.0), Some(10.0)];
        let input = BandingInput::new(&variable, &num, &den).unwrap();
        let stats = input.numeric_stats(None);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].key, 2.0);
        assert_eq!(stats[1].numerator, 4.0);
        assert_eq!(stats[1].denominator, 20.0);

        let masked = input.numeric_stats(Some(&[true, false, false, true]));
        assert_eq!(masked.len(), 1);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let variable = Variable::numeric("x", vec![Some(1.0), Some(2.0)]);
        let short = vec![Some(1.0)];
        let full = vec![Some(1.0), Some(1.0)];
        assert!(BandingInput::new(&variable, &short, &full).is_err());
    }
}
