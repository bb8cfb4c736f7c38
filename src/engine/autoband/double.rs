//! Double-variable auto-banding
//!
//! The rows are sliced by the risk segment the parent iteration assigned
//! them. Each slice is banded independently against a window of segments
//! around its own (bounded by the upgrade and downgrade limits), then the
//! slices are merged into one group definition plus a grid that records,
//! per parent segment, which segment each merged group lands in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;

use super::{
    band_targets, create_auto_categorical_bands, create_auto_numeric_bands, does_high_value_implies_high_risk,
    segment_positions, AutoBandSettings, BandTarget, BandingInput, NumericBand, NumericBandOptions,
};
use crate::engine::data::ColumnData;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::grid::RiskSegmentGrid;
use crate::engine::groups::Group;
use crate::engine::output::IterationOutput;
use crate::engine::risk_segments::RiskSegmentDetails;

/// How far a slice may move away from its parent segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLimits {
    /// Segments towards lower risk
    pub upgrade: usize,
    /// Segments towards higher risk
    pub downgrade: usize,
}

impl SegmentLimits {
    pub fn new(upgrade: usize, downgrade: usize) -> Self {
        Self { upgrade, downgrade }
    }

    /// Slice of `targets` a parent segment at `position` may be banded into
    fn window<'t>(&self, targets: &'t [BandTarget], position: usize) -> &'t [BandTarget] {
        let lo = position.saturating_sub(self.upgrade);
        let hi = (position + self.downgrade).min(targets.len() - 1);
        &targets[lo..=hi]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoubleBandResult {
    pub groups: BTreeMap<usize, Group>,
    pub grid: RiskSegmentGrid,
}

/// Derive groups and a grid for a double-variable iteration.
///
/// `previous` is the parent's resolved output; its levels must be the
/// segments of `details`. Rows the parent left unresolved take part in the
/// global range and direction but in no slice.
pub fn create_double_var_bands(
    input: &BandingInput<'_>,
    previous: &IterationOutput,
    details: &RiskSegmentDetails,
    settings: &AutoBandSettings,
    limits: SegmentLimits,
    rank_order: bool,
) -> EngineResult<DoubleBandResult> {
    if previous.len() != input.variable.len() {
        return Err(EngineError::LengthMismatch {
            expected: input.variable.len(),
            found: previous.len(),
        });
    }
    if !previous.is_valid() {
        return Err(EngineError::AutoBand(
            "the parent iteration did not resolve cleanly".to_string(),
        ));
    }

    let targets = band_targets(details, settings);
    let result = match &input.variable.data {
        ColumnData::Numeric(_) => numeric_double_bands(input, previous, details, &targets, settings, limits)?,
        ColumnData::Categorical { .. } => categorical_double_bands(input, previous, details, &targets, limits)?,
    };

    log::debug!(
        "Double auto-band on '{}': {} group(s) across {} parent segment(s)",
        input.variable.name,
        result.groups.len(),
        details.len()
    );

    if rank_order {
        let (groups, grid) = auto_rank_ordering(&result.groups, &result.grid, details)?;
        Ok(DoubleBandResult { groups, grid })
    } else {
        Ok(result)
    }
}

fn numeric_double_bands(
    input: &BandingInput<'_>,
    previous: &IterationOutput,
    details: &RiskSegmentDetails,
    targets: &[BandTarget],
    settings: &AutoBandSettings,
    limits: SegmentLimits,
) -> EngineResult<DoubleBandResult> {
    let all = input.numeric_stats(None);
    let (Some(first), Some(last)) = (all.first(), all.last()) else {
        return Err(EngineError::AutoBand(format!(
            "'{}' has no rows with both a value and loss figures",
            input.variable.name
        )));
    };
    let high_value_high_risk = does_high_value_implies_high_risk(&all);
    let floor = first.key - 1.0;
    let ceiling = last.key;
    let options = NumericBandOptions {
        high_value_high_risk,
        floor: Some(floor),
        ceiling: Some(ceiling),
        max_iterations: settings.max_iterations,
    };

    let columns = details.indices();
    let slices: Vec<Vec<NumericBand>> = columns
        .par_iter()
        .enumerate()
        .map(|(position, &segment)| {
            let mask = previous.mask_for(segment);
            let stats = input.numeric_stats(Some(&mask));
            create_auto_numeric_bands(&stats, limits.window(targets, position), &options)
        })
        .collect();

    let mut cuts: Vec<f64> = vec![floor, ceiling];
    for band in slices.iter().flatten() {
        cuts.push(band.lower);
        cuts.push(band.upper);
    }
    cuts.sort_by(|a, b| a.total_cmp(b));
    cuts.dedup();

    let mut intervals: Vec<(f64, f64)> = cuts.windows(2).map(|w| (w[0], w[1])).collect();
    if !high_value_high_risk {
        intervals.reverse();
    }

    let mut groups = BTreeMap::new();
    let mut cells = Vec::with_capacity(intervals.len());
    for (row, &(lower, upper)) in intervals.iter().enumerate() {
        groups.insert(row, Group::interval(lower, upper));
        let cell_row = columns
            .iter()
            .zip(&slices)
            .map(|(&segment, bands)| {
                bands
                    .iter()
                    .find(|b| b.lower <= lower && upper <= b.upper)
                    .map(|b| b.segment)
                    .unwrap_or(segment)
            })
            .collect();
        cells.push(cell_row);
    }

    let grid = RiskSegmentGrid::new((0..intervals.len()).collect(), columns, cells)?;
    Ok(DoubleBandResult { groups, grid })
}

/// Categories that landed in the same segment in every slice form one group
fn categorical_double_bands(
    input: &BandingInput<'_>,
    previous: &IterationOutput,
    details: &RiskSegmentDetails,
    targets: &[BandTarget],
    limits: SegmentLimits,
) -> EngineResult<DoubleBandResult> {
    let categories: Vec<String> = input
        .variable
        .categories()
        .map(|c| c.to_vec())
        .unwrap_or_default();
    if categories.is_empty() {
        return Err(EngineError::AutoBand(format!(
            "'{}' has no categories to band",
            input.variable.name
        )));
    }

    let columns = details.indices();
    let slices: Vec<HashMap<String, usize>> = columns
        .par_iter()
        .enumerate()
        .map(|(position, &segment)| {
            let mask = previous.mask_for(segment);
            let stats = input.categorical_stats(Some(&mask));
            create_auto_categorical_bands(&stats, limits.window(targets, position))
                .into_iter()
                .flat_map(|band| {
                    let segment = band.segment;
                    band.members.into_iter().map(move |label| (label, segment))
                })
                .collect()
        })
        .collect();

    let positions = segment_positions(details);
    let mut by_signature: HashMap<Vec<usize>, BTreeSet<String>> = HashMap::new();
    for label in categories {
        let signature: Vec<usize> = columns
            .iter()
            .zip(&slices)
            .map(|(&segment, assigned)| assigned.get(&label).copied().unwrap_or(segment))
            .collect();
        by_signature.entry(signature).or_default().insert(label);
    }

    let mut ordered: Vec<(Vec<usize>, BTreeSet<String>)> = by_signature.into_iter().collect();
    ordered.sort_by_key(|(signature, members)| {
        let ranks: Vec<usize> = signature.iter().map(|s| positions[s]).collect();
        (ranks.iter().sum::<usize>(), ranks, members.iter().next().cloned())
    });

    let mut groups = BTreeMap::new();
    let mut cells = Vec::with_capacity(ordered.len());
    for (row, (signature, members)) in ordered.into_iter().enumerate() {
        groups.insert(row, Group::Categories(members));
        cells.push(signature);
    }
    let grid = RiskSegmentGrid::new((0..cells.len()).collect(), columns, cells)?;
    Ok(DoubleBandResult { groups, grid })
}

fn merge_bound(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn merge_groups(kept: &Group, other: &Group) -> Group {
    match (kept, other) {
        (Group::Interval(l1, u1), Group::Interval(l2, u2)) => {
            Group::Interval(merge_bound(*l1, *l2, f64::min), merge_bound(*u1, *u2, f64::max))
        }
        (Group::Categories(a), Group::Categories(b)) => Group::Categories(a.union(b).cloned().collect()),
        _ => kept.clone(),
    }
}

/// Make the grid monotone in both directions, then merge duplicate rows.
///
/// Cells are turned into positions in `details` and raised to the running
/// maximum down each column and along each row, so riskier groups and
/// riskier parent segments never map to a safer segment. Adjacent rows that
/// end up identical are merged into the first of the run, and the surviving
/// groups are renumbered from zero in grid order.
pub fn auto_rank_ordering(
    groups: &BTreeMap<usize, Group>,
    grid: &RiskSegmentGrid,
    details: &RiskSegmentDetails,
) -> EngineResult<(BTreeMap<usize, Group>, RiskSegmentGrid)> {
    let positions = segment_positions(details);
    let mut cells: Vec<Vec<usize>> = grid
        .cells()
        .iter()
        .map(|row| {
            row.iter()
                .map(|s| positions.get(s).copied().ok_or(EngineError::UnknownRiskSegment(*s)))
                .collect::<EngineResult<Vec<usize>>>()
        })
        .collect::<EngineResult<_>>()?;

    for i in 0..cells.len() {
        for j in 0..cells[i].len() {
            let mut best = cells[i][j];
            if i > 0 {
                best = best.max(cells[i - 1][j]);
            }
            if j > 0 {
                best = best.max(cells[i][j - 1]);
            }
            cells[i][j] = best;
        }
    }

    let mut merged: Vec<(Group, Vec<usize>)> = Vec::new();
    for (row, &group_index) in grid.rows().iter().enumerate() {
        let group = groups
            .get(&group_index)
            .ok_or(EngineError::InvalidGroupIndex(group_index))?;
        match merged.last_mut() {
            Some((kept, kept_cells)) if *kept_cells == cells[row] => {
                *kept = merge_groups(kept, group);
            }
            _ => merged.push((group.clone(), cells[row].clone())),
        }
    }

    let segments = details.indices();
    let mut new_groups = BTreeMap::new();
    let mut new_cells = Vec::with_capacity(merged.len());
    for (index, (group, row)) in merged.into_iter().enumerate() {
        new_groups.insert(index, group);
        new_cells.push(row.into_iter().map(|p| segments[p]).collect());
    }
    let grid = RiskSegmentGrid::new((0..new_cells.len()).collect(), grid.columns().to_vec(), new_cells)?;
    Ok((new_groups, grid))
}
