//! A single node of the iteration tree
//!
//! An iteration bins one variable into groups. Single-variable iterations
//! are roots: each group index is itself a risk segment of the iteration's
//! own risk segment table. Double-variable iterations refine their parent:
//! a grid maps (own group, parent segment) pairs onto a resulting segment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::data::{ColumnData, Variable, VariableType};
use super::error::{EngineError, EngineResult};
use super::grid::RiskSegmentGrid;
use super::groups::{Group, GroupSet};
use super::ids::IterationId;
use super::output::IterationOutput;
use super::risk_segments::{ColorKind, LossRateType, RiskSegmentDetails};
use super::validator::get_group_mapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationType {
    Single,
    Double,
}

impl fmt::Display for IterationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationType::Single => write!(f, "single"),
            IterationType::Double => write!(f, "double"),
        }
    }
}

/// How group indices turn into risk segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SegmentMapping {
    Single {
        risk_segment_details: RiskSegmentDetails,
    },
    Double {
        grid: RiskSegmentGrid,
        default_grid: RiskSegmentGrid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: IterationId,
    pub name: String,
    pub variable: String,
    pub variable_type: VariableType,
    pub loss_rate: LossRateType,
    /// Filter ids restricting the rows a root iteration resolves
    #[serde(default)]
    pub filters: Vec<String>,
    pub groups: GroupSet,
    /// Cleared when the variable disappears from the data
    pub active: bool,
    pub mapping: SegmentMapping,
}

impl Iteration {
    pub fn new_single(
        id: IterationId,
        name: impl Into<String>,
        variable: &Variable,
        loss_rate: LossRateType,
        groups: BTreeMap<usize, Group>,
        details: RiskSegmentDetails,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            variable: variable.name.clone(),
            variable_type: variable.variable_type(),
            loss_rate,
            filters: Vec::new(),
            groups: GroupSet::new(groups),
            active: true,
            mapping: SegmentMapping::Single {
                risk_segment_details: details,
            },
        }
    }

    pub fn new_double(
        id: IterationId,
        name: impl Into<String>,
        variable: &Variable,
        loss_rate: LossRateType,
        groups: BTreeMap<usize, Group>,
        grid: RiskSegmentGrid,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            variable: variable.name.clone(),
            variable_type: variable.variable_type(),
            loss_rate,
            filters: Vec::new(),
            groups: GroupSet::new(groups),
            active: true,
            mapping: SegmentMapping::Double {
                default_grid: grid.clone(),
                grid,
            },
        }
    }

    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }

    pub fn iteration_type(&self) -> IterationType {
        match self.mapping {
            SegmentMapping::Single { .. } => IterationType::Single,
            SegmentMapping::Double { .. } => IterationType::Double,
        }
    }

    pub fn is_single(&self) -> bool {
        self.iteration_type() == IterationType::Single
    }

    /// The table owned by a single-variable iteration
    pub fn risk_segment_details(&self) -> Option<&RiskSegmentDetails> {
        match &self.mapping {
            SegmentMapping::Single {
                risk_segment_details,
            } => Some(risk_segment_details),
            SegmentMapping::Double { .. } => None,
        }
    }

    pub fn grid(&self, default: bool) -> Option<&RiskSegmentGrid> {
        match &self.mapping {
            SegmentMapping::Single { .. } => None,
            SegmentMapping::Double { grid, default_grid } => Some(if default { default_grid } else { grid }),
        }
    }

    fn details_mut(&mut self) -> EngineResult<&mut RiskSegmentDetails> {
        match &mut self.mapping {
            SegmentMapping::Single {
                risk_segment_details,
            } => Ok(risk_segment_details),
            SegmentMapping::Double { .. } => Err(EngineError::WrongIterationKind {
                iteration: self.id,
                expected: "single-variable",
            }),
        }
    }

    fn grid_mut(&mut self) -> EngineResult<&mut RiskSegmentGrid> {
        match &mut self.mapping {
            SegmentMapping::Double { grid, .. } => Ok(grid),
            SegmentMapping::Single { .. } => Err(EngineError::WrongIterationKind {
                iteration: self.id,
                expected: "double-variable",
            }),
        }
    }

    /// Rows assigned to this iteration's own groups
    pub fn get_group_mapping(&self, variable: &Variable, default: bool, preview: usize) -> IterationOutput {
        get_group_mapping(&self.groups.view(default), variable, preview)
    }

    /// Resolve rows to risk segments.
    ///
    /// `details` is the table of the tree's root (for a single-variable
    /// iteration, its own). Double-variable iterations combine their group
    /// mapping with `previous`, the parent's resolved output, via the grid.
    /// Validation errors, in this iteration or upstream, leave every row
    /// unresolved and are reported in the output.
    pub fn get_risk_segments(
        &self,
        variable: &Variable,
        previous: Option<&IterationOutput>,
        details: &RiskSegmentDetails,
        default: bool,
        preview: usize,
    ) -> EngineResult<IterationOutput> {
        if variable.variable_type() != self.variable_type {
            return Err(EngineError::WrongColumnType {
                column: variable.name.clone(),
                expected: if self.variable_type == VariableType::Numerical {
                    "numerical"
                } else {
                    "categorical"
                },
                found: variable.variable_type().to_string(),
            });
        }

        let mapping = self.get_group_mapping(variable, default, preview);
        let mut output = IterationOutput::unresolved(variable.len(), details.indices());
        output.warnings = mapping.warnings;
        output.errors = mapping.errors;
        output.invalid_groups = mapping.invalid_groups;

        match &self.mapping {
            SegmentMapping::Single { .. } => {
                if !output.errors.is_empty() {
                    return Ok(output);
                }
                let stray: BTreeSet<usize> = mapping
                    .values
                    .iter()
                    .flatten()
                    .copied()
                    .filter(|g| !details.contains(*g))
                    .collect();
                for group in &stray {
                    output
                        .warnings
                        .push(format!("Group {} does not correspond to a risk segment", group));
                }
                output.values = mapping
                    .values
                    .into_iter()
                    .map(|g| g.filter(|g| details.contains(*g)))
                    .collect();
            }
            SegmentMapping::Double { grid, default_grid } => {
                let previous = previous.ok_or(EngineError::MissingParentOutput(self.id))?;
                if previous.len() != variable.len() {
                    return Err(EngineError::LengthMismatch {
                        expected: variable.len(),
                        found: previous.len(),
                    });
                }
                if !previous.is_valid() {
                    output
                        .errors
                        .push(format!("Parent of iteration {} did not resolve", self.id));
                }
                if !output.errors.is_empty() {
                    return Ok(output);
                }
                let grid = if default { default_grid } else { grid };
                for ((slot, group), segment) in output.values.iter_mut().zip(&mapping.values).zip(&previous.values) {
                    if let (Some(g), Some(s)) = (group, segment) {
                        *slot = grid.get(*g, *s);
                    }
                }
            }
        }
        Ok(output)
    }

    pub fn set_group(
        &mut self,
        index: usize,
        lower: Option<f64>,
        upper: Option<f64>,
        categories: Option<BTreeSet<String>>,
    ) -> EngineResult<bool> {
        self.groups.set_group(index, lower, upper, categories)
    }

    fn blank_group(&self) -> Group {
        match self.variable_type {
            VariableType::Numerical => Group::Interval(None, None),
            VariableType::Categorical => Group::Categories(BTreeSet::new()),
        }
    }

    /// Add an empty group and return its index.
    ///
    /// Single-variable iterations use the lowest-risk segment that has no
    /// group yet; double-variable ones take the next free index and get an
    /// identity row in the grid.
    pub fn add_new_group(&mut self) -> EngineResult<usize> {
        let blank = self.blank_group();
        match &mut self.mapping {
            SegmentMapping::Single {
                risk_segment_details,
            } => {
                let index = risk_segment_details
                    .indices()
                    .into_iter()
                    .find(|i| !self.groups.contains(*i))
                    .ok_or(EngineError::NoFreeSegment)?;
                self.groups.insert_group(index, blank)?;
                Ok(index)
            }
            SegmentMapping::Double { grid, .. } => {
                let index = self.groups.next_index();
                self.groups.insert_group(index, blank)?;
                grid.add_row(index)?;
                Ok(index)
            }
        }
    }

    /// Hard delete for single-variable iterations, deactivation for double ones
    pub fn remove_group(&mut self, index: usize) -> EngineResult<()> {
        match self.iteration_type() {
            IterationType::Single => self.groups.remove_group(index).map(|_| ()),
            IterationType::Double => self.groups.deactivate_group(index),
        }
    }

    pub fn select_groups(&mut self, indices: &[usize]) -> EngineResult<()> {
        self.groups.select(indices)
    }

    pub fn set_risk_segment_grid(&mut self, cells: Vec<Vec<usize>>, details: &RiskSegmentDetails) -> EngineResult<()> {
        let grid = self.grid_mut()?;
        let mut candidate = grid.clone();
        candidate.set_cells(cells)?;
        candidate.validate(details)?;
        *grid = candidate;
        Ok(())
    }

    pub fn reset_to_default(&mut self) {
        self.groups.reset_to_default();
        if let SegmentMapping::Double { grid, default_grid } = &mut self.mapping {
            *grid = default_grid.clone();
        }
    }

    pub fn update_maf(&mut self, loss_rate: LossRateType, values: &[f64]) -> EngineResult<()> {
        self.details_mut()?.update_maf(loss_rate, values)
    }

    pub fn update_color(&mut self, kind: ColorKind, values: &[String]) -> EngineResult<()> {
        self.details_mut()?.update_color(kind, values)
    }

    /// Copy colors and MAFs from `source`; returns whether anything changed
    pub fn sync_risk_segment_details(&mut self, source: &RiskSegmentDetails) -> EngineResult<bool> {
        Ok(self.details_mut()?.sync_presentation(source))
    }

    pub fn to_dict(&self) -> EngineResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_dict(value: serde_json::Value) -> EngineResult<Self> {
        let iteration: Self = serde_json::from_value(value)?;
        if let SegmentMapping::Double { grid, default_grid } = &iteration.mapping {
            for g in [grid, default_grid] {
                RiskSegmentGrid::new(g.rows().to_vec(), g.columns().to_vec(), g.cells().to_vec())?;
            }
        }
        Ok(iteration)
    }
}

/// Starting groups when no auto-banding is requested.
///
/// Numeric variables are split at quantiles of their distinct values,
/// categorical ones into runs of their sorted categories; one group per
/// key, skipping keys left without values.
pub fn default_groups(variable: &Variable, keys: &[usize]) -> BTreeMap<usize, Group> {
    let mut groups = BTreeMap::new();
    if keys.is_empty() {
        return groups;
    }
    match &variable.data {
        ColumnData::Numeric(values) => {
            let mut distinct: Vec<f64> = values.iter().flatten().copied().collect();
            distinct.sort_by(|a, b| a.total_cmp(b));
            distinct.dedup();
            let (Some(&min), Some(&max)) = (distinct.first(), distinct.last()) else {
                groups.insert(keys[0], Group::Interval(None, None));
                return groups;
            };
            let mut lower = min - 1.0;
            let mut taken = 0;
            for (i, &key) in keys.iter().enumerate() {
                let end = (i + 1) * distinct.len() / keys.len();
                if end <= taken {
                    continue;
                }
                let upper = if end == distinct.len() { max } else { distinct[end - 1] };
                groups.insert(key, Group::interval(lower, upper));
                lower = upper;
                taken = end;
            }
        }
        ColumnData::Categorical { categories, .. } => {
            let mut taken = 0;
            for (i, &key) in keys.iter().enumerate() {
                let end = (i + 1) * categories.len() / keys.len();
                if end <= taken {
                    continue;
                }
                groups.insert(key, Group::categories(categories[taken..end].iter().cloned()));
                taken = end;
            }
            if groups.is_empty() {
                groups.insert(keys[0], Group::Categories(BTreeSet::new()));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::risk_segments::RiskSegment;

    fn details() -> RiskSegmentDetails {
        RiskSegmentDetails::new(vec![
            RiskSegment::new(0, "A", 0.02),
            RiskSegment::new(1, "B", 0.10),
            RiskSegment::new(2, "C", f64::INFINITY),
        ])
        .unwrap()
    }

    fn variable() -> Variable {
        Variable::numeric("x", (0..9).map(|v| Some(v as f64)).collect())
    }

    fn single() -> Iteration {
        let var = variable();
        let groups = default_groups(&var, &[0, 1, 2]);
        Iteration::new_single(IterationId::Real(1), "root", &var, LossRateType::Dlr, groups, details())
    }

    #[test]
    fn test_default_numeric_groups_cover_range() {
        let groups = default_groups(&variable(), &[0, 1, 2]);
        assert_eq!(groups[&0], Group::interval(-1.0, 2.0));
        assert_eq!(groups[&1], Group::interval(2.0, 5.0));
        assert_eq!(groups[&2], Group::interval(5.0, 8.0));
    }

    #[test]
    fn test_default_categorical_groups() {
        let var = Variable::categorical(
            "c",
            ["a", "b", "c", "d"].iter().map(|s| Some(s.to_string())).collect(),
        );
        let groups = default_groups(&var, &[3, 4]);
        assert_eq!(groups[&3], Group::categories(["a", "b"]));
        assert_eq!(groups[&4], Group::categories(["c", "d"]));
    }

    #[test]
    fn test_single_group_index_is_segment() {
        let iteration = single();
        let output = iteration
            .get_risk_segments(&variable(), None, &details(), false, 10)
            .unwrap();
        assert!(output.is_valid());
        assert_eq!(output.values[0], Some(0));
        assert_eq!(output.values[8], Some(2));
        assert_eq!(output.levels, vec![0, 1, 2]);
    }

    #[test]
    fn test_double_combines_with_parent() {
        let var = variable();
        let groups: BTreeMap<usize, Group> =
            [(0, Group::interval(-1.0, 4.0)), (1, Group::interval(4.0, 8.0))].into_iter().collect();
        let grid = RiskSegmentGrid::new(vec![0, 1], vec![0, 1, 2], vec![vec![0, 0, 1], vec![1, 2, 2]]).unwrap();
        let child = Iteration::new_double(IterationId::Real(2), "child", &var, LossRateType::Dlr, groups, grid);

        let previous = IterationOutput {
            values: vec![Some(0), Some(1), Some(2), None, Some(0), Some(0), Some(1), Some(2), Some(2)],
            levels: vec![0, 1, 2],
            ..Default::default()
        };
        let output = child
            .get_risk_segments(&var, Some(&previous), &details(), false, 10)
            .unwrap();
        assert_eq!(output.values[0], Some(0));
        assert_eq!(output.values[2], Some(1));
        assert_eq!(output.values[3], None);
        assert_eq!(output.values[6], Some(2));

        assert!(child.get_risk_segments(&var, None, &details(), false, 10).is_err());
    }

    #[test]
    fn test_overlap_leaves_rows_unresolved() {
        let mut iteration = single();
        iteration.set_group(1, Some(1.0), Some(6.0), None).unwrap();
        let output = iteration
            .get_risk_segments(&variable(), None, &details(), false, 10)
            .unwrap();
        assert!(!output.is_valid());
        assert_eq!(output.unmapped_count(), 9);

        // The default view is untouched
        let baseline = iteration
            .get_risk_segments(&variable(), None, &details(), true, 10)
            .unwrap();
        assert!(baseline.is_valid());
    }

    #[test]
    fn test_add_and_remove_groups() {
        let var = variable();
        let groups: BTreeMap<usize, Group> = [(0, Group::interval(-1.0, 8.0))].into_iter().collect();
        let mut iteration = Iteration::new_single(IterationId::Real(1), "root", &var, LossRateType::Dlr, groups, details());
        assert_eq!(iteration.add_new_group().unwrap(), 1);
        assert_eq!(iteration.groups.get(1), Some(&Group::Interval(None, None)));
        iteration.remove_group(1).unwrap();
        assert!(!iteration.groups.contains(1));
        assert!(iteration.remove_group(0).is_err());

        let grid = RiskSegmentGrid::identity(vec![0], vec![0, 1, 2]);
        let groups: BTreeMap<usize, Group> = [(0, Group::interval(-1.0, 8.0))].into_iter().collect();
        let mut child = Iteration::new_double(IterationId::Real(2), "child", &var, LossRateType::Dlr, groups, grid);
        let added = child.add_new_group().unwrap();
        assert_eq!(added, 1);
        assert_eq!(child.grid(false).unwrap().get(1, 2), Some(2));
        child.remove_group(1).unwrap();
        assert!(child.groups.contains(1));
        assert!(!child.groups.is_active(1));
    }

    #[test]
    fn test_wrong_kind_operations() {
        let mut iteration = single();
        assert!(iteration.set_risk_segment_grid(vec![vec![0]], &details()).is_err());
        assert!(iteration.update_maf(LossRateType::Dlr, &[1.0, 1.5, 2.0]).is_ok());
        assert!(iteration.update_maf(LossRateType::Dlr, &[1.0]).is_err());
    }

    #[test]
    fn test_dict_round_trip() {
        let mut iteration = single();
        iteration.set_group(0, Some(-1.0), Some(1.5), None).unwrap();
        let restored = Iteration::from_dict(iteration.to_dict().unwrap()).unwrap();
        assert_eq!(restored, iteration);
        assert_eq!(restored.groups.get_default(0), Some(&Group::interval(-1.0, 2.0)));
    }
}
