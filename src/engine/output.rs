//! Resolution results

use polars::prelude::*;

/// Result of resolving an iteration (or just its group mapping).
///
/// `values` is aligned to the variable's rows; `None` marks rows that no
/// valid group or segment claimed. `levels` lists the categories the column
/// ranges over: group indices for a group mapping, risk segment indices for
/// a risk-segment resolution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IterationOutput {
    pub values: Vec<Option<usize>>,
    pub levels: Vec<usize>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub invalid_groups: Vec<usize>,
}

impl IterationOutput {
    /// An output with every row unresolved
    pub fn unresolved(rows: usize, levels: Vec<usize>) -> Self {
        Self {
            values: vec![None; rows],
            levels,
            ..Default::default()
        }
    }

    /// True when no fatal validation error occurred
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row mask selecting one level
    pub fn mask_for(&self, level: usize) -> Vec<bool> {
        self.values.iter().map(|v| *v == Some(level)).collect()
    }

    /// Number of rows assigned to each level, in level order
    pub fn counts(&self) -> Vec<(usize, usize)> {
        self.levels
            .iter()
            .map(|&level| {
                let n = self.values.iter().filter(|v| **v == Some(level)).count();
                (level, n)
            })
            .collect()
    }

    pub fn unmapped_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Export as an integer column with nulls for unresolved rows
    pub fn to_column(&self, name: &str) -> Column {
        let values: Vec<Option<u32>> = self.values.iter().map(|v| v.map(|x| x as u32)).collect();
        Column::new(name.into(), values)
    }

    /// Export as a text column, labelling each level with `label`
    pub fn to_labeled_column<F>(&self, name: &str, label: F) -> Column
    where
        F: Fn(usize) -> String,
    {
        let values: Vec<Option<String>> = self.values.iter().map(|v| v.map(&label)).collect();
        Column::new(name.into(), values)
    }
}
