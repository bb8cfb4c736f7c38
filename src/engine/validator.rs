//! Group validation and row-to-group mapping
//!
//! Validation produces two kinds of findings:
//! - errors (overlapping intervals, a category claimed by several groups)
//!   make the mapping ambiguous, so no row is mapped at all;
//! - warnings (missing or inverted bounds, empty or unknown categories,
//!   non-monotonic bounds, uncovered values, unassigned categories) are
//!   advisory, and mapping proceeds with the groups not marked invalid.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::data::{ColumnData, Variable};
use super::groups::Group;
use super::output::IterationOutput;

/// Findings of a validation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub invalid_groups: BTreeSet<usize>,
}

impl ValidationReport {
    pub fn is_usable(&self) -> bool {
        self.errors.is_empty()
    }

    fn invalid(&mut self, index: usize, warning: String) {
        self.invalid_groups.insert(index);
        self.warnings.push(warning);
    }
}

/// Validate groups against the variable they partition.
///
/// `preview` caps how many offending values are listed in coverage warnings.
pub fn validate_groups(groups: &[(usize, &Group)], variable: &Variable, preview: usize) -> ValidationReport {
    match &variable.data {
        ColumnData::Numeric(values) => validate_numeric(groups, values, preview),
        ColumnData::Categorical {
            categories, dtype, ..
        } => {
            let mut report = ValidationReport::default();
            let known: BTreeSet<&str> = categories.iter().map(|s| s.as_str()).collect();
            let mut owners: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

            for &(index, group) in groups {
                let members = match group {
                    Group::Interval(..) => {
                        report.invalid(index, format!("Group {} is not a set of categories", index));
                        continue;
                    }
                    Group::Categories(members) => members,
                };
                if members.is_empty() {
                    report.invalid(index, format!("Group {} is empty", index));
                    continue;
                }
                for member in members {
                    if !dtype.accepts(member) {
                        report.invalid(
                            index,
                            format!(
                                "Group {}: '{}' does not match the {} categories of '{}'",
                                index, member, dtype, variable.name
                            ),
                        );
                    } else if !known.contains(member.as_str()) {
                        report.invalid(
                            index,
                            format!(
                                "Group {}: '{}' is not a category of '{}'",
                                index, member, variable.name
                            ),
                        );
                    }
                    owners.entry(member.as_str()).or_default().push(index);
                }
            }

            for (member, indices) in &owners {
                if indices.len() > 1 {
                    report.errors.push(format!(
                        "Category '{}' is assigned to more than one group: {:?}",
                        member, indices
                    ));
                }
            }

            // Members of invalid groups map no rows, so they count as unassigned
            let unassigned: Vec<&str> = known
                .iter()
                .copied()
                .filter(|c| {
                    !owners.get(c).is_some_and(|indices| {
                        indices.iter().any(|i| !report.invalid_groups.contains(i))
                    })
                })
                .collect();
            if !unassigned.is_empty() {
                report.warnings.push(format!(
                    "{} categor{} not assigned to any valid group: {}",
                    unassigned.len(),
                    if unassigned.len() == 1 { "y is" } else { "ies are" },
                    preview_list(&unassigned, preview)
                ));
            }

            report
        }
    }
}

fn validate_numeric(groups: &[(usize, &Group)], values: &[Option<f64>], preview: usize) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut valid: Vec<(usize, f64, f64)> = Vec::new();

    for &(index, group) in groups {
        match group {
            Group::Categories(_) => {
                report.invalid(index, format!("Group {} is not a numeric interval", index));
            }
            Group::Interval(..) => match group.bounds() {
                None => report.invalid(index, format!("Group {} has a missing bound", index)),
                Some((lower, upper)) if lower >= upper => report.invalid(
                    index,
                    format!(
                        "Group {}: lower bound {} is not below upper bound {}",
                        index, lower, upper
                    ),
                ),
                Some((lower, upper)) => valid.push((index, lower, upper)),
            },
        }
    }

    // Overlaps: with intervals sorted by lower bound, (a, b] and (c, d]
    // with a <= c intersect iff c < b.
    let mut sorted = valid.clone();
    sorted.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.2.total_cmp(&y.2)));
    for (i, &(first, lower_a, upper_a)) in sorted.iter().enumerate() {
        for &(second, lower_b, upper_b) in &sorted[i + 1..] {
            if lower_b >= upper_a {
                break;
            }
            report.errors.push(format!(
                "Groups {} and {} overlap: ({}, {}] and ({}, {}]",
                first, second, lower_a, upper_a, lower_b, upper_b
            ));
        }
    }

    let lowers: Vec<f64> = valid.iter().map(|v| v.1).collect();
    let uppers: Vec<f64> = valid.iter().map(|v| v.2).collect();
    if !is_monotonic(&lowers) {
        report.warnings.push("Lower bounds are not monotonic".to_string());
    }
    if !is_monotonic(&uppers) {
        report.warnings.push("Upper bounds are not monotonic".to_string());
    }

    let mut uncovered: Vec<f64> = values
        .iter()
        .flatten()
        .copied()
        .filter(|&v| !valid.iter().any(|&(_, lower, upper)| lower < v && v <= upper))
        .collect();
    uncovered.sort_by(|a, b| a.total_cmp(b));
    uncovered.dedup();
    if !uncovered.is_empty() {
        let shown: Vec<String> = uncovered.iter().map(|v| v.to_string()).collect();
        report.warnings.push(format!(
            "{} value{} not covered by any group: {}",
            uncovered.len(),
            if uncovered.len() == 1 { " is" } else { "s are" },
            preview_list(&shown, preview)
        ));
    }

    report
}

/// Non-decreasing or non-increasing
pub fn is_monotonic(values: &[f64]) -> bool {
    let ascending = values.windows(2).all(|w| w[0] <= w[1]);
    let descending = values.windows(2).all(|w| w[0] >= w[1]);
    ascending || descending
}

fn preview_list<S: AsRef<str>>(items: &[S], preview: usize) -> String {
    let shown: Vec<&str> = items.iter().take(preview).map(|s| s.as_ref()).collect();
    let mut text = format!("[{}]", shown.join(", "));
    if items.len() > preview {
        text.push_str(&format!(" and {} more", items.len() - preview));
    }
    text
}

/// Validate, then assign each row to the group that contains it.
///
/// Any validation error leaves every row unmapped. Otherwise rows are
/// mapped using only the groups not flagged invalid; rows no group claims
/// stay `None`. The output levels are the group indices.
pub fn get_group_mapping(groups: &[(usize, &Group)], variable: &Variable, preview: usize) -> IterationOutput {
    let report = validate_groups(groups, variable, preview);
    let levels: Vec<usize> = groups.iter().map(|(index, _)| *index).collect();
    let usable: Vec<(usize, &Group)> = groups
        .iter()
        .filter(|(index, _)| !report.invalid_groups.contains(index))
        .map(|&(index, group)| (index, group))
        .collect();

    let mut output = IterationOutput::unresolved(variable.len(), levels);
    output.invalid_groups = report.invalid_groups.iter().copied().collect();
    output.warnings = report.warnings;
    output.errors = report.errors;
    if !output.errors.is_empty() {
        return output;
    }

    match &variable.data {
        ColumnData::Numeric(values) => {
            for (slot, value) in output.values.iter_mut().zip(values) {
                if let Some(v) = value {
                    *slot = usable
                        .iter()
                        .find(|(_, group)| group.contains_value(*v))
                        .map(|(index, _)| *index);
                }
            }
        }
        ColumnData::Categorical { values, .. } => {
            let mut lookup: HashMap<&str, usize> = HashMap::new();
            for (index, group) in &usable {
                if let Some(members) = group.members() {
                    for member in members {
                        lookup.insert(member.as_str(), *index);
                    }
                }
            }
            for (slot, value) in output.values.iter_mut().zip(values) {
                if let Some(label) = value {
                    *slot = lookup.get(label.as_str()).copied();
                }
            }
        }
    }

    output
}
