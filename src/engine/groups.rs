//! Group definitions for an iteration
//!
//! A group is either a right-closed numeric interval `(lower, upper]` or a
//! set of category labels. A `GroupSet` keeps the edited groups, the default
//! snapshot taken when the iteration was created, and an active mask so that
//! groups can be hidden without renumbering.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// A single group.
///
/// Intervals serialize as a `[lower, upper]` pair, with infinite bounds
/// written as `"inf"` / `"-inf"` and missing bounds as `null`. Category sets
/// serialize as a list of labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Group {
    Interval(
        #[serde(with = "interval_bound")] Option<f64>,
        #[serde(with = "interval_bound")] Option<f64>,
    ),
    Categories(BTreeSet<String>),
}

/// JSON has no infinities, so open interval ends go through as strings
mod interval_bound {
    use serde::{de, Deserialize, Deserializer, Serializer};

    const POSITIVE: &str = "inf";
    const NEGATIVE: &str = "-inf";

    pub fn serialize<S: Serializer>(bound: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match bound {
            Some(v) if *v == f64::INFINITY => serializer.serialize_str(POSITIVE),
            Some(v) if *v == f64::NEG_INFINITY => serializer.serialize_str(NEGATIVE),
            Some(v) if !v.is_nan() => serializer.serialize_f64(*v),
            _ => serializer.serialize_none(),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawBound {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<RawBound>::deserialize(deserializer)? {
            None => Ok(None),
            Some(RawBound::Number(v)) => Ok(Some(v)),
            Some(RawBound::Text(text)) => match text.as_str() {
                POSITIVE => Ok(Some(f64::INFINITY)),
                NEGATIVE => Ok(Some(f64::NEG_INFINITY)),
                other => Err(de::Error::custom(format!("'{}' is not an interval bound", other))),
            },
        }
    }
}

impl Group {
    pub fn interval(lower: f64, upper: f64) -> Self {
        Group::Interval(Some(lower), Some(upper))
    }

    pub fn categories<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Group::Categories(labels.into_iter().map(Into::into).collect())
    }

    /// Both bounds, if present and not NaN
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Group::Interval(Some(lower), Some(upper)) if !lower.is_nan() && !upper.is_nan() => {
                Some((*lower, *upper))
            }
            _ => None,
        }
    }

    pub fn members(&self) -> Option<&BTreeSet<String>> {
        match self {
            Group::Categories(set) => Some(set),
            Group::Interval(..) => None,
        }
    }

    /// Whether a numeric value falls in `(lower, upper]`
    pub fn contains_value(&self, value: f64) -> bool {
        self.bounds()
            .map(|(lower, upper)| lower < value && value <= upper)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Group::Interval(lower, upper) => {
                let show = |b: &Option<f64>| {
                    b.map(|v| format!("{}", v))
                        .unwrap_or_else(|| "?".to_string())
                };
                write!(f, "({}, {}]", show(lower), show(upper))
            }
            Group::Categories(set) => {
                let labels: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
                write!(f, "{{{}}}", labels.join(", "))
            }
        }
    }
}

/// Edited groups, default snapshot and active mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSet {
    groups: BTreeMap<usize, Group>,
    default_groups: BTreeMap<usize, Group>,
    active: BTreeMap<usize, bool>,
}

impl GroupSet {
    /// New set whose default snapshot equals the given groups, all active.
    pub fn new(groups: BTreeMap<usize, Group>) -> Self {
        let active = groups.keys().map(|&k| (k, true)).collect();
        Self {
            default_groups: groups.clone(),
            groups,
            active,
        }
    }

    pub fn from_groups<I>(groups: I) -> Self
    where
        I: IntoIterator<Item = Group>,
    {
        Self::new(groups.into_iter().enumerate().collect())
    }

    /// Groups visible in the requested view, in index order.
    ///
    /// The default view is the full snapshot; the edited view is filtered by
    /// the active mask.
    pub fn view(&self, default: bool) -> Vec<(usize, &Group)> {
        if default {
            self.default_groups.iter().map(|(&k, g)| (k, g)).collect()
        } else {
            self.groups
                .iter()
                .filter(|(k, _)| self.is_active(**k))
                .map(|(&k, g)| (k, g))
                .collect()
        }
    }

    pub fn get(&self, index: usize) -> Option<&Group> {
        self.groups.get(&index)
    }

    pub fn get_default(&self, index: usize) -> Option<&Group> {
        self.default_groups.get(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.groups.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.groups.keys().copied().collect()
    }

    pub fn default_indices(&self) -> Vec<usize> {
        self.default_groups.keys().copied().collect()
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.groups.keys().copied().filter(|&k| self.is_active(k)).collect()
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active.get(&index).copied().unwrap_or(false)
    }

    /// Next unused index
    pub fn next_index(&self) -> usize {
        self.groups
            .keys()
            .chain(self.default_groups.keys())
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    /// Replace the bounds or members of an existing group.
    ///
    /// Interval groups need both bounds; with either bound missing the call
    /// is a no-op. Category groups accept any set, including an empty one.
    /// Returns whether the group changed.
    pub fn set_group(
        &mut self,
        index: usize,
        lower: Option<f64>,
        upper: Option<f64>,
        categories: Option<BTreeSet<String>>,
    ) -> EngineResult<bool> {
        let group = self
            .groups
            .get_mut(&index)
            .ok_or(EngineError::InvalidGroupIndex(index))?;

        let replacement = match group {
            Group::Interval(..) => match (lower, upper) {
                (Some(l), Some(u)) => Group::Interval(Some(l), Some(u)),
                _ => return Ok(false),
            },
            Group::Categories(_) => match categories {
                Some(set) => Group::Categories(set),
                None => return Ok(false),
            },
        };

        if *group == replacement {
            return Ok(false);
        }
        *group = replacement;
        Ok(true)
    }

    /// Add a group under a new index; it becomes active.
    pub fn insert_group(&mut self, index: usize, group: Group) -> EngineResult<()> {
        if self.groups.contains_key(&index) {
            return Err(EngineError::DuplicateGroupIndex(index));
        }
        self.groups.insert(index, group);
        self.active.insert(index, true);
        Ok(())
    }

    /// Delete a group outright.
    pub fn remove_group(&mut self, index: usize) -> EngineResult<Group> {
        if !self.groups.contains_key(&index) {
            return Err(EngineError::InvalidGroupIndex(index));
        }
        if self.groups.len() == 1 {
            return Err(EngineError::LastGroup { index });
        }
        self.active.remove(&index);
        self.groups
            .remove(&index)
            .ok_or(EngineError::InvalidGroupIndex(index))
    }

    /// Hide a group without renumbering.
    pub fn deactivate_group(&mut self, index: usize) -> EngineResult<()> {
        if !self.groups.contains_key(&index) {
            return Err(EngineError::InvalidGroupIndex(index));
        }
        if self.is_active(index) && self.active_indices().len() == 1 {
            return Err(EngineError::LastGroup { index });
        }
        self.active.insert(index, false);
        Ok(())
    }

    /// Make exactly the given groups active.
    pub fn select(&mut self, indices: &[usize]) -> EngineResult<()> {
        if indices.is_empty() {
            return Err(EngineError::EmptySelection);
        }
        if let Some(&missing) = indices.iter().find(|i| !self.groups.contains_key(i)) {
            return Err(EngineError::InvalidGroupIndex(missing));
        }
        for (index, flag) in self.active.iter_mut() {
            *flag = indices.contains(index);
        }
        Ok(())
    }

    /// Restore the edited view from the default snapshot.
    pub fn reset_to_default(&mut self) {
        self.groups = self.default_groups.clone();
        self.active = self.groups.keys().map(|&k| (k, true)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_set() -> GroupSet {
        GroupSet::from_groups(vec![
            Group::interval(-1.0, 10.0),
            Group::interval(10.0, 20.0),
            Group::interval(20.0, 30.0),
        ])
    }

    #[test]
    fn test_interval_is_right_closed() {
        let group = Group::interval(10.0, 20.0);
        assert!(!group.contains_value(10.0));
        assert!(group.contains_value(10.5));
        assert!(group.contains_value(20.0));
        assert!(!group.contains_value(20.5));
    }

    #[test]
    fn test_set_group_with_missing_bound_is_noop() {
        let mut set = numeric_set();
        assert!(!set.set_group(1, Some(12.0), None, None).unwrap());
        assert_eq!(set.get(1), Some(&Group::interval(10.0, 20.0)));

        assert!(set.set_group(1, Some(12.0), Some(22.0), None).unwrap());
        assert_eq!(set.get(1), Some(&Group::interval(12.0, 22.0)));
        // default snapshot untouched
        assert_eq!(set.get_default(1), Some(&Group::interval(10.0, 20.0)));
    }

    #[test]
    fn test_set_group_accepts_empty_category_set() {
        let mut set = GroupSet::from_groups(vec![Group::categories(["a", "b"]), Group::categories(["c"])]);
        assert!(set.set_group(0, None, None, Some(BTreeSet::new())).unwrap());
        assert_eq!(set.get(0), Some(&Group::Categories(BTreeSet::new())));
    }

    #[test]
    fn test_set_group_unknown_index() {
        let mut set = numeric_set();
        assert!(matches!(
            set.set_group(9, Some(0.0), Some(1.0), None),
            Err(EngineError::InvalidGroupIndex(9))
        ));
    }

    #[test]
    fn test_cannot_remove_last_group() {
        let mut set = GroupSet::from_groups(vec![Group::interval(0.0, 1.0)]);
        assert!(matches!(set.remove_group(0), Err(EngineError::LastGroup { .. })));
    }

    #[test]
    fn test_soft_removal_keeps_numbering() {
        let mut set = numeric_set();
        set.deactivate_group(1).unwrap();
        assert_eq!(set.active_indices(), vec![0, 2]);
        assert_eq!(set.indices(), vec![0, 1, 2]);
        assert_eq!(set.next_index(), 3);

        set.deactivate_group(0).unwrap();
        assert!(set.deactivate_group(2).is_err());
    }

    #[test]
    fn test_select_and_reset() {
        let mut set = numeric_set();
        assert!(set.select(&[]).is_err());
        assert!(set.select(&[0, 7]).is_err());

        set.select(&[2]).unwrap();
        assert_eq!(set.view(false).len(), 1);
        assert_eq!(set.view(true).len(), 3);

        set.reset_to_default();
        assert_eq!(set.active_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn test_group_serialization_shapes() {
        let interval = serde_json::to_value(Group::interval(0.5, 2.0)).unwrap();
        assert_eq!(interval, serde_json::json!([0.5, 2.0]));

        let missing: Group = serde_json::from_value(serde_json::json!([null, 3.0])).unwrap();
        assert_eq!(missing, Group::Interval(None, Some(3.0)));

        let cats: Group = serde_json::from_value(serde_json::json!(["x", "y"])).unwrap();
        assert_eq!(cats, Group::categories(["x", "y"]));

        let empty: Group = serde_json::from_value(serde_json::json!([])).unwrap();
        assert_eq!(empty, Group::Categories(BTreeSet::new()));
    }

    #[test]
    fn test_infinite_bounds_survive_json() {
        let open_low = Group::interval(f64::NEG_INFINITY, 4.0);
        let open_high = Group::interval(4.0, f64::INFINITY);

        let encoded = serde_json::to_value(&open_low).unwrap();
        assert_eq!(encoded, serde_json::json!(["-inf", 4.0]));
        assert_eq!(serde_json::to_value(&open_high).unwrap(), serde_json::json!([4.0, "inf"]));

        let text = serde_json::to_string(&vec![open_low.clone(), open_high.clone()]).unwrap();
        let restored: Vec<Group> = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, vec![open_low, open_high]);
        assert!(restored[1].contains_value(1e300));

        // Strings other than the two sentinels still read as labels
        let labels: Group = serde_json::from_value(serde_json::json!(["inf", "x"])).unwrap();
        assert_eq!(labels, Group::categories(["inf", "x"]));
    }
}
