//! Row filters
//!
//! A filter is a single comparison `column OP value`, e.g. `balance > 0` or
//! `region == 'N'`. Filters are parsed when defined so malformed text fails
//! immediately; masks AND the requested filters together.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::data::DataProvider;
use super::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOp {
    /// Longest symbols first so `>=` is not read as `>`
    const SYMBOLS: [(&'static str, FilterOp); 7] = [
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        ("!=", FilterOp::Ne),
        ("==", FilterOp::Eq),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
        ("=", FilterOp::Eq),
    ];

    fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            FilterOp::Eq => ordering == Equal,
            FilterOp::Ne => ordering != Equal,
            FilterOp::Gt => ordering == Greater,
            FilterOp::Ge => ordering != Less,
            FilterOp::Lt => ordering == Less,
            FilterOp::Le => ordering != Greater,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
        };
        write!(f, "{}", symbol)
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::SYMBOLS
            .iter()
            .find(|(symbol, _)| *symbol == s.trim())
            .map(|(_, op)| *op)
            .ok_or_else(|| format!("Unknown comparison operator '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Number(n) => write!(f, "{}", n),
            FilterValue::Text(t) => write!(f, "'{}'", t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub id: String,
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterDefinition {
    /// Parse `column OP value`. Quoted values are text; anything else that
    /// parses as a number is numeric.
    pub fn parse(id: impl Into<String>, text: &str) -> EngineResult<Self> {
        let malformed = |reason: &str| EngineError::MalformedFilter {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let (position, symbol, op) = FilterOp::SYMBOLS
            .iter()
            .filter_map(|(symbol, op)| text.find(*symbol).map(|p| (p, *symbol, *op)))
            .min_by_key(|(p, symbol, _)| (*p, std::cmp::Reverse(symbol.len())))
            .ok_or_else(|| malformed("expected a comparison operator"))?;

        let column = text[..position].trim();
        let raw = text[position + symbol.len()..].trim();
        if column.is_empty() {
            return Err(malformed("missing column name"));
        }
        if raw.is_empty() {
            return Err(malformed("missing value"));
        }

        let quoted = raw.len() >= 2
            && ((raw.starts_with('\'') && raw.ends_with('\'')) || (raw.starts_with('"') && raw.ends_with('"')));
        let value = if quoted {
            FilterValue::Text(raw[1..raw.len() - 1].to_string())
        } else if let Ok(number) = raw.parse::<f64>() {
            FilterValue::Number(number)
        } else {
            FilterValue::Text(raw.to_string())
        };

        Ok(Self {
            id: id.into(),
            column: column.to_string(),
            op,
            value,
        })
    }

    /// Row mask over `frame`; missing values never match.
    pub fn evaluate(&self, frame: &DataFrame) -> EngineResult<Vec<bool>> {
        let column = frame
            .column(&self.column)
            .map_err(|_| EngineError::ColumnNotFound(self.column.clone()))?;
        let mask = match &self.value {
            FilterValue::Number(target) => {
                let values = column.cast(&DataType::Float64)?;
                values
                    .f64()?
                    .into_iter()
                    .map(|v| {
                        v.filter(|x| !x.is_nan())
                            .map(|x| self.op.holds(x.total_cmp(target)))
                            .unwrap_or(false)
                    })
                    .collect()
            }
            FilterValue::Text(target) => {
                let values = column.cast(&DataType::String)?;
                values
                    .str()?
                    .into_iter()
                    .map(|v| v.map(|s| self.op.holds(s.cmp(target.as_str()))).unwrap_or(false))
                    .collect()
            }
        };
        Ok(mask)
    }
}

impl fmt::Display for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value)
    }
}

/// Supplies row masks for filter ids
pub trait FilterProvider {
    /// Logical AND of the given filters; all rows when none are given
    fn get_mask(&self, data: &dyn DataProvider, filter_ids: &[String]) -> EngineResult<Vec<bool>>;
}

/// Named filter definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    filters: BTreeMap<String, FilterDefinition>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and store a filter, replacing any previous one with the same id
    pub fn define(&mut self, id: &str, text: &str) -> EngineResult<&FilterDefinition> {
        let definition = FilterDefinition::parse(id, text)?;
        self.filters.insert(id.to_string(), definition);
        Ok(&self.filters[id])
    }

    /// Like `define`, but also require the column to exist in `data`
    pub fn define_checked(&mut self, id: &str, text: &str, data: &dyn DataProvider) -> EngineResult<&FilterDefinition> {
        let definition = FilterDefinition::parse(id, text)?;
        if !data.common_columns().iter().any(|c| c.name == definition.column) {
            return Err(EngineError::ColumnNotFound(definition.column));
        }
        self.filters.insert(id.to_string(), definition);
        Ok(&self.filters[id])
    }

    pub fn remove(&mut self, id: &str) -> Option<FilterDefinition> {
        self.filters.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&FilterDefinition> {
        self.filters.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.filters.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FilterProvider for FilterSet {
    fn get_mask(&self, data: &dyn DataProvider, filter_ids: &[String]) -> EngineResult<Vec<bool>> {
        let mut mask = vec![true; data.row_count()];
        for id in filter_ids {
            let definition = self
                .filters
                .get(id)
                .ok_or_else(|| EngineError::UnknownFilter(id.clone()))?;
            let frame = data.load_columns(std::slice::from_ref(&definition.column))?;
            let rows = definition.evaluate(&frame)?;
            for (keep, row) in mask.iter_mut().zip(rows) {
                *keep &= row;
            }
        }
        Ok(mask)
    }
}
