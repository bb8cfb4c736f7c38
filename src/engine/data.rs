//! Variables and the data provider contract
//!
//! The engine never reads files itself. It asks a `DataProvider` for a
//! column (as a `Variable`) or a set of columns (as a polars `DataFrame`),
//! always aligned to the same row index.

use std::collections::BTreeSet;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};

/// How an iteration interprets its variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    Numerical,
    Categorical,
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableType::Numerical => write!(f, "numerical"),
            VariableType::Categorical => write!(f, "categorical"),
        }
    }
}

impl std::str::FromStr for VariableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "numerical" | "numeric" | "num" => Ok(VariableType::Numerical),
            "categorical" | "cat" => Ok(VariableType::Categorical),
            _ => Err(format!(
                "Unknown variable type: '{}'. Use 'numerical' or 'categorical'.",
                s
            )),
        }
    }
}

/// Source dtype of a categorical variable's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryDtype {
    Text,
    Integer,
    Boolean,
}

impl CategoryDtype {
    /// Whether a category label could have come from a column of this dtype.
    pub fn accepts(&self, label: &str) -> bool {
        match self {
            CategoryDtype::Text => true,
            CategoryDtype::Integer => label.trim().parse::<i64>().is_ok(),
            CategoryDtype::Boolean => matches!(label, "true" | "false"),
        }
    }
}

impl std::fmt::Display for CategoryDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryDtype::Text => write!(f, "text"),
            CategoryDtype::Integer => write!(f, "integer"),
            CategoryDtype::Boolean => write!(f, "boolean"),
        }
    }
}

/// Row values of a variable
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical {
        values: Vec<Option<String>>,
        /// Distinct non-missing values, sorted
        categories: Vec<String>,
        dtype: CategoryDtype,
    },
}

/// A named column loaded for an iteration
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub data: ColumnData,
}

impl Variable {
    /// Numeric variable; NaN is treated as missing.
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect();
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::categorical_with_dtype(name, values, CategoryDtype::Text)
    }

    pub fn categorical_with_dtype(
        name: impl Into<String>,
        values: Vec<Option<String>>,
        dtype: CategoryDtype,
    ) -> Self {
        let categories: BTreeSet<String> = values.iter().flatten().cloned().collect();
        Self {
            name: name.into(),
            data: ColumnData::Categorical {
                values,
                categories: categories.into_iter().collect(),
                dtype,
            },
        }
    }

    /// Convert a polars column into a variable of the requested type.
    pub fn from_column(column: &Column, kind: VariableType) -> EngineResult<Self> {
        let name = column.name().to_string();
        let dtype = column.dtype().clone();

        match kind {
            VariableType::Numerical => {
                if !dtype.is_primitive_numeric() {
                    return Err(EngineError::WrongColumnType {
                        column: name,
                        expected: "numerical",
                        found: dtype.to_string(),
                    });
                }
                let float_col = column.cast(&DataType::Float64)?;
                let values = float_col.f64()?.into_iter().collect();
                Ok(Self::numeric(name, values))
            }
            VariableType::Categorical => {
                let category_dtype = match dtype {
                    DataType::String | DataType::Categorical(_, _) => CategoryDtype::Text,
                    DataType::Boolean => CategoryDtype::Boolean,
                    DataType::Int8
                    | DataType::Int16
                    | DataType::Int32
                    | DataType::Int64
                    | DataType::UInt8
                    | DataType::UInt16
                    | DataType::UInt32
                    | DataType::UInt64 => CategoryDtype::Integer,
                    other => {
                        return Err(EngineError::WrongColumnType {
                            column: name,
                            expected: "categorical",
                            found: other.to_string(),
                        })
                    }
                };
                let string_col = column.cast(&DataType::String)?;
                let values = string_col
                    .str()?
                    .into_iter()
                    .map(|v| v.map(|s| s.to_string()))
                    .collect();
                Ok(Self::categorical_with_dtype(name, values, category_dtype))
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Categorical { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn variable_type(&self) -> VariableType {
        match &self.data {
            ColumnData::Numeric(_) => VariableType::Numerical,
            ColumnData::Categorical { .. } => VariableType::Categorical,
        }
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric(values) => Some(values),
            ColumnData::Categorical { .. } => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[Option<String>]> {
        match &self.data {
            ColumnData::Categorical { values, .. } => Some(values),
            ColumnData::Numeric(_) => None,
        }
    }

    pub fn categories(&self) -> Option<&[String]> {
        match &self.data {
            ColumnData::Categorical { categories, .. } => Some(categories),
            ColumnData::Numeric(_) => None,
        }
    }

    /// (min, max) of a numeric variable's non-missing values
    pub fn numeric_range(&self) -> Option<(f64, f64)> {
        let values = self.as_numeric()?;
        values.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// A column available from every active data source
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: DataType,
}

impl ColumnInfo {
    /// Whether an iteration of the given type can bind to this column
    pub fn supports(&self, kind: VariableType) -> bool {
        match kind {
            VariableType::Numerical => self.dtype.is_primitive_numeric(),
            VariableType::Categorical => {
                self.dtype.is_integer()
                    || matches!(
                        self.dtype,
                        DataType::String | DataType::Categorical(_, _) | DataType::Boolean
                    )
            }
        }
    }
}

/// Source of column data for the engine
pub trait DataProvider {
    /// Load one column as a variable of the requested type
    fn load_column(&self, name: &str, kind: VariableType) -> EngineResult<Variable>;

    /// Load several columns as a frame aligned to the same row index
    fn load_columns(&self, names: &[String]) -> EngineResult<DataFrame>;

    /// Columns present and type-compatible across all active sources
    fn common_columns(&self) -> Vec<ColumnInfo>;

    fn row_count(&self) -> usize;

    fn has_column(&self, name: &str, kind: VariableType) -> bool {
        self.common_columns()
            .iter()
            .any(|c| c.name == name && c.supports(kind))
    }
}

/// A named frame registered with a `FrameDataProvider`
#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub frame: DataFrame,
    pub active: bool,
}

/// Data provider over in-memory polars frames.
///
/// The combined view is the vertical concatenation of the active sources,
/// restricted to the columns they share with compatible types.
#[derive(Debug, Clone, Default)]
pub struct FrameDataProvider {
    sources: Vec<DataSource>,
    columns: Vec<ColumnInfo>,
    combined: Option<DataFrame>,
}

impl FrameDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider over a single frame
    pub fn from_frame(name: impl Into<String>, frame: DataFrame) -> EngineResult<Self> {
        let mut provider = Self::new();
        provider.add_source(name, frame)?;
        Ok(provider)
    }

    pub fn add_source(&mut self, name: impl Into<String>, frame: DataFrame) -> EngineResult<()> {
        self.sources.push(DataSource {
            name: name.into(),
            frame,
            active: true,
        });
        self.rebuild()
    }

    pub fn remove_source(&mut self, name: &str) -> EngineResult<bool> {
        let before = self.sources.len();
        self.sources.retain(|s| s.name != name);
        let removed = self.sources.len() != before;
        if removed {
            self.rebuild()?;
        }
        Ok(removed)
    }

    pub fn set_active(&mut self, name: &str, active: bool) -> EngineResult<()> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| EngineError::Config(format!("data source '{}' is not registered", name)))?;
        source.active = active;
        self.rebuild()
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    /// The combined frame, if any source is active
    pub fn frame(&self) -> Option<&DataFrame> {
        self.combined.as_ref()
    }

    fn rebuild(&mut self) -> EngineResult<()> {
        let active: Vec<&DataSource> = self.sources.iter().filter(|s| s.active).collect();
        let Some(first) = active.first() else {
            self.columns.clear();
            self.combined = None;
            return Ok(());
        };

        let mut columns = Vec::new();
        for column in first.frame.get_columns() {
            let name = column.name().to_string();
            let mut dtypes = Vec::with_capacity(active.len());
            for source in &active {
                match source.frame.column(&name) {
                    Ok(c) => dtypes.push(c.dtype().clone()),
                    Err(_) => break,
                }
            }
            if dtypes.len() != active.len() {
                continue;
            }
            if let Some(dtype) = unify_dtypes(&dtypes) {
                columns.push(ColumnInfo { name, dtype });
            }
        }

        let mut combined: Option<DataFrame> = None;
        for source in &active {
            let mut cast_columns = Vec::with_capacity(columns.len());
            for info in &columns {
                cast_columns.push(source.frame.column(&info.name)?.cast(&info.dtype)?);
            }
            let frame = DataFrame::new(cast_columns)?;
            match combined.as_mut() {
                None => combined = Some(frame),
                Some(acc) => {
                    acc.vstack_mut(&frame)?;
                }
            }
        }

        log::debug!(
            "Rebuilt data view: {} active source(s), {} common column(s)",
            active.len(),
            columns.len()
        );
        self.columns = columns;
        self.combined = combined;
        Ok(())
    }

    fn combined_column(&self, name: &str) -> EngineResult<&Column> {
        let frame = self
            .combined
            .as_ref()
            .ok_or_else(|| EngineError::ColumnNotFound(name.to_string()))?;
        if !self.columns.iter().any(|c| c.name == name) {
            return Err(EngineError::ColumnNotFound(name.to_string()));
        }
        Ok(frame.column(name)?)
    }
}

/// Common dtype for a column seen in several sources, if one exists
fn unify_dtypes(dtypes: &[DataType]) -> Option<DataType> {
    let first = dtypes.first()?;
    if dtypes.iter().all(|d| d == first) {
        return Some(first.clone());
    }
    if dtypes.iter().all(|d| d.is_primitive_numeric()) {
        if dtypes.iter().all(|d| d.is_integer()) {
            return Some(DataType::Int64);
        }
        return Some(DataType::Float64);
    }
    if dtypes
        .iter()
        .all(|d| matches!(d, DataType::String | DataType::Categorical(_, _)))
    {
        return Some(DataType::String);
    }
    None
}

impl DataProvider for FrameDataProvider {
    fn load_column(&self, name: &str, kind: VariableType) -> EngineResult<Variable> {
        let column = self.combined_column(name)?;
        Variable::from_column(column, kind)
    }

    fn load_columns(&self, names: &[String]) -> EngineResult<DataFrame> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            columns.push(self.combined_column(name)?.clone());
        }
        Ok(DataFrame::new(columns)?)
    }

    fn common_columns(&self) -> Vec<ColumnInfo> {
        self.columns.clone()
    }

    fn row_count(&self) -> usize {
        self.combined.as_ref().map(|f| f.height()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        df! {
            "score" => [1.0f64, 2.0, f64::NAN, 4.0],
            "region" => ["N", "S", "N", "E"],
            "flag" => [true, false, true, true],
            "grade" => [1i64, 2, 2, 3],
        }
        .unwrap()
    }

    #[test]
    fn test_numeric_column_treats_nan_as_missing() {
        let provider = FrameDataProvider::from_frame("main", sample_frame()).unwrap();
        let variable = provider.load_column("score", VariableType::Numerical).unwrap();
        assert_eq!(
            variable.as_numeric().unwrap(),
            &[Some(1.0), Some(2.0), None, Some(4.0)]
        );
        assert_eq!(variable.numeric_range(), Some((1.0, 4.0)));
    }

    #[test]
    fn test_categorical_column_records_dtype() {
        let provider = FrameDataProvider::from_frame("main", sample_frame()).unwrap();

        let region = provider.load_column("region", VariableType::Categorical).unwrap();
        assert_eq!(region.categories().unwrap(), &["E", "N", "S"]);

        let grade = provider.load_column("grade", VariableType::Categorical).unwrap();
        match grade.data {
            ColumnData::Categorical { dtype, .. } => assert_eq!(dtype, CategoryDtype::Integer),
            _ => panic!("expected categorical"),
        }
    }

    #[test]
    fn test_wrong_type_rejected() {
        let provider = FrameDataProvider::from_frame("main", sample_frame()).unwrap();
        let result = provider.load_column("region", VariableType::Numerical);
        assert!(matches!(result, Err(EngineError::WrongColumnType { .. })));
    }

    #[test]
    fn test_common_columns_across_sources() {
        let mut provider = FrameDataProvider::from_frame("a", sample_frame()).unwrap();
        let other = df! {
            "score" => [5i64, 6],
            "region" => ["W", "W"],
        }
        .unwrap();
        provider.add_source("b", other).unwrap();

        let names: Vec<String> = provider.common_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["score".to_string(), "region".to_string()]);
        assert_eq!(provider.row_count(), 6);
        assert!(provider.has_column("score", VariableType::Numerical));
        assert!(!provider.has_column("grade", VariableType::Categorical));

        provider.set_active("b", false).unwrap();
        assert_eq!(provider.row_count(), 4);
        assert!(provider.has_column("grade", VariableType::Categorical));
    }

    #[test]
    fn test_category_dtype_accepts() {
        assert!(CategoryDtype::Integer.accepts("12"));
        assert!(!CategoryDtype::Integer.accepts("twelve"));
        assert!(CategoryDtype::Boolean.accepts("true"));
        assert!(CategoryDtype::Text.accepts("anything"));
    }
}
