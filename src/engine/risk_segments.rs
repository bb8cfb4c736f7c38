//! Risk segment table
//!
//! A risk segment (risk tier) is an ordered bucket of the population ranked
//! by expected loss rate. The table is kept sorted by the upper annualised
//! bad-rate bound, and each row's lower bound equals the previous row's
//! upper bound (the first row starts at zero).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{EngineError, EngineResult};

/// Loss rate definition used for banding and metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LossRateType {
    /// Dollar-weighted loss rate
    #[default]
    Dlr,
    /// Unit (count) weighted loss rate
    Ulr,
}

impl std::fmt::Display for LossRateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LossRateType::Dlr => write!(f, "DLR"),
            LossRateType::Ulr => write!(f, "ULR"),
        }
    }
}

impl std::str::FromStr for LossRateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dlr" => Ok(LossRateType::Dlr),
            "ulr" => Ok(LossRateType::Ulr),
            _ => Err(format!("Unknown loss rate type: '{}'. Use 'dlr' or 'ulr'.", s)),
        }
    }
}

/// Which color column of the table to update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    Font,
    Background,
}

/// One row of the risk segment table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSegment {
    /// Stable segment index, shared by every table derived from the same source
    pub index: usize,
    pub name: String,
    pub lower_rate: f64,
    pub upper_rate: f64,
    pub font_color: String,
    pub background_color: String,
    /// Maturity adjustment factor for the dollar-weighted loss rate
    pub maf_dlr: f64,
    /// Maturity adjustment factor for the unit-weighted loss rate
    pub maf_ulr: f64,
}

impl RiskSegment {
    pub fn new(index: usize, name: impl Into<String>, upper_rate: f64) -> Self {
        Self {
            index,
            name: name.into(),
            lower_rate: 0.0,
            upper_rate,
            font_color: "#000000".to_string(),
            background_color: "#FFFFFF".to_string(),
            maf_dlr: 1.0,
            maf_ulr: 1.0,
        }
    }

    pub fn maf(&self, loss_rate: LossRateType) -> f64 {
        match loss_rate {
            LossRateType::Dlr => self.maf_dlr,
            LossRateType::Ulr => self.maf_ulr,
        }
    }

    fn same_presentation(&self, other: &RiskSegment) -> bool {
        self.font_color == other.font_color
            && self.background_color == other.background_color
            && self.maf_dlr == other.maf_dlr
            && self.maf_ulr == other.maf_ulr
    }
}

/// Ordered table of risk segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TightTable", into = "TightTable")]
pub struct RiskSegmentDetails {
    rows: Vec<RiskSegment>,
}

impl RiskSegmentDetails {
    /// Build a table, sorting rows by upper bound and recomputing lower bounds.
    pub fn new(mut rows: Vec<RiskSegment>) -> EngineResult<Self> {
        if rows.is_empty() {
            return Err(EngineError::InvalidRiskSegments(
                "at least one risk segment is required".to_string(),
            ));
        }
        if let Some(row) = rows.iter().find(|r| r.upper_rate.is_nan()) {
            return Err(EngineError::InvalidRiskSegments(format!(
                "segment '{}' has no upper rate bound",
                row.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for row in &rows {
            if !seen.insert(row.index) {
                return Err(EngineError::InvalidRiskSegments(format!(
                    "segment index {} appears more than once",
                    row.index
                )));
            }
        }

        rows.sort_by(|a, b| a.upper_rate.total_cmp(&b.upper_rate));
        let mut previous_upper = 0.0;
        for row in rows.iter_mut() {
            row.lower_rate = previous_upper;
            previous_upper = row.upper_rate;
        }

        Ok(Self { rows })
    }

    /// The built-in eight-tier table used when no configuration is given.
    pub fn standard() -> Self {
        let tiers: [(&str, f64, &str); 8] = [
            ("RS1", 0.01, "#1A9850"),
            ("RS2", 0.02, "#66BD63"),
            ("RS3", 0.03, "#A6D96A"),
            ("RS4", 0.05, "#D9EF8B"),
            ("RS5", 0.08, "#FEE08B"),
            ("RS6", 0.12, "#FDAE61"),
            ("RS7", 0.20, "#F46D43"),
            ("RS8", f64::INFINITY, "#D73027"),
        ];
        let mut previous_upper = 0.0;
        let rows = tiers
            .iter()
            .enumerate()
            .map(|(index, (name, upper, color))| {
                let mut row = RiskSegment::new(index, *name, *upper);
                row.lower_rate = previous_upper;
                row.background_color = color.to_string();
                previous_upper = *upper;
                row
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[RiskSegment] {
        &self.rows
    }

    /// Segment indices in table (risk) order
    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }

    pub fn get(&self, index: usize) -> Option<&RiskSegment> {
        self.rows.iter().find(|r| r.index == index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Position of a segment in risk order
    pub fn position(&self, index: usize) -> Option<usize> {
        self.rows.iter().position(|r| r.index == index)
    }

    pub fn name(&self, index: usize) -> String {
        self.get(index)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| index.to_string())
    }

    /// Keep only the given segments; bounds are re-chained.
    pub fn subset(&self, indices: &[usize]) -> EngineResult<Self> {
        let mut rows = Vec::with_capacity(indices.len());
        for &index in indices {
            let row = self
                .get(index)
                .ok_or(EngineError::UnknownRiskSegment(index))?;
            rows.push(row.clone());
        }
        Self::new(rows)
    }

    /// Replace a MAF column by position.
    pub fn update_maf(&mut self, loss_rate: LossRateType, values: &[f64]) -> EngineResult<()> {
        self.check_length(values.len())?;
        for (row, &value) in self.rows.iter_mut().zip(values) {
            match loss_rate {
                LossRateType::Dlr => row.maf_dlr = value,
                LossRateType::Ulr => row.maf_ulr = value,
            }
        }
        Ok(())
    }

    /// Replace a color column by position.
    pub fn update_color(&mut self, kind: ColorKind, values: &[String]) -> EngineResult<()> {
        self.check_length(values.len())?;
        for (row, value) in self.rows.iter_mut().zip(values) {
            match kind {
                ColorKind::Font => row.font_color = value.clone(),
                ColorKind::Background => row.background_color = value.clone(),
            }
        }
        Ok(())
    }

    /// Copy colors and MAFs from `source` for every segment present in both
    /// tables. Segment identity and rate bounds are left untouched.
    ///
    /// Returns `true` if anything changed.
    pub fn sync_presentation(&mut self, source: &RiskSegmentDetails) -> bool {
        let mut changed = false;
        for row in self.rows.iter_mut() {
            if let Some(src) = source.get(row.index) {
                if !row.same_presentation(src) {
                    row.font_color = src.font_color.clone();
                    row.background_color = src.background_color.clone();
                    row.maf_dlr = src.maf_dlr;
                    row.maf_ulr = src.maf_ulr;
                    changed = true;
                }
            }
        }
        changed
    }

    fn check_length(&self, found: usize) -> EngineResult<()> {
        if found != self.rows.len() {
            return Err(EngineError::LengthMismatch {
                expected: self.rows.len(),
                found,
            });
        }
        Ok(())
    }
}

impl Default for RiskSegmentDetails {
    fn default() -> Self {
        Self::standard()
    }
}

const TABLE_COLUMNS: [&str; 7] = [
    "name",
    "lower_rate",
    "upper_rate",
    "font_color",
    "background_color",
    "maf_dlr",
    "maf_ulr",
];

/// Tabular dump of a risk segment table: `{index, columns, data}`.
/// Non-finite numbers are written as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TightTable {
    pub index: Vec<usize>,
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

fn encode_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn decode_number(value: &Value, null_as: f64, column: &str) -> EngineResult<f64> {
    match value {
        Value::Null => Ok(null_as),
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            EngineError::InvalidRiskSegments(format!("column '{}' holds a non-float number", column))
        }),
        other => Err(EngineError::InvalidRiskSegments(format!(
            "column '{}' expects a number, found {}",
            column, other
        ))),
    }
}

fn decode_text(value: &Value, column: &str) -> EngineResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(EngineError::InvalidRiskSegments(format!(
            "column '{}' expects text, found {}",
            column, other
        ))),
    }
}

impl From<RiskSegmentDetails> for TightTable {
    fn from(details: RiskSegmentDetails) -> Self {
        let index = details.rows.iter().map(|r| r.index).collect();
        let data = details
            .rows
            .iter()
            .map(|r| {
                vec![
                    Value::String(r.name.clone()),
                    encode_number(r.lower_rate),
                    encode_number(r.upper_rate),
                    Value::String(r.font_color.clone()),
                    Value::String(r.background_color.clone()),
                    encode_number(r.maf_dlr),
                    encode_number(r.maf_ulr),
                ]
            })
            .collect();
        TightTable {
            index,
            columns: TABLE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            data,
        }
    }
}

impl TryFrom<TightTable> for RiskSegmentDetails {
    type Error = EngineError;

    fn try_from(table: TightTable) -> EngineResult<Self> {
        if table.index.len() != table.data.len() {
            return Err(EngineError::LengthMismatch {
                expected: table.index.len(),
                found: table.data.len(),
            });
        }

        let position = |name: &str| -> EngineResult<usize> {
            table
                .columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| EngineError::InvalidRiskSegments(format!("missing column '{}'", name)))
        };
        let [name_col, lower_col, upper_col, font_col, bg_col, dlr_col, ulr_col] = [
            position(TABLE_COLUMNS[0])?,
            position(TABLE_COLUMNS[1])?,
            position(TABLE_COLUMNS[2])?,
            position(TABLE_COLUMNS[3])?,
            position(TABLE_COLUMNS[4])?,
            position(TABLE_COLUMNS[5])?,
            position(TABLE_COLUMNS[6])?,
        ];

        let mut rows = Vec::with_capacity(table.data.len());
        for (&index, record) in table.index.iter().zip(&table.data) {
            if record.len() != table.columns.len() {
                return Err(EngineError::LengthMismatch {
                    expected: table.columns.len(),
                    found: record.len(),
                });
            }
            rows.push(RiskSegment {
                index,
                name: decode_text(&record[name_col], "name")?,
                lower_rate: decode_number(&record[lower_col], f64::NEG_INFINITY, "lower_rate")?,
                upper_rate: decode_number(&record[upper_col], f64::INFINITY, "upper_rate")?,
                font_color: decode_text(&record[font_col], "font_color")?,
                background_color: decode_text(&record[bg_col], "background_color")?,
                maf_dlr: decode_number(&record[dlr_col], f64::INFINITY, "maf_dlr")?,
                maf_ulr: decode_number(&record[ulr_col], f64::INFINITY, "maf_ulr")?,
            });
        }

        RiskSegmentDetails::new(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_sorted_and_chained() {
        let details = RiskSegmentDetails::new(vec![
            RiskSegment::new(2, "C", 0.10),
            RiskSegment::new(0, "A", 0.02),
            RiskSegment::new(1, "B", 0.05),
        ])
        .unwrap();

        assert_eq!(details.indices(), vec![0, 1, 2]);
        assert_eq!(details.rows()[0].lower_rate, 0.0);
        assert_eq!(details.rows()[1].lower_rate, 0.02);
        assert_eq!(details.rows()[2].lower_rate, 0.05);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let result = RiskSegmentDetails::new(vec![
            RiskSegment::new(0, "A", 0.02),
            RiskSegment::new(0, "B", 0.05),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subset_rechains_bounds() {
        let details = RiskSegmentDetails::standard();
        let subset = details.subset(&[1, 3, 7]).unwrap();
        assert_eq!(subset.indices(), vec![1, 3, 7]);
        assert_eq!(subset.rows()[0].lower_rate, 0.0);
        assert_eq!(subset.rows()[1].lower_rate, 0.02);
        assert!(details.subset(&[42]).is_err());
    }

    #[test]
    fn test_update_maf_requires_matching_length() {
        let mut details = RiskSegmentDetails::standard();
        assert!(details.update_maf(LossRateType::Dlr, &[1.0, 2.0]).is_err());

        let values: Vec<f64> = (0..details.len()).map(|i| 1.0 + i as f64 / 10.0).collect();
        details.update_maf(LossRateType::Ulr, &values).unwrap();
        assert_eq!(details.rows()[3].maf_ulr, 1.3);
        assert_eq!(details.rows()[3].maf_dlr, 1.0);
    }

    #[test]
    fn test_sync_presentation_reports_changes() {
        let global = RiskSegmentDetails::standard();
        let mut local = global.subset(&[0, 1, 2]).unwrap();
        assert!(!local.sync_presentation(&global));

        let mut edited = global.clone();
        edited
            .update_color(ColorKind::Font, &vec!["#123456".to_string(); edited.len()])
            .unwrap();
        assert!(local.sync_presentation(&edited));
        assert_eq!(local.rows()[0].font_color, "#123456");
        assert_eq!(local.len(), 3);
    }

    #[test]
    fn test_tight_table_writes_infinity_as_null() {
        let details = RiskSegmentDetails::standard();
        let json = serde_json::to_value(&details).unwrap();
        let last = json["data"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last[2], Value::Null);

        let decoded: RiskSegmentDetails = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, details);
        assert!(decoded.rows().last().unwrap().upper_rate.is_infinite());
    }

    #[test]
    fn test_loss_rate_type_from_str() {
        assert_eq!("dlr".parse::<LossRateType>().unwrap(), LossRateType::Dlr);
        assert_eq!("ULR".parse::<LossRateType>().unwrap(), LossRateType::Ulr);
        assert!("xlr".parse::<LossRateType>().is_err());
    }
}
