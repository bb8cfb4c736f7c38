//! Engine configuration
//!
//! `EngineConfig` is built once at start-up (from defaults or a TOML file)
//! and handed by reference to whatever needs it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::risk_segments::{LossRateType, RiskSegment, RiskSegmentDetails};

/// Numerator/denominator column pair defining a loss rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateColumns {
    pub numerator: String,
    pub denominator: String,
}

/// Column names for both loss rate definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossRateColumns {
    pub dlr: RateColumns,
    pub ulr: RateColumns,
}

impl LossRateColumns {
    pub fn get(&self, loss_rate: LossRateType) -> &RateColumns {
        match loss_rate {
            LossRateType::Dlr => &self.dlr,
            LossRateType::Ulr => &self.ulr,
        }
    }
}

impl Default for LossRateColumns {
    fn default() -> Self {
        Self {
            dlr: RateColumns {
                numerator: "bad_balance".to_string(),
                denominator: "balance".to_string(),
            },
            ulr: RateColumns {
                numerator: "bad_count".to_string(),
                denominator: "count".to_string(),
            },
        }
    }
}

/// A risk segment as written in a configuration file.
/// An omitted `upper_rate` means "unbounded".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSegmentSpec {
    pub name: String,
    #[serde(default)]
    pub upper_rate: Option<f64>,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default = "default_maf")]
    pub maf_dlr: f64,
    #[serde(default = "default_maf")]
    pub maf_ulr: f64,
}

fn default_font_color() -> String {
    "#000000".to_string()
}

fn default_background_color() -> String {
    "#FFFFFF".to_string()
}

fn default_maf() -> f64 {
    1.0
}

/// Immutable engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum depth of an iteration tree (a root has depth 1)
    pub max_iteration_depth: usize,
    /// Maximum distinct values a categorical variable may have
    pub max_categorical_cardinality: usize,
    /// Cap on the forward/backward fixed-point loop of numeric auto-banding
    pub auto_band_max_iterations: usize,
    /// How many segments a double-variable iteration may move a slice towards lower risk
    pub upgrade_limit: usize,
    /// How many segments a double-variable iteration may move a slice towards higher risk
    pub downgrade_limit: usize,
    /// Observation window used to annualise observed bad rates
    pub months_on_book: f64,
    /// Number of distinct uncovered values listed in a coverage warning
    pub uncovered_values_preview: usize,
    pub loss_rates: LossRateColumns,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risk_segments: Vec<RiskSegmentSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iteration_depth: 5,
            max_categorical_cardinality: 100,
            auto_band_max_iterations: 100,
            upgrade_limit: 1,
            downgrade_limit: 1,
            months_on_book: 12.0,
            uncovered_values_preview: 10,
            loss_rates: LossRateColumns::default(),
            risk_segments: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_toml_file(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_iteration_depth == 0 {
            return Err(EngineError::Config(
                "max_iteration_depth must be at least 1".to_string(),
            ));
        }
        if self.auto_band_max_iterations == 0 {
            return Err(EngineError::Config(
                "auto_band_max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.months_on_book > 0.0) {
            return Err(EngineError::Config(format!(
                "months_on_book must be positive, got {}",
                self.months_on_book
            )));
        }
        self.risk_segment_details()?;
        Ok(())
    }

    /// The default risk segment table: the configured one, or the standard
    /// eight tiers when none is configured.
    pub fn risk_segment_details(&self) -> EngineResult<RiskSegmentDetails> {
        if self.risk_segments.is_empty() {
            return Ok(RiskSegmentDetails::standard());
        }
        let rows = self
            .risk_segments
            .iter()
            .enumerate()
            .map(|(index, spec)| RiskSegment {
                index,
                name: spec.name.clone(),
                lower_rate: 0.0,
                upper_rate: spec.upper_rate.unwrap_or(f64::INFINITY),
                font_color: spec.font_color.clone(),
                background_color: spec.background_color.clone(),
                maf_dlr: spec.maf_dlr,
                maf_ulr: spec.maf_ulr,
            })
            .collect();
        RiskSegmentDetails::new(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk_segment_details().unwrap().len(), 8);
    }

    #[test]
    fn test_parse_toml_with_segments() {
        let text = r#"
max_iteration_depth = 3
downgrade_limit = 2

[loss_rates.dlr]
numerator = "co_amt"
denominator = "bal"

[loss_rates.ulr]
numerator = "co_cnt"
denominator = "cnt"

[[risk_segments]]
name = "Low"
upper_rate = 0.02

[[risk_segments]]
name = "High"
maf_dlr = 1.4
"#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.max_iteration_depth, 3);
        assert_eq!(config.downgrade_limit, 2);
        assert_eq!(config.upgrade_limit, 1);
        assert_eq!(config.loss_rates.get(LossRateType::Dlr).numerator, "co_amt");

        let details = config.risk_segment_details().unwrap();
        assert_eq!(details.len(), 2);
        assert!(details.rows()[1].upper_rate.is_infinite());
        assert_eq!(details.rows()[1].maf_dlr, 1.4);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let result = EngineConfig::from_toml_str("max_iteration_depth = 0");
        assert!(result.is_err());
    }
}
