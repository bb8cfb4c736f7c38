//! Portfolio scalars
//!
//! The portfolio scalar converts current observed loss rates into
//! lifetime-equivalent rates: `lifetime_rate / current_rate`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use super::risk_segments::LossRateType;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioScalar {
    pub current_rate: f64,
    pub lifetime_rate: f64,
}

impl PortfolioScalar {
    pub fn new(current_rate: f64, lifetime_rate: f64) -> Self {
        Self {
            current_rate,
            lifetime_rate,
        }
    }

    /// Lifetime over current rate; 1.0 when the current rate is zero or unknown.
    pub fn portfolio_scalar(&self) -> f64 {
        if self.current_rate > 0.0 && self.lifetime_rate.is_finite() {
            self.lifetime_rate / self.current_rate
        } else {
            1.0
        }
    }
}

impl Default for PortfolioScalar {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Supplies the scalar for a loss rate type
pub trait ScalarProvider {
    fn get_scalar(&self, loss_rate: LossRateType) -> EngineResult<PortfolioScalar>;
}

/// Fixed scalars per loss rate type
#[derive(Debug, Clone, Default)]
pub struct StaticScalars {
    scalars: HashMap<LossRateType, PortfolioScalar>,
}

impl StaticScalars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loss_rate: LossRateType, scalar: PortfolioScalar) -> Self {
        self.scalars.insert(loss_rate, scalar);
        self
    }
}

impl ScalarProvider for StaticScalars {
    fn get_scalar(&self, loss_rate: LossRateType) -> EngineResult<PortfolioScalar> {
        self.scalars
            .get(&loss_rate)
            .copied()
            .ok_or_else(|| EngineError::Config(format!("no portfolio scalar configured for {}", loss_rate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portfolio_scalar_ratio() {
        assert_eq!(PortfolioScalar::new(0.02, 0.05).portfolio_scalar(), 2.5);
        assert_eq!(PortfolioScalar::new(0.0, 0.05).portfolio_scalar(), 1.0);
    }

    #[test]
    fn test_static_scalars_lookup() {
        let scalars = StaticScalars::new().with(LossRateType::Dlr, PortfolioScalar::new(0.01, 0.03));
        assert!(scalars.get_scalar(LossRateType::Dlr).is_ok());
        assert!(scalars.get_scalar(LossRateType::Ulr).is_err());
    }
}
