//! Iteration identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an iteration.
///
/// Only `Real` ids address stored iterations. The other variants are markers
/// used by callers: a draft iteration that has not been committed
/// (`Temporary`), "nothing selected" (`Empty`), and an id that failed to
/// resolve (`Invalid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationId {
    Real(u64),
    Temporary,
    Empty,
    Invalid,
}

impl IterationId {
    /// The numeric id, if this is a real iteration.
    pub fn real(self) -> Option<u64> {
        match self {
            IterationId::Real(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_real(self) -> bool {
        matches!(self, IterationId::Real(_))
    }
}

impl From<u64> for IterationId {
    fn from(id: u64) -> Self {
        IterationId::Real(id)
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationId::Real(id) => write!(f, "#{}", id),
            IterationId::Temporary => write!(f, "<temporary>"),
            IterationId::Empty => write!(f, "<empty>"),
            IterationId::Invalid => write!(f, "<invalid>"),
        }
    }
}

impl std::str::FromStr for IterationId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "temporary" => Ok(IterationId::Temporary),
            "empty" => Ok(IterationId::Empty),
            "invalid" => Ok(IterationId::Invalid),
            other => other
                .trim_start_matches('#')
                .parse::<u64>()
                .map(IterationId::Real)
                .map_err(|_| format!("Unknown iteration id: '{}'", s)),
        }
    }
}
