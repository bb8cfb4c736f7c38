//! Engine module - iterative risk segmentation
//!
//! Variables are binned into groups, groups are mapped onto risk segments,
//! and iterations chain onto each other through a risk-segment grid. The
//! repository owns the iteration tree and resolves it lazily.

pub mod autoband;
pub mod config;
pub mod data;
pub mod error;
pub mod filters;
pub mod graph;
pub mod grid;
pub mod groups;
pub mod ids;
pub mod iteration;
pub mod loader;
pub mod metrics;
pub mod notify;
pub mod output;
pub mod repository;
pub mod risk_segments;
pub mod scalars;
pub mod validator;

pub use autoband::{
    auto_rank_ordering, create_auto_bands, create_double_var_bands, expand_equal_caps, AutoBandSettings,
    BandingInput, DoubleBandResult, SegmentLimits,
};
pub use config::*;
pub use data::*;
pub use error::{EngineError, EngineResult};
pub use filters::*;
pub use graph::IterationGraph;
pub use grid::RiskSegmentGrid;
pub use groups::*;
pub use ids::IterationId;
pub use iteration::*;
pub use loader::*;
pub use metrics::*;
pub use notify::*;
pub use output::IterationOutput;
pub use repository::*;
pub use risk_segments::*;
pub use scalars::*;
pub use validator::*;
