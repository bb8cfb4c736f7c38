//! Tiering: iterative risk segmentation library
//!
//! Bins portfolio variables into groups, maps them onto loss-rate ranked
//! risk segments, and refines segments by chaining iterations on further
//! variables. Groups can be derived automatically with auto-banding.

pub mod cli;
pub mod engine;
pub mod report;
pub mod utils;
