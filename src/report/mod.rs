//! Report module - tables and session files

pub mod session_export;
pub mod summary;

pub use session_export::*;
pub use summary::*;
