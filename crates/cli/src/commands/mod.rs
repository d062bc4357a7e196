//! CLI command implementations

pub mod history;
pub mod metrics;
pub mod predict;
pub mod train;
