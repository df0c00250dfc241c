//! Cross-persona analysis of settled run results.

pub mod aggregator;

pub use aggregator::*;
