//! Infrastructure layer: queue execution, store seams, config, external services.

pub mod ai;
pub mod config;
pub mod queue;
pub mod repo;
