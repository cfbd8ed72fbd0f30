//! Infrastructure layer: lot storage, background jobs, configuration.

pub mod config;
pub mod jobs;
pub mod lot_store;
