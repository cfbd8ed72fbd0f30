//! Background inventory jobs.
//!
//! ## Design
//!
//! - The expiration sweep is one bulk, idempotent state transition per firing
//! - "Now" comes from an injected `Clock`; firings come from a `Schedule`
//! - The worker owns one OS thread and never overlaps its own sweeps
//! - Failures are logged and left for the next firing (no in-run retry)
//!
//! ## Components
//!
//! - `ExpirationSweeper`: runs `batch-mark-expired(now)` against a `LotStore`
//! - `Schedule`: when the next firing happens (daily at a wall-clock time, or fixed interval)
//! - `SweepWorker`: background loop driving the sweeper from the schedule
//! - `SweepReport` / `SweepStats`: per-run outcome and worker counters

pub mod expiration;
pub mod schedule;
pub mod types;
pub mod worker;

pub use expiration::ExpirationSweeper;
pub use schedule::{Schedule, ScheduleParseError};
pub use types::{SweepError, SweepReport, SweepStats};
pub use worker::{SweepWorker, SweepWorkerConfig, SweepWorkerHandle};
