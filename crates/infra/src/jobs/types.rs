//! Sweep outcome types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::lot_store::LotStoreError;

/// Outcome of one successful sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// The "now" the predicate was evaluated against.
    pub swept_at: DateTime<Utc>,
    /// Lots moved from active to expired by this sweep.
    pub transitioned: u64,
    pub elapsed_ms: u64,
}

/// Why a sweep did not complete.
///
/// Neither variant is retried within the same invocation; the predicate is
/// re-evaluated from scratch at the next firing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SweepError {
    /// The bulk update could not be executed.
    #[error("inventory store unavailable: {0}")]
    StoreUnavailable(LotStoreError),

    /// The store call exceeded its configured bound.
    #[error("inventory store call timed out after {0}ms")]
    Timeout(u64),
}

impl From<LotStoreError> for SweepError {
    fn from(err: LotStoreError) -> Self {
        match err {
            LotStoreError::Timeout(ms) => SweepError::Timeout(ms),
            other => SweepError::StoreUnavailable(other),
        }
    }
}

/// Worker counters since spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub sweeps_run: u64,
    pub sweeps_failed: u64,
    pub lots_expired: u64,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl SweepStats {
    pub(crate) fn record(&mut self, outcome: &Result<SweepReport, SweepError>) {
        match outcome {
            Ok(report) => {
                self.sweeps_run += 1;
                self.lots_expired += report.transitioned;
                self.last_sweep_at = Some(report.swept_at);
                self.last_error = None;
            }
            Err(err) => {
                self.sweeps_failed += 1;
                self.last_error = Some(err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timeout_store_errors_keep_their_kind() {
        assert_eq!(
            SweepError::from(LotStoreError::Timeout(250)),
            SweepError::Timeout(250)
        );
        assert!(matches!(
            SweepError::from(LotStoreError::Unavailable("refused".into())),
            SweepError::StoreUnavailable(LotStoreError::Unavailable(_))
        ));
    }

    #[test]
    fn stats_accumulate_and_clear_last_error_on_success() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut stats = SweepStats::default();

        stats.record(&Err(SweepError::Timeout(10)));
        assert_eq!(stats.sweeps_failed, 1);
        assert!(stats.last_error.is_some());

        stats.record(&Ok(SweepReport {
            swept_at: at,
            transitioned: 3,
            elapsed_ms: 1,
        }));
        assert_eq!(stats.sweeps_run, 1);
        assert_eq!(stats.lots_expired, 3);
        assert_eq!(stats.last_sweep_at, Some(at));
        assert_eq!(stats.last_error, None);
    }
}
