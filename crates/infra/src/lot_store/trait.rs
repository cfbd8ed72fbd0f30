use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use clinic_core::LotId;
use clinic_inventory::InventoryLot;

/// Lot store error.
///
/// - **Unavailable**: the store could not be reached (connectivity, pool closed)
/// - **Timeout**: the call exceeded its configured bound
/// - **AlreadyExists**: identity conflict on import
/// - **Storage**: anything else the backend reported
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LotStoreError {
    #[error("lot store unavailable: {0}")]
    Unavailable(String),

    #[error("lot store call timed out after {0}ms")]
    Timeout(u64),

    #[error("lot already exists: {0}")]
    AlreadyExists(LotId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LotStoreError {
    /// Timeout after `limit`, in whole milliseconds (saturating).
    pub fn timed_out_after(limit: Duration) -> Self {
        LotStoreError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }

    /// Whether waiting for the next scheduled run is the right response.
    pub fn is_transient(&self) -> bool {
        matches!(self, LotStoreError::Unavailable(_) | LotStoreError::Timeout(_))
    }
}

/// Persistent store of inventory lots.
pub trait LotStore: Send + Sync {
    /// Import a new lot. Fails if the id is taken.
    fn insert(&self, lot: InventoryLot) -> Result<(), LotStoreError>;

    /// Load a lot by id.
    fn get(&self, lot_id: LotId) -> Result<Option<InventoryLot>, LotStoreError>;

    /// List every lot (stable order by id).
    fn list(&self) -> Result<Vec<InventoryLot>, LotStoreError>;

    /// Set `is_expired = true` on every lot with `expiry_date < before AND
    /// is_expired = false`, as one atomic update. Returns the rows changed.
    ///
    /// Rows already flagged are excluded by the predicate itself, so calling this
    /// twice with the same `before` changes nothing the second time.
    fn bulk_mark_expired(&self, before: DateTime<Utc>) -> Result<u64, LotStoreError>;
}

impl<S> LotStore for Arc<S>
where
    S: LotStore + ?Sized,
{
    fn insert(&self, lot: InventoryLot) -> Result<(), LotStoreError> {
        (**self).insert(lot)
    }

    fn get(&self, lot_id: LotId) -> Result<Option<InventoryLot>, LotStoreError> {
        (**self).get(lot_id)
    }

    fn list(&self) -> Result<Vec<InventoryLot>, LotStoreError> {
        (**self).list()
    }

    fn bulk_mark_expired(&self, before: DateTime<Utc>) -> Result<u64, LotStoreError> {
        (**self).bulk_mark_expired(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_millis_saturate() {
        assert_eq!(
            LotStoreError::timed_out_after(Duration::from_millis(1500)),
            LotStoreError::Timeout(1500)
        );
        assert_eq!(
            LotStoreError::timed_out_after(Duration::MAX),
            LotStoreError::Timeout(u64::MAX)
        );
        assert!(LotStoreError::timed_out_after(Duration::from_secs(1)).is_transient());
    }
}
