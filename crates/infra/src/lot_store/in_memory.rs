use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use clinic_core::LotId;
use clinic_inventory::InventoryLot;

use super::r#trait::{LotStore, LotStoreError};

/// In-memory lot store for tests/dev.
///
/// `bulk_mark_expired` runs entirely under one write lock, so readers observe
/// either none or all of a sweep's transitions.
#[derive(Debug, Default)]
pub struct InMemoryLotStore {
    lots: RwLock<HashMap<LotId, InventoryLot>>,
}

impl InMemoryLotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of lots currently flagged as expired.
    pub fn expired_count(&self) -> Result<usize, LotStoreError> {
        let lots = self.lots.read().map_err(|_| poisoned())?;
        Ok(lots.values().filter(|l| l.is_expired()).count())
    }
}

fn poisoned() -> LotStoreError {
    LotStoreError::Storage("lock poisoned".to_string())
}

impl LotStore for InMemoryLotStore {
    fn insert(&self, lot: InventoryLot) -> Result<(), LotStoreError> {
        let mut lots = self.lots.write().map_err(|_| poisoned())?;
        let id = lot.id_typed();
        if lots.contains_key(&id) {
            return Err(LotStoreError::AlreadyExists(id));
        }
        lots.insert(id, lot);
        Ok(())
    }

    fn get(&self, lot_id: LotId) -> Result<Option<InventoryLot>, LotStoreError> {
        let lots = self.lots.read().map_err(|_| poisoned())?;
        Ok(lots.get(&lot_id).cloned())
    }

    fn list(&self) -> Result<Vec<InventoryLot>, LotStoreError> {
        let lots = self.lots.read().map_err(|_| poisoned())?;
        let mut out: Vec<InventoryLot> = lots.values().cloned().collect();
        out.sort_by_key(|l| *l.id_typed().as_uuid());
        Ok(out)
    }

    fn bulk_mark_expired(&self, before: DateTime<Utc>) -> Result<u64, LotStoreError> {
        let mut lots = self.lots.write().map_err(|_| poisoned())?;
        let mut changed = 0u64;
        for lot in lots.values_mut() {
            if lot.mark_expired(before) {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use clinic_core::{BranchId, MedicationId};
    use clinic_inventory::NewLot;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
    }

    fn lot(expiry_date: Option<DateTime<Utc>>) -> InventoryLot {
        InventoryLot::import(NewLot {
            lot_id: LotId::new(),
            medication_id: MedicationId::new(),
            branch_id: BranchId::new(),
            quantity: 5,
            expiry_date,
        })
        .unwrap()
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryLotStore::new();
        let l = lot(None);
        store.insert(l.clone()).unwrap();
        assert_eq!(
            store.insert(l.clone()),
            Err(LotStoreError::AlreadyExists(l.id_typed()))
        );
    }

    #[test]
    fn bulk_mark_skips_null_and_future_expiry() {
        let now = test_time();
        let store = InMemoryLotStore::new();
        let past = lot(Some(now - Duration::hours(1)));
        let future = lot(Some(now + Duration::hours(1)));
        let missing = lot(None);
        store.insert(past.clone()).unwrap();
        store.insert(future.clone()).unwrap();
        store.insert(missing.clone()).unwrap();

        assert_eq!(store.bulk_mark_expired(now).unwrap(), 1);
        assert!(store.get(past.id_typed()).unwrap().unwrap().is_expired());
        assert!(!store.get(future.id_typed()).unwrap().unwrap().is_expired());
        assert!(!store.get(missing.id_typed()).unwrap().unwrap().is_expired());
        assert_eq!(store.expired_count().unwrap(), 1);
    }

    #[test]
    fn list_is_ordered_by_id() {
        let store = InMemoryLotStore::new();
        for _ in 0..5 {
            store.insert(lot(None)).unwrap();
        }
        let ids: Vec<_> = store
            .list()
            .unwrap()
            .iter()
            .map(|l| *l.id_typed().as_uuid())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
