//! Inventory expiration sweep.
//!
//! One sweep is one call to `LotStore::bulk_mark_expired(now)`: every lot with
//! `expiry_date < now AND is_expired = false` becomes expired, as a single
//! logical update over the whole lot population. There is no way to scope a
//! sweep to a subset.
//!
//! The `is_expired = false` guard lives in the predicate, not in a read-check-write
//! sequence. Consequences:
//! - a repeated sweep at the same instant writes nothing
//! - concurrent sweeps commute; whichever finishes last finds less to do
//! - a failed sweep leaves rows un-flipped, and the next one catches them up
//! - a clock that moves backwards never un-expires anything

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use clinic_core::Clock;

use crate::lot_store::LotStore;

use super::types::{SweepError, SweepReport};

/// Reconciles the cached `is_expired` flag with the clock.
#[derive(Debug, Clone)]
pub struct ExpirationSweeper<S, C> {
    store: S,
    clock: C,
}

impl<S: LotStore, C: Clock> ExpirationSweeper<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Sweep at the clock's current time.
    pub fn sweep(&self) -> Result<SweepReport, SweepError> {
        self.sweep_at(self.clock.now())
    }

    /// Sweep with an explicit "now".
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let started = Instant::now();

        match self.store.bulk_mark_expired(now) {
            Ok(transitioned) => {
                let report = SweepReport {
                    swept_at: now,
                    transitioned,
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                };
                if transitioned > 0 {
                    info!(
                        swept_at = %now,
                        transitioned,
                        elapsed_ms = report.elapsed_ms,
                        "marked inventory lots as expired"
                    );
                } else {
                    debug!(swept_at = %now, "expiration sweep found nothing to do");
                }
                Ok(report)
            }
            Err(err) => {
                error!(
                    swept_at = %now,
                    error = %err,
                    transient = err.is_transient(),
                    "expiration sweep failed"
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use clinic_core::{BranchId, FixedClock, LotId, MedicationId};
    use clinic_inventory::{InventoryLot, LotState, NewLot};
    use proptest::prelude::*;
    use std::sync::Arc;

    use crate::lot_store::{InMemoryLotStore, LotStoreError};

    fn today() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap()
    }

    fn lot(expiry_date: Option<DateTime<Utc>>) -> InventoryLot {
        InventoryLot::import(NewLot {
            lot_id: LotId::new(),
            medication_id: MedicationId::new(),
            branch_id: BranchId::new(),
            quantity: 20,
            expiry_date,
        })
        .unwrap()
    }

    fn setup(now: DateTime<Utc>) -> ExpirationSweeper<Arc<InMemoryLotStore>, Arc<FixedClock>> {
        ExpirationSweeper::new(InMemoryLotStore::arc(), FixedClock::arc(now))
    }

    fn state_of(sweeper: &ExpirationSweeper<Arc<InMemoryLotStore>, Arc<FixedClock>>, id: LotId) -> LotState {
        sweeper.store().get(id).unwrap().unwrap().state()
    }

    /// Store whose every call fails as unreachable.
    struct UnreachableStore;

    impl LotStore for UnreachableStore {
        fn insert(&self, _lot: InventoryLot) -> Result<(), LotStoreError> {
            Err(LotStoreError::Unavailable("connection refused".into()))
        }

        fn get(&self, _lot_id: LotId) -> Result<Option<InventoryLot>, LotStoreError> {
            Err(LotStoreError::Unavailable("connection refused".into()))
        }

        fn list(&self) -> Result<Vec<InventoryLot>, LotStoreError> {
            Err(LotStoreError::Unavailable("connection refused".into()))
        }

        fn bulk_mark_expired(&self, _before: DateTime<Utc>) -> Result<u64, LotStoreError> {
            Err(LotStoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn sweep_uses_injected_clock() {
        let sweeper = setup(today());
        let report = sweeper.sweep().unwrap();
        assert_eq!(report.swept_at, today());
        assert_eq!(report.transitioned, 0);
    }

    #[test]
    fn second_sweep_at_same_instant_changes_nothing() {
        let sweeper = setup(today());
        for days in 1..=4 {
            sweeper
                .store()
                .insert(lot(Some(today() - Duration::days(days))))
                .unwrap();
        }

        assert_eq!(sweeper.sweep().unwrap().transitioned, 4);
        assert_eq!(sweeper.sweep().unwrap().transitioned, 0);
    }

    #[test]
    fn boundary_is_exclusive() {
        let sweeper = setup(today());
        let on_the_dot = lot(Some(today()));
        let id = on_the_dot.id_typed();
        sweeper.store().insert(on_the_dot).unwrap();

        assert_eq!(sweeper.sweep().unwrap().transitioned, 0);
        assert_eq!(state_of(&sweeper, id), LotState::Active);

        sweeper.clock().advance(Duration::milliseconds(1));
        assert_eq!(sweeper.sweep().unwrap().transitioned, 1);
        assert_eq!(state_of(&sweeper, id), LotState::Expired);
    }

    #[test]
    fn clock_moving_backwards_never_unexpires() {
        let sweeper = setup(today());
        let l = lot(Some(today() - Duration::hours(1)));
        let id = l.id_typed();
        sweeper.store().insert(l).unwrap();
        sweeper.sweep().unwrap();

        sweeper.clock().advance(Duration::days(-3));
        assert_eq!(sweeper.sweep().unwrap().transitioned, 0);
        assert_eq!(state_of(&sweeper, id), LotState::Expired);
    }

    #[test]
    fn null_expiry_is_left_alone() {
        let sweeper = setup(today());
        let l = lot(None);
        let id = l.id_typed();
        sweeper.store().insert(l).unwrap();

        assert_eq!(sweeper.sweep().unwrap().transitioned, 0);
        assert_eq!(state_of(&sweeper, id), LotState::Active);
    }

    #[test]
    fn unreachable_store_surfaces_as_store_unavailable() {
        let sweeper = ExpirationSweeper::new(UnreachableStore, FixedClock::new(today()));
        let err = sweeper.sweep().unwrap_err();
        assert!(matches!(
            err,
            SweepError::StoreUnavailable(LotStoreError::Unavailable(_))
        ));
    }

    fn arb_lot_spec() -> impl Strategy<Value = (Option<i64>, bool)> {
        (prop::option::of(-500i64..500), any::<bool>())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: of N lots, a sweep transitions exactly the K lots with
        /// `expiry < now` that were not yet flagged, and leaves the rest as they were.
        #[test]
        fn sweep_transitions_exactly_the_due_lots(
            specs in prop::collection::vec(arb_lot_spec(), 0..40)
        ) {
            let now = today();
            let sweeper = setup(now);
            let mut expected_due = 0u64;
            let mut before = Vec::new();

            for (offset, already_expired) in specs {
                let expiry = offset.map(|m| now + Duration::minutes(m));
                let l = InventoryLot::restore(
                    LotId::new(),
                    MedicationId::new(),
                    BranchId::new(),
                    1,
                    expiry,
                    already_expired,
                );
                if l.is_due_for_expiry(now) {
                    expected_due += 1;
                }
                before.push(l.clone());
                sweeper.store().insert(l).unwrap();
            }

            let report = sweeper.sweep().unwrap();
            prop_assert_eq!(report.transitioned, expected_due);

            for prior in before {
                let after = sweeper.store().get(prior.id_typed()).unwrap().unwrap();
                if prior.is_due_for_expiry(now) {
                    prop_assert!(after.is_expired());
                } else {
                    prop_assert_eq!(after, prior);
                }
            }

            prop_assert_eq!(sweeper.sweep().unwrap().transitioned, 0);
        }
    }
}
