use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clinic_core::{BranchId, DomainError, DomainResult, Entity, LotId, MedicationId};

/// Lifecycle state of a lot.
///
/// `Expired` is terminal: nothing in this crate moves a lot back to `Active`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotState {
    Active,
    Expired,
}

/// Import payload for a new lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    pub lot_id: LotId,
    pub medication_id: MedicationId,
    pub branch_id: BranchId,
    pub quantity: i64,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// A batch of one medication sharing a single expiry date.
///
/// `is_expired` is a cached value of `expiry_date < now` as observed by the
/// most recent sweep that matched this lot. It is never computed on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLot {
    id: LotId,
    medication_id: MedicationId,
    branch_id: BranchId,
    quantity: i64,
    expiry_date: Option<DateTime<Utc>>,
    is_expired: bool,
}

impl InventoryLot {
    /// Validate an import payload. New lots always start `Active`, even when the
    /// expiry date is already in the past; the next sweep catches them up.
    pub fn import(new: NewLot) -> DomainResult<Self> {
        if new.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        Ok(Self {
            id: new.lot_id,
            medication_id: new.medication_id,
            branch_id: new.branch_id,
            quantity: new.quantity,
            expiry_date: new.expiry_date,
            is_expired: false,
        })
    }

    /// Rebuild a lot from persisted columns.
    pub fn restore(
        id: LotId,
        medication_id: MedicationId,
        branch_id: BranchId,
        quantity: i64,
        expiry_date: Option<DateTime<Utc>>,
        is_expired: bool,
    ) -> Self {
        Self {
            id,
            medication_id,
            branch_id,
            quantity,
            expiry_date,
            is_expired,
        }
    }

    pub fn id_typed(&self) -> LotId {
        self.id
    }

    pub fn medication_id(&self) -> MedicationId {
        self.medication_id
    }

    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn expiry_date(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired
    }

    pub fn state(&self) -> LotState {
        if self.is_expired {
            LotState::Expired
        } else {
            LotState::Active
        }
    }

    /// The sweep predicate: `expiry_date < now AND is_expired = false`.
    ///
    /// The boundary is exclusive, and a lot with no expiry date never matches.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired && self.expiry_date.is_some_and(|expiry| expiry < now)
    }

    /// Apply `Active -> Expired` if the lot is due at `now`.
    ///
    /// Returns whether this call changed the lot. A second call with the same
    /// (or an earlier) `now` is a no-op.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_due_for_expiry(now) {
            return false;
        }
        self.is_expired = true;
        true
    }
}

impl Entity for InventoryLot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
