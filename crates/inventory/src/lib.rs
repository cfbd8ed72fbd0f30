//! Inventory domain module.
//!
//! This crate contains the business rules for medication lots, implemented
//! purely as deterministic domain logic (no IO, no storage, no clock reads).

pub mod lot;

pub use lot::{InventoryLot, LotState, NewLot};
