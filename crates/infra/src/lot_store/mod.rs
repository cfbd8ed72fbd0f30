//! Inventory lot persistence boundary.
//!
//! The expiration sweep only needs a handful of operations from storage: load
//! and list lots, import new ones, and one bulk state transition. Adapters live
//! next to the trait:
//!
//! - `InMemoryLotStore`: tests/dev.
//! - `PostgresLotStore`: the `inventory_lots` table.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLotStore;
pub use postgres::PostgresLotStore;
pub use r#trait::{LotStore, LotStoreError};
