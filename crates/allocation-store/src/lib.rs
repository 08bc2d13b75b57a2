//! Allocation Store
//!
//! Persistence for the site resource allocator: the read-only range registry
//! (IP blocks, VLAN, VCID and VSI ranges per region or cluster) and the
//! assignment ledger that records which site holds which values.
//!
//! # Example
//!
//! ```no_run
//! use allocation_store::{AssignmentStore, PgAssignmentStore, RegionId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = allocation_store::postgres::connect("postgres://localhost/sites", 10).await?;
//! allocation_store::postgres::migrate(&pool).await?;
//!
//! let store = PgAssignmentStore::new(pool);
//! let in_region = store.list_by_region(RegionId(1)).await?;
//! println!("{} sites provisioned", in_region.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Backends
//!
//! - **PostgreSQL**: advisory locks per scope plus UNIQUE constraints on every value column
//! - **Static registry**: ranges loaded from a YAML file
//! - **In-memory** (feature `test-util`): per-scope async locks, staged commits

pub mod error;
pub mod models;
pub mod postgres;
pub mod static_registry;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use error::StoreError;
pub use models::*;
pub use postgres::{PgAssignmentStore, PgRangeRegistry};
pub use static_registry::{RangeConfig, StaticRangeRegistry};
pub use store_trait::{AssignmentStore, RangeRegistry, StoreTransaction};
#[cfg(any(test, feature = "test-util"))]
pub use memory::InMemoryStore;
