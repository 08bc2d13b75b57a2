//! Site Allocator
//!
//! Hands each provisioned site a /30 point-to-point subnet, a management
//! VLAN, a primary and a secondary VCID, and a VSI id, drawn from
//! administrator-configured ranges. Two allocations that overlap in time
//! always receive disjoint values; see `transaction` for how.
//!
//! # Example
//!
//! ```no_run
//! use allocation_store::{PgAssignmentStore, PgRangeRegistry, RegionId};
//! use site_allocator::{AllocationRequest, Allocator, AllocatorConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = allocation_store::postgres::connect("postgres://localhost/sites", 10).await?;
//! let allocator = Allocator::new(
//!     Arc::new(PgRangeRegistry::new(pool.clone())),
//!     Arc::new(PgAssignmentStore::new(pool)),
//!     AllocatorConfig::default(),
//! );
//!
//! let outcome = allocator.allocate(&AllocationRequest::new("SiteA", RegionId(1))).await?;
//! println!("SiteA got {}", outcome.assignment().ip);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod error;
pub mod registry;
pub mod sequential;
pub mod service;
pub mod subnet;
pub mod transaction;

pub use classifier::{NoopClassifier, SiteClassifier, SubstringClassifier};
pub use config::AllocatorConfig;
pub use error::{AllocationError, ErrorKind};
pub use registry::ScopeRanges;
pub use sequential::SequentialIdAllocator;
pub use service::{AllocationRequest, Allocator, BulkOutcome, BulkStatus, ResourceUsage, UtilizationReport};
pub use subnet::SubnetAllocator;
pub use transaction::{AllocationOutcome, AllocationTransaction, SiteRequest, TransactionState};
