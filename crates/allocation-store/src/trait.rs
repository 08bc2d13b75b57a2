//! Backend traits for range configuration and the assignment ledger
//!
//! These traits keep the allocator independent of where ranges and
//! assignments live. The PostgreSQL backend implements them for production,
//! and the in-memory store (feature `test-util`) implements them for tests.

use crate::error::StoreError;
use crate::models::*;
use ipnet::Ipv4Net;
use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Read-only view over administrator-configured ranges
#[async_trait::async_trait]
pub trait RangeRegistry: Send + Sync {
    /// Look up a region; `None` if the region does not exist
    async fn region(&self, id: RegionId) -> Result<Option<Region>, StoreError>;

    /// IP blocks owned by a region, in scan order
    async fn ip_blocks(&self, region: RegionId) -> Result<Vec<IpBlock>, StoreError>;

    /// The single active range for `(scope, kind)`; `None` if not configured
    async fn id_range(&self, scope: Scope, kind: IdKind) -> Result<Option<IdRange>, StoreError>;
}

/// Persisted ledger of resource-to-site bindings
///
/// The ledger is the only source of truth for "used" values: a value is in use
/// exactly when a live assignment row holds it.
#[async_trait::async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Open one atomic unit holding an exclusive lock on each scope, taken in the given order
    ///
    /// Fails with `StoreError::LockTimeout` when a lock is not acquired within `lock_timeout`.
    async fn begin(&self, scopes: &[Scope], lock_timeout: Duration) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Fetch one assignment
    async fn get(&self, id: AssignmentId) -> Result<Assignment, StoreError>;

    /// Fetch the assignment held by a site, if any
    async fn find_by_site(&self, site_name: &str) -> Result<Option<Assignment>, StoreError>;

    /// All assignments in a region, oldest first
    async fn list_by_region(&self, region: RegionId) -> Result<Vec<Assignment>, StoreError>;

    /// All assignments in a cluster, oldest first
    async fn list_by_cluster(&self, cluster: ClusterId) -> Result<Vec<Assignment>, StoreError>;

    /// Assigned addresses inside `block`, whichever region holds them
    async fn used_addresses(&self, block: Ipv4Net) -> Result<HashSet<Ipv4Addr>, StoreError>;

    /// Edit the non-identifying vendor metadata
    async fn update_vendor(&self, id: AssignmentId, vendor: Option<&str>) -> Result<Assignment, StoreError>;

    /// Delete an assignment, freeing its values; returns the deleted row
    async fn delete(&self, id: AssignmentId) -> Result<Assignment, StoreError>;
}

/// An open allocation transaction
///
/// Reads observe the ledger as of the locks held; dropping the transaction
/// without calling `commit` rolls it back and releases the locks.
#[async_trait::async_trait]
pub trait StoreTransaction: Send {
    /// Assignment held by a site, if any
    async fn find_by_site(&mut self, site_name: &str) -> Result<Option<Assignment>, StoreError>;

    /// Assigned addresses that fall inside `block`
    async fn used_addresses(&mut self, block: Ipv4Net) -> Result<HashSet<Ipv4Addr>, StoreError>;

    /// Values of `kind` held within `scope`
    async fn used_ids(&mut self, scope: Scope, kind: IdKind) -> Result<BTreeSet<u32>, StoreError>;

    /// Stage an assignment row
    async fn insert(&mut self, assignment: NewAssignment) -> Result<Assignment, StoreError>;

    /// Make staged writes visible and release the locks
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
