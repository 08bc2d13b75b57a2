//! Allocation transaction
//!
//! One `AllocationTransaction` runs exactly one operation, `allocate` or
//! `release`, and ends `Committed` or `Aborted`. Allocation happens under the
//! region and cluster locks, in the fixed order IP subnet, VLAN, primary
//! VCID, secondary VCID, VSI id. Any failure drops the store transaction,
//! which rolls back everything staged so far.

use crate::error::AllocationError;
use crate::registry::ScopeRanges;
use crate::sequential::SequentialIdAllocator;
use crate::subnet::{point_to_point_subnet, SubnetAllocator};
use allocation_store::{
    Assignment, AssignmentId, AssignmentStore, AssignmentValues, IdKind, NewAssignment, StoreTransaction,
};
use std::time::Duration;
use tracing::{debug, info};

/// Lifecycle of an allocation transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not yet run
    Pending,
    /// Changes are durable
    Committed,
    /// Nothing was written
    Aborted,
}

/// Result of a successful allocate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// A new assignment was committed
    Created(Assignment),
    /// The site already held an assignment in this region; returned unchanged
    Existing(Assignment),
}

impl AllocationOutcome {
    /// The assignment, new or existing
    #[must_use]
    pub fn assignment(&self) -> &Assignment {
        match self {
            AllocationOutcome::Created(a) | AllocationOutcome::Existing(a) => a,
        }
    }

    /// Consume into the assignment
    #[must_use]
    pub fn into_assignment(self) -> Assignment {
        match self {
            AllocationOutcome::Created(a) | AllocationOutcome::Existing(a) => a,
        }
    }

    /// Whether this call created the assignment
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, AllocationOutcome::Created(_))
    }
}

/// Site-specific inputs to one allocation
#[derive(Debug, Clone)]
pub struct SiteRequest<'a> {
    pub site_name: &'a str,
    pub vendor: Option<String>,
    pub created_by: &'a str,
}

/// A single allocate or release against the assignment store
pub struct AllocationTransaction<'a> {
    store: &'a dyn AssignmentStore,
    lock_timeout: Duration,
    state: TransactionState,
}

impl std::fmt::Debug for AllocationTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationTransaction")
            .field("lock_timeout", &self.lock_timeout)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> AllocationTransaction<'a> {
    /// New pending transaction against `store`
    #[must_use]
    pub fn new(store: &'a dyn AssignmentStore, lock_timeout: Duration) -> Self {
        Self {
            store,
            lock_timeout,
            state: TransactionState::Pending,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_pending(&self) -> Result<(), AllocationError> {
        match self.state {
            TransactionState::Pending => Ok(()),
            other => Err(AllocationError::Validation(format!(
                "allocation transaction already {:?}",
                other
            ))),
        }
    }

    fn finish<T>(&mut self, result: Result<T, AllocationError>) -> Result<T, AllocationError> {
        self.state = if result.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::Aborted
        };
        result
    }

    /// Allocate all five resources for a site, or nothing
    ///
    /// If the site already holds an assignment in the same region it is
    /// returned as `Existing`; an assignment in another region is a
    /// validation error.
    pub async fn allocate(
        &mut self,
        site: SiteRequest<'_>,
        ranges: &ScopeRanges,
    ) -> Result<AllocationOutcome, AllocationError> {
        self.ensure_pending()?;
        let result = self.run_allocate(site, ranges).await;
        self.finish(result)
    }

    async fn run_allocate(
        &self,
        site: SiteRequest<'_>,
        ranges: &ScopeRanges,
    ) -> Result<AllocationOutcome, AllocationError> {
        let mut tx = self.store.begin(&ranges.lock_order(), self.lock_timeout).await?;

        if let Some(existing) = tx.find_by_site(site.site_name).await? {
            if existing.region_id == ranges.region.id {
                debug!("Site {} already holds assignment {}", site.site_name, existing.id);
                return Ok(AllocationOutcome::Existing(existing));
            }
            return Err(AllocationError::Validation(format!(
                "site {} is already assigned in region {}",
                site.site_name, existing.region_id
            )));
        }

        let values = Self::select_values(tx.as_mut(), ranges).await?;
        let assignment = tx
            .insert(NewAssignment {
                site_name: site.site_name.to_string(),
                region_id: ranges.region.id,
                cluster_id: ranges.cluster,
                values,
                vendor: site.vendor,
                created_by: site.created_by.to_string(),
            })
            .await?;
        tx.commit().await?;

        info!(
            "Allocated {} ({}) to site {} (vlan {}, vcid {}/{}, vsi {})",
            assignment.ip,
            point_to_point_subnet(assignment.ip),
            assignment.site_name,
            assignment.vlan,
            assignment.primary_vcid,
            assignment.secondary_vcid,
            assignment.vsi_id
        );
        Ok(AllocationOutcome::Created(assignment))
    }

    async fn select_values(
        tx: &mut dyn StoreTransaction,
        ranges: &ScopeRanges,
    ) -> Result<AssignmentValues, AllocationError> {
        let ip = SubnetAllocator.allocate(tx, ranges.region.id, &ranges.blocks).await?;

        let mut ids = [0u32; 4];
        for (slot, kind) in ids.iter_mut().zip(IdKind::ALL) {
            *slot = SequentialIdAllocator::new(kind)
                .allocate(tx, ranges.scope_of(kind), ranges.id_range(kind))
                .await?;
        }
        let [vlan, primary_vcid, secondary_vcid, vsi_id] = ids;

        Ok(AssignmentValues {
            ip,
            vlan,
            primary_vcid,
            secondary_vcid,
            vsi_id,
        })
    }

    /// Delete an assignment, freeing its values for later allocations
    pub async fn release(&mut self, id: AssignmentId) -> Result<Assignment, AllocationError> {
        self.ensure_pending()?;
        let result = self.store.delete(id).await.map_err(AllocationError::from);
        if let Ok(released) = &result {
            info!("Released {} from site {}", released.ip, released.site_name);
        }
        self.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocation_store::{InMemoryStore, RegionId, StaticRangeRegistry};

    async fn east_ranges() -> ScopeRanges {
        let registry = StaticRangeRegistry::from_yaml_str(
            r#"
clusters:
  - id: 7
    name: north
    primaryVcid: { start: 1000, end: 1001 }
    secondaryVcid: { start: 2000, end: 2001 }
    vsiId: { start: 3000, end: 3001 }
regions:
  - id: 1
    name: East
    cluster: 7
    ipBlocks: ["10.1.1.0/24"]
    vlan: { start: 100, end: 200 }
"#,
        )
        .unwrap();
        ScopeRanges::resolve(&registry, RegionId(1)).await.unwrap()
    }

    fn site(name: &str) -> SiteRequest<'_> {
        SiteRequest {
            site_name: name,
            vendor: None,
            created_by: "test",
        }
    }

    #[tokio::test]
    async fn test_allocate_commits_once() {
        let store = InMemoryStore::new();
        let ranges = east_ranges().await;

        let mut txn = AllocationTransaction::new(&store, Duration::from_secs(1));
        assert_eq!(txn.state(), TransactionState::Pending);
        let outcome = txn.allocate(site("SiteA"), &ranges).await.unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(outcome.assignment().cluster_id, allocation_store::ClusterId(7));

        // A finished transaction cannot be reused
        let err = txn.allocate(site("SiteB"), &ranges).await.unwrap_err();
        assert!(matches!(err, AllocationError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_aborts_without_writes() {
        let store = InMemoryStore::new();
        let ranges = east_ranges().await;
        for name in ["SiteA", "SiteB"] {
            AllocationTransaction::new(&store, Duration::from_secs(1))
                .allocate(site(name), &ranges)
                .await
                .unwrap();
        }

        let mut txn = AllocationTransaction::new(&store, Duration::from_secs(1));
        let err = txn.allocate(site("SiteC"), &ranges).await.unwrap_err();
        assert!(matches!(err, AllocationError::ResourceExhausted { .. }));
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_release() {
        let store = InMemoryStore::new();
        let ranges = east_ranges().await;
        let created = AllocationTransaction::new(&store, Duration::from_secs(1))
            .allocate(site("SiteA"), &ranges)
            .await
            .unwrap()
            .into_assignment();

        let mut txn = AllocationTransaction::new(&store, Duration::from_secs(1));
        let released = txn.release(created.id).await.unwrap();
        assert_eq!(released, created);
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(store.is_empty());

        let mut txn = AllocationTransaction::new(&store, Duration::from_secs(1));
        assert!(txn.release(created.id).await.is_err());
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
