//! In-memory assignment store for unit testing
//!
//! Behaves like the PostgreSQL backend without a database:
//! - `transaction.rs` - staged writes, commit-time uniqueness checks
//! - per-scope `tokio::sync::Mutex` locks acquired with a timeout, standing in
//!   for the advisory locks
//!
//! It can also be told to fail upcoming transactions with a conflict, to
//! exercise retry paths.

mod transaction;

use crate::error::StoreError;
use crate::models::*;
use crate::store_trait::{AssignmentStore, StoreTransaction};
use chrono::Utc;
use ipnet::Ipv4Net;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use transaction::MemoryTransaction;

/// Committed ledger contents
#[derive(Debug)]
pub(crate) struct Ledger {
    pub(crate) assignments: BTreeMap<AssignmentId, Assignment>,
    next_id: i64,
}

impl Ledger {
    pub(crate) fn next_id(&mut self) -> AssignmentId {
        let id = AssignmentId(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Name of the first UNIQUE constraint two rows would both violate
pub(crate) fn unique_violation(a: &Assignment, b: &Assignment) -> Option<&'static str> {
    if a.site_name == b.site_name {
        Some("site_name")
    } else if a.ip == b.ip {
        Some("assigned_ip")
    } else if a.region_id == b.region_id && a.vlan == b.vlan {
        Some("region_id, vlan_id")
    } else if a.cluster_id == b.cluster_id && a.primary_vcid == b.primary_vcid {
        Some("cluster_id, primary_vcid")
    } else if a.cluster_id == b.cluster_id && a.secondary_vcid == b.secondary_vcid {
        Some("cluster_id, secondary_vcid")
    } else if a.cluster_id == b.cluster_id && a.vsi_id == b.vsi_id {
        Some("cluster_id, vsi_id")
    } else {
        None
    }
}

pub(crate) fn materialize(id: AssignmentId, new: NewAssignment) -> Assignment {
    Assignment {
        id,
        site_name: new.site_name,
        region_id: new.region_id,
        cluster_id: new.cluster_id,
        ip: new.values.ip,
        vlan: new.values.vlan,
        primary_vcid: new.values.primary_vcid,
        secondary_vcid: new.values.secondary_vcid,
        vsi_id: new.values.vsi_id,
        vendor: new.vendor,
        created_at: Utc::now(),
        created_by: new.created_by,
    }
}

/// In-memory assignment store
///
/// Clones share the same ledger and locks.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    pub(crate) ledger: Arc<Mutex<Ledger>>,
    scope_locks: Arc<Mutex<HashMap<Scope, Arc<tokio::sync::Mutex<()>>>>>,
    injected_conflicts: Arc<AtomicUsize>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                assignments: BTreeMap::new(),
                next_id: 1,
            })),
            scope_locks: Arc::new(Mutex::new(HashMap::new())),
            injected_conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scope_lock(&self, scope: Scope) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.scope_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(scope).or_default())
    }

    /// Add an existing assignment (for test setup), enforcing uniqueness
    pub fn add_assignment(&self, new: NewAssignment) -> Result<Assignment, StoreError> {
        let mut ledger = self.ledger();
        let id = ledger.next_id();
        let assignment = materialize(id, new);
        if let Some(constraint) = ledger
            .assignments
            .values()
            .find_map(|existing| unique_violation(existing, &assignment))
        {
            return Err(StoreError::Conflict(format!(
                "duplicate ({}) for site {}",
                constraint, assignment.site_name
            )));
        }
        ledger.assignments.insert(id, assignment.clone());
        Ok(assignment)
    }

    /// Fail the next `count` calls to `begin` with `StoreError::Conflict`
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Snapshot of all committed assignments, by id
    #[must_use]
    pub fn assignments(&self) -> Vec<Assignment> {
        self.ledger().assignments.values().cloned().collect()
    }

    /// Number of committed assignments
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledger().assignments.len()
    }

    /// Whether no assignment is committed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl AssignmentStore for InMemoryStore {
    async fn begin(&self, scopes: &[Scope], lock_timeout: Duration) -> Result<Box<dyn StoreTransaction>, StoreError> {
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        let mut guards = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let lock = self.scope_lock(*scope);
            let guard = tokio::time::timeout(lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    StoreError::LockTimeout(format!("waited {:?} for {}", lock_timeout, scope))
                })?;
            debug!("Acquired in-memory lock for {}", scope);
            guards.push(guard);
        }

        Ok(Box::new(MemoryTransaction::new(self.clone(), guards)))
    }

    async fn get(&self, id: AssignmentId) -> Result<Assignment, StoreError> {
        self.ledger()
            .assignments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {} not found", id)))
    }

    async fn find_by_site(&self, site_name: &str) -> Result<Option<Assignment>, StoreError> {
        Ok(self
            .ledger()
            .assignments
            .values()
            .find(|a| a.site_name == site_name)
            .cloned())
    }

    async fn list_by_region(&self, region: RegionId) -> Result<Vec<Assignment>, StoreError> {
        Ok(self
            .ledger()
            .assignments
            .values()
            .filter(|a| a.region_id == region)
            .cloned()
            .collect())
    }

    async fn list_by_cluster(&self, cluster: ClusterId) -> Result<Vec<Assignment>, StoreError> {
        Ok(self
            .ledger()
            .assignments
            .values()
            .filter(|a| a.cluster_id == cluster)
            .cloned()
            .collect())
    }

    async fn used_addresses(&self, block: Ipv4Net) -> Result<HashSet<Ipv4Addr>, StoreError> {
        Ok(self
            .ledger()
            .assignments
            .values()
            .map(|a| a.ip)
            .filter(|ip| block.contains(ip))
            .collect())
    }

    async fn update_vendor(&self, id: AssignmentId, vendor: Option<&str>) -> Result<Assignment, StoreError> {
        let mut ledger = self.ledger();
        let assignment = ledger
            .assignments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {} not found", id)))?;
        assignment.vendor = vendor.map(str::to_string);
        Ok(assignment.clone())
    }

    async fn delete(&self, id: AssignmentId) -> Result<Assignment, StoreError> {
        self.ledger()
            .assignments
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {} not found", id)))
    }
}
