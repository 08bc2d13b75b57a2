//! Allocation transaction for InMemoryStore

use super::{materialize, unique_violation, InMemoryStore};
use crate::error::StoreError;
use crate::models::*;
use crate::store_trait::StoreTransaction;
use ipnet::Ipv4Net;
use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;
use tokio::sync::OwnedMutexGuard;

/// Holds its scope locks until committed or dropped
pub(crate) struct MemoryTransaction {
    store: InMemoryStore,
    staged: Vec<Assignment>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    pub(crate) fn new(store: InMemoryStore, guards: Vec<OwnedMutexGuard<()>>) -> Self {
        Self {
            store,
            staged: Vec::new(),
            _guards: guards,
        }
    }

    /// Committed rows followed by rows staged in this transaction
    fn visible(&self) -> Vec<Assignment> {
        let ledger = self.store.ledger();
        ledger
            .assignments
            .values()
            .chain(self.staged.iter())
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_by_site(&mut self, site_name: &str) -> Result<Option<Assignment>, StoreError> {
        Ok(self.visible().into_iter().find(|a| a.site_name == site_name))
    }

    async fn used_addresses(&mut self, block: Ipv4Net) -> Result<HashSet<Ipv4Addr>, StoreError> {
        Ok(self
            .visible()
            .into_iter()
            .map(|a| a.ip)
            .filter(|ip| block.contains(ip))
            .collect())
    }

    async fn used_ids(&mut self, scope: Scope, kind: IdKind) -> Result<BTreeSet<u32>, StoreError> {
        scope.check_axis(kind)?;
        Ok(self
            .visible()
            .iter()
            .filter(|a| match scope {
                Scope::Region(region) => a.region_id == region,
                Scope::Cluster(cluster) => a.cluster_id == cluster,
            })
            .map(|a| kind.value_of(a))
            .collect())
    }

    async fn insert(&mut self, assignment: NewAssignment) -> Result<Assignment, StoreError> {
        let id = self.store.ledger().next_id();
        let row = materialize(id, assignment);
        if let Some(constraint) = self
            .visible()
            .iter()
            .find_map(|existing| unique_violation(existing, &row))
        {
            return Err(StoreError::Conflict(format!(
                "duplicate ({}) inserting site {}",
                constraint, row.site_name
            )));
        }
        self.staged.push(row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut ledger = self.store.ledger();
        // Writers that skipped the scope locks can still race us; re-check like a UNIQUE index would
        for row in &self.staged {
            if let Some(constraint) = ledger
                .assignments
                .values()
                .find_map(|existing| unique_violation(existing, row))
            {
                return Err(StoreError::Conflict(format!(
                    "duplicate ({}) committing site {}",
                    constraint, row.site_name
                )));
            }
        }
        for row in &self.staged {
            ledger.assignments.insert(row.id, row.clone());
        }
        Ok(())
    }
}
