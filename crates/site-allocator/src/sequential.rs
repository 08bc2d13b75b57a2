//! Lowest-free integer id allocation
//!
//! VLANs, primary and secondary VCIDs, and VSI ids all use the same rule:
//! the smallest value of the configured range not held by any assignment in
//! the same scope. Released values are therefore reused before new ones.

use crate::error::AllocationError;
use allocation_store::{IdKind, IdRange, ResourceKind, Scope, StoreTransaction};
use std::collections::BTreeSet;
use tracing::debug;

/// Smallest value of `range` missing from `used`
#[must_use]
pub fn first_free_id(range: IdRange, used: &BTreeSet<u32>) -> Option<u32> {
    let mut candidate = range.start();
    // `used` is sorted, so walk it alongside the candidate
    for &value in used.range(range.start()..=range.end()) {
        if value != candidate {
            return Some(candidate);
        }
        candidate = candidate.checked_add(1)?;
    }
    range.contains(candidate).then_some(candidate)
}

/// Allocates one id kind within its scope
#[derive(Debug, Clone, Copy)]
pub struct SequentialIdAllocator {
    kind: IdKind,
}

impl SequentialIdAllocator {
    /// Allocator for `kind`
    #[must_use]
    pub fn new(kind: IdKind) -> Self {
        Self { kind }
    }

    /// Lowest free value of `range` within `scope`
    pub async fn allocate(
        &self,
        tx: &mut dyn StoreTransaction,
        scope: Scope,
        range: IdRange,
    ) -> Result<u32, AllocationError> {
        let used = tx.used_ids(scope, self.kind).await?;
        match first_free_id(range, &used) {
            Some(value) => {
                debug!("Selected {} {} in {} (range {})", self.kind, value, scope, range);
                Ok(value)
            }
            None => Err(AllocationError::ResourceExhausted {
                scope,
                resource: ResourceKind::Id(self.kind),
            }),
        }
    }
}
