//! Range resolution
//!
//! Turns the raw `RangeRegistry` lookups into the complete set of ranges one
//! allocation needs, failing with `ConfigurationMissing` when any is absent.

use crate::error::AllocationError;
use allocation_store::{ClusterId, IdKind, IdRange, IpBlock, RangeRegistry, Region, RegionId, ResourceKind, Scope};
use tracing::warn;

/// The active range for `(scope, kind)`, or `ConfigurationMissing`
pub async fn range_for(registry: &dyn RangeRegistry, scope: Scope, kind: IdKind) -> Result<IdRange, AllocationError> {
    registry
        .id_range(scope, kind)
        .await?
        .ok_or(AllocationError::ConfigurationMissing {
            scope,
            resource: ResourceKind::Id(kind),
        })
}

/// Everything configured for a region's allocations
#[derive(Debug, Clone)]
pub struct ScopeRanges {
    pub region: Region,
    pub cluster: ClusterId,
    /// Subnettable (/24) blocks in scan order
    pub blocks: Vec<IpBlock>,
    pub vlan: IdRange,
    pub primary_vcid: IdRange,
    pub secondary_vcid: IdRange,
    pub vsi_id: IdRange,
}

impl ScopeRanges {
    /// Look up the region and all four id ranges plus its IP blocks
    pub async fn resolve(registry: &dyn RangeRegistry, region_id: RegionId) -> Result<Self, AllocationError> {
        let region = registry
            .region(region_id)
            .await?
            .ok_or_else(|| AllocationError::Validation(format!("unknown region {}", region_id)))?;
        let region_scope = Scope::Region(region.id);

        let (blocks, skipped): (Vec<IpBlock>, Vec<IpBlock>) = registry
            .ip_blocks(region.id)
            .await?
            .into_iter()
            .partition(IpBlock::is_subnettable);
        for block in &skipped {
            warn!("Skipping block {} in region {}: only /24 blocks are subnetted", block.network, region.name);
        }
        if blocks.is_empty() {
            return Err(AllocationError::ConfigurationMissing {
                scope: region_scope,
                resource: ResourceKind::Subnet,
            });
        }

        let vlan = range_for(registry, region_scope, IdKind::Vlan).await?;

        // A region with no cluster has no VCID ranges at all
        let cluster = region.cluster_id.ok_or(AllocationError::ConfigurationMissing {
            scope: region_scope,
            resource: ResourceKind::Id(IdKind::PrimaryVcid),
        })?;
        let cluster_scope = Scope::Cluster(cluster);
        let primary_vcid = range_for(registry, cluster_scope, IdKind::PrimaryVcid).await?;
        let secondary_vcid = range_for(registry, cluster_scope, IdKind::SecondaryVcid).await?;
        let vsi_id = range_for(registry, cluster_scope, IdKind::VsiId).await?;

        Ok(Self {
            region,
            cluster,
            blocks,
            vlan,
            primary_vcid,
            secondary_vcid,
            vsi_id,
        })
    }

    /// Configured range for an id kind
    #[must_use]
    pub fn id_range(&self, kind: IdKind) -> IdRange {
        match kind {
            IdKind::Vlan => self.vlan,
            IdKind::PrimaryVcid => self.primary_vcid,
            IdKind::SecondaryVcid => self.secondary_vcid,
            IdKind::VsiId => self.vsi_id,
        }
    }

    /// Scope an id kind is unique within
    #[must_use]
    pub fn scope_of(&self, kind: IdKind) -> Scope {
        kind.scope_for(self.region.id, self.cluster)
    }

    /// Scopes to lock, in the fixed acquisition order: region, then cluster
    #[must_use]
    pub fn lock_order(&self) -> [Scope; 2] {
        [Scope::Region(self.region.id), Scope::Cluster(self.cluster)]
    }
}
