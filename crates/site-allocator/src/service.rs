//! Allocator service
//!
//! Entry point used by provisioning flows. Wraps `AllocationTransaction`
//! with input validation, vendor classification, conflict retries and the
//! bulk-import and reporting helpers.

use crate::backoff::FibonacciBackoff;
use crate::classifier::{NoopClassifier, SiteClassifier};
use crate::config::AllocatorConfig;
use crate::error::{AllocationError, ErrorKind};
use crate::registry::ScopeRanges;
use crate::subnet::{free_subnet_count, SUBNETS_PER_BLOCK};
use crate::transaction::{AllocationOutcome, AllocationTransaction, SiteRequest};
use allocation_store::{
    Assignment, AssignmentId, AssignmentStore, ClusterId, IdKind, IpBlock, RangeRegistry, RegionId, ResourceKind,
    Scope,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Request to provision one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    pub site_name: String,
    pub region_id: RegionId,
    /// Recorded as `created_by`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl AllocationRequest {
    /// Request with no explicit requester
    pub fn new(site_name: impl Into<String>, region_id: RegionId) -> Self {
        Self {
            site_name: site_name.into(),
            region_id,
            requested_by: None,
        }
    }
}

/// Result for one site of a bulk allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub site_name: String,
    #[serde(flatten)]
    pub status: BulkStatus,
}

/// Per-site status of a bulk allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BulkStatus {
    /// New assignment committed
    Allocated { assignment: Assignment },
    /// Site already held an assignment; left untouched
    AlreadyAssigned { assignment: Assignment },
    /// Allocation failed for this site only
    Failed {
        error: String,
        #[serde(rename = "errorKind")]
        kind: ErrorKind,
    },
}

/// Usage of one resource range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub resource: ResourceKind,
    pub scope: Scope,
    pub total: u64,
    pub allocated: u64,
    pub available: u64,
}

/// Point-in-time usage of everything a region allocates from
///
/// Resources without a configured range are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtilizationReport {
    pub region_id: RegionId,
    pub region_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    pub resources: Vec<ResourceUsage>,
}

/// Site resource allocator
#[derive(Clone)]
pub struct Allocator {
    registry: Arc<dyn RangeRegistry>,
    store: Arc<dyn AssignmentStore>,
    classifier: Arc<dyn SiteClassifier>,
    config: AllocatorConfig,
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("classifier", &self.classifier)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Allocator {
    /// Allocator that leaves `vendor` unset
    pub fn new(registry: Arc<dyn RangeRegistry>, store: Arc<dyn AssignmentStore>, config: AllocatorConfig) -> Self {
        Self {
            registry,
            store,
            classifier: Arc::new(NoopClassifier),
            config,
        }
    }

    /// Replace the vendor classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn SiteClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Allocate IP, VLAN, VCIDs and VSI id for a site
    ///
    /// Idempotent per site name: repeating a request for a site that already
    /// holds an assignment in the same region returns that assignment.
    /// `ConcurrentConflict` is retried with Fibonacci backoff up to
    /// `max_attempts` before being returned.
    pub async fn allocate(&self, request: &AllocationRequest) -> Result<AllocationOutcome, AllocationError> {
        let site_name = request.site_name.trim();
        if site_name.is_empty() {
            return Err(AllocationError::Validation("site name must not be blank".to_string()));
        }

        let ranges = ScopeRanges::resolve(self.registry.as_ref(), request.region_id).await?;
        let vendor = self.classifier.classify(site_name);
        let created_by = request
            .requested_by
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.config.default_requester);

        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = FibonacciBackoff::from_bounds(self.config.backoff_min, self.config.backoff_max);
        let mut attempt = 1;
        loop {
            let mut txn = AllocationTransaction::new(self.store.as_ref(), self.config.lock_timeout);
            let site = SiteRequest {
                site_name,
                vendor: vendor.clone(),
                created_by,
            };
            match txn.allocate(site, &ranges).await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = backoff.next_backoff();
                    warn!(
                        "Allocation for site {} conflicted (attempt {}/{}): {}; retrying in {:?}",
                        site_name, attempt, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!("Allocation for site {} gave up after {} attempts: {}", site_name, attempt, err);
                    return Err(err);
                }
                result => return result,
            }
        }
    }

    /// Delete an assignment; its values become allocatable immediately
    pub async fn release(&self, id: AssignmentId) -> Result<Assignment, AllocationError> {
        AllocationTransaction::new(self.store.as_ref(), self.config.lock_timeout)
            .release(id)
            .await
    }

    /// Fetch one assignment
    pub async fn get(&self, id: AssignmentId) -> Result<Assignment, AllocationError> {
        Ok(self.store.get(id).await?)
    }

    /// Assignment held by a site, if any
    pub async fn find_by_site(&self, site_name: &str) -> Result<Option<Assignment>, AllocationError> {
        Ok(self.store.find_by_site(site_name.trim()).await?)
    }

    /// Set or clear the vendor of an assignment
    ///
    /// A blank vendor clears it. Identifying values are never touched.
    pub async fn update_vendor(&self, id: AssignmentId, vendor: Option<&str>) -> Result<Assignment, AllocationError> {
        let vendor = vendor.map(str::trim).filter(|v| !v.is_empty());
        let updated = self.store.update_vendor(id, vendor).await?;
        info!("Set vendor of assignment {} to {:?}", id, updated.vendor);
        Ok(updated)
    }

    /// Allocate for every listed site that has no assignment yet
    ///
    /// Sites are processed one at a time in order; a failure is recorded for
    /// that site and the batch continues.
    pub async fn allocate_missing(&self, requests: &[AllocationRequest]) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let site_name = request.site_name.trim().to_string();
            let status = match self.bulk_one(request).await {
                Ok(status) => status,
                Err(err) => {
                    warn!("Bulk allocation failed for site {}: {}", site_name, err);
                    BulkStatus::Failed {
                        error: err.to_string(),
                        kind: err.kind(),
                    }
                }
            };
            outcomes.push(BulkOutcome { site_name, status });
        }

        let allocated = outcomes
            .iter()
            .filter(|o| matches!(o.status, BulkStatus::Allocated { .. }))
            .count();
        info!("Bulk allocation: {} of {} sites newly allocated", allocated, outcomes.len());
        outcomes
    }

    async fn bulk_one(&self, request: &AllocationRequest) -> Result<BulkStatus, AllocationError> {
        let site_name = request.site_name.trim();
        if !site_name.is_empty() {
            if let Some(assignment) = self.store.find_by_site(site_name).await? {
                return Ok(BulkStatus::AlreadyAssigned { assignment });
            }
        }
        Ok(match self.allocate(request).await? {
            AllocationOutcome::Created(assignment) => BulkStatus::Allocated { assignment },
            AllocationOutcome::Existing(assignment) => BulkStatus::AlreadyAssigned { assignment },
        })
    }

    /// Usage of the region's subnets and VLANs and its cluster's VCID and VSI ranges
    pub async fn utilization(&self, region_id: RegionId) -> Result<UtilizationReport, AllocationError> {
        let region = self
            .registry
            .region(region_id)
            .await?
            .ok_or_else(|| AllocationError::NotFound(format!("Region {} not found", region_id)))?;
        let region_scope = Scope::Region(region.id);
        let in_region = self.store.list_by_region(region.id).await?;
        let mut resources = Vec::new();

        let blocks: Vec<IpBlock> = self
            .registry
            .ip_blocks(region.id)
            .await?
            .into_iter()
            .filter(IpBlock::is_subnettable)
            .collect();
        if !blocks.is_empty() {
            let total = (blocks.len() * SUBNETS_PER_BLOCK) as u64;
            let mut available = 0u64;
            for block in &blocks {
                let used = self.store.used_addresses(block.network).await?;
                available += free_subnet_count(block.network, &used) as u64;
            }
            resources.push(ResourceUsage {
                resource: ResourceKind::Subnet,
                scope: region_scope,
                total,
                allocated: total - available,
                available,
            });
        }

        if let Some(vlan) = self.registry.id_range(region_scope, IdKind::Vlan).await? {
            resources.push(usage(region_scope, IdKind::Vlan, vlan, &in_region));
        }

        if let Some(cluster) = region.cluster_id {
            let cluster_scope = Scope::Cluster(cluster);
            let in_cluster = self.store.list_by_cluster(cluster).await?;
            for kind in [IdKind::PrimaryVcid, IdKind::SecondaryVcid, IdKind::VsiId] {
                if let Some(range) = self.registry.id_range(cluster_scope, kind).await? {
                    resources.push(usage(cluster_scope, kind, range, &in_cluster));
                }
            }
        }

        Ok(UtilizationReport {
            region_id: region.id,
            region_name: region.name,
            cluster_id: region.cluster_id,
            resources,
        })
    }
}

fn usage(scope: Scope, kind: IdKind, range: allocation_store::IdRange, assignments: &[Assignment]) -> ResourceUsage {
    let held: HashSet<u32> = assignments
        .iter()
        .map(|a| kind.value_of(a))
        .filter(|v| range.contains(*v))
        .collect();
    let total = range.len();
    let allocated = held.len() as u64;
    ResourceUsage {
        resource: ResourceKind::Id(kind),
        scope,
        total,
        allocated,
        available: total.saturating_sub(allocated),
    }
}
