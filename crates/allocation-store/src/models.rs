//! Allocation data model
//!
//! Identifiers, scopes, configured ranges, and the assignment record.
//! Regions own IP blocks and VLAN ranges; clusters own VCID and VSI ranges.

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Highest usable 802.1Q VLAN id
pub const MAX_VLAN_ID: u32 = 4094;

/// Region identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RegionId(pub i64);

/// Cluster identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ClusterId(pub i64);

/// Assignment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AssignmentId(pub i64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Administrative boundary within which a resource's uniqueness is enforced
///
/// Region and cluster are independent axes: a region's VLANs and a cluster's
/// VCIDs are scoped separately even when the region provisions into that cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Scope {
    /// Region scope (IP blocks, VLAN)
    Region(RegionId),
    /// Cluster scope (primary/secondary VCID, VSI id)
    Cluster(ClusterId),
}

impl Scope {
    /// Axis this scope lies on
    #[must_use]
    pub fn axis(&self) -> ScopeAxis {
        match self {
            Scope::Region(_) => ScopeAxis::Region,
            Scope::Cluster(_) => ScopeAxis::Cluster,
        }
    }

    /// Reject a lookup of `kind` on the wrong axis
    pub fn check_axis(&self, kind: IdKind) -> Result<(), crate::StoreError> {
        if self.axis() == kind.axis() {
            Ok(())
        } else {
            Err(crate::StoreError::InvalidData(format!("{} is not scoped by {}", kind, self)))
        }
    }

    /// Stable string key used for advisory locks and lock maps
    #[must_use]
    pub fn lock_key(&self) -> String {
        match self {
            Scope::Region(id) => format!("region:{}", id),
            Scope::Cluster(id) => format!("cluster:{}", id),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Region(id) => write!(f, "region {}", id),
            Scope::Cluster(id) => write!(f, "cluster {}", id),
        }
    }
}

/// Which scope axis a resource type is unique within
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeAxis {
    /// Unique per region
    Region,
    /// Unique per cluster
    Cluster,
}

/// Integer-valued resource types handed out by sequential scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdKind {
    /// Management VLAN id
    Vlan,
    /// Primary pseudowire VCID
    PrimaryVcid,
    /// Secondary (redundant) pseudowire VCID
    SecondaryVcid,
    /// Virtual Switching Instance id
    VsiId,
}

impl IdKind {
    /// All id kinds, in allocation order
    pub const ALL: [IdKind; 4] = [
        IdKind::Vlan,
        IdKind::PrimaryVcid,
        IdKind::SecondaryVcid,
        IdKind::VsiId,
    ];

    /// Scope axis this kind is unique within
    #[must_use]
    pub fn axis(self) -> ScopeAxis {
        match self {
            IdKind::Vlan => ScopeAxis::Region,
            IdKind::PrimaryVcid | IdKind::SecondaryVcid | IdKind::VsiId => ScopeAxis::Cluster,
        }
    }

    /// Scope this kind is unique within, for a site in `region` provisioning into `cluster`
    #[must_use]
    pub fn scope_for(self, region: RegionId, cluster: ClusterId) -> Scope {
        match self.axis() {
            ScopeAxis::Region => Scope::Region(region),
            ScopeAxis::Cluster => Scope::Cluster(cluster),
        }
    }

    /// Column holding this kind in the `assignments` table
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            IdKind::Vlan => "vlan_id",
            IdKind::PrimaryVcid => "primary_vcid",
            IdKind::SecondaryVcid => "secondary_vcid",
            IdKind::VsiId => "vsi_id",
        }
    }

    /// Read this kind's value off an assignment
    #[must_use]
    pub fn value_of(self, assignment: &Assignment) -> u32 {
        match self {
            IdKind::Vlan => assignment.vlan,
            IdKind::PrimaryVcid => assignment.primary_vcid,
            IdKind::SecondaryVcid => assignment.secondary_vcid,
            IdKind::VsiId => assignment.vsi_id,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdKind::Vlan => "VLAN",
            IdKind::PrimaryVcid => "primary VCID",
            IdKind::SecondaryVcid => "secondary VCID",
            IdKind::VsiId => "VSI id",
        };
        f.write_str(name)
    }
}

/// Any allocatable resource, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// /30 point-to-point subnet
    Subnet,
    /// Integer id
    Id(IdKind),
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Subnet => f.write_str("IP subnet"),
            ResourceKind::Id(kind) => kind.fmt(f),
        }
    }
}

/// Inclusive integer interval `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdRange {
    start: u32,
    end: u32,
}

impl IdRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: u32, end: u32) -> Result<Self, crate::StoreError> {
        if start > end {
            return Err(crate::StoreError::InvalidData(format!(
                "range start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// First value in the range
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last value in the range
    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Whether `value` lies within the range
    #[must_use]
    pub fn contains(&self, value: u32) -> bool {
        (self.start..=self.end).contains(&value)
    }

    /// Number of values in the range
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    /// Ranges always hold at least one value
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    /// Cluster this region provisions pseudowires into
    pub cluster_id: Option<ClusterId>,
}

/// An administrator-defined IPv4 block owned by a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpBlock {
    pub id: i64,
    pub region_id: RegionId,
    pub network: Ipv4Net,
    /// Scan order within the region (ascending)
    pub position: i32,
}

impl IpBlock {
    /// Only /24 blocks are split into /30 subnets
    #[must_use]
    pub fn is_subnettable(&self) -> bool {
        self.network.prefix_len() == 24
    }
}

/// The five network-layer values handed to one site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentValues {
    pub ip: Ipv4Addr,
    pub vlan: u32,
    pub primary_vcid: u32,
    pub secondary_vcid: u32,
    pub vsi_id: u32,
}

/// Allocation record binding resource values to a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: AssignmentId,
    pub site_name: String,
    pub region_id: RegionId,
    pub cluster_id: ClusterId,
    /// First usable host of the site's /30
    pub ip: Ipv4Addr,
    pub vlan: u32,
    pub primary_vcid: u32,
    pub secondary_vcid: u32,
    pub vsi_id: u32,
    /// Non-identifying metadata, editable after allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Assignment {
    /// The identifying values of this assignment
    #[must_use]
    pub fn values(&self) -> AssignmentValues {
        AssignmentValues {
            ip: self.ip,
            vlan: self.vlan,
            primary_vcid: self.primary_vcid,
            secondary_vcid: self.secondary_vcid,
            vsi_id: self.vsi_id,
        }
    }
}

/// Assignment row to be inserted (id and timestamp are assigned by the store)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub site_name: String,
    pub region_id: RegionId,
    pub cluster_id: ClusterId,
    pub values: AssignmentValues,
    pub vendor: Option<String>,
    pub created_by: String,
}
