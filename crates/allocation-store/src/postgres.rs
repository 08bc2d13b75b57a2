//! PostgreSQL backend
//!
//! Allocation transactions take a transaction-scoped advisory lock per scope
//! (region first, then cluster) with `lock_timeout` set locally, so two
//! allocations touching the same scope run one after the other. The
//! `assignments` table also carries a UNIQUE constraint on every value column;
//! a violation surfaces as `StoreError::Conflict` and the caller retries.

use crate::error::StoreError;
use crate::models::*;
use crate::store_trait::{AssignmentStore, RangeRegistry, StoreTransaction};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

const ASSIGNMENT_COLUMNS: &str = "id, site_name, region_id, cluster_id, assigned_ip, vlan_id, \
     primary_vcid, secondary_vcid, vsi_id, vendor, created_at, created_by";

/// Open a connection pool
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;
    Ok(pool)
}

/// Apply the bundled schema migrations
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn to_u32(value: i32, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative {}: {}", column, value)))
}

fn to_i32(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::InvalidData(format!("{} {} exceeds INTEGER", column, value)))
}

fn parse_ip(text: &str) -> Result<Ipv4Addr, StoreError> {
    text.parse()
        .map_err(|e| StoreError::InvalidData(format!("stored address '{}' is not IPv4: {}", text, e)))
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: i64,
    site_name: String,
    region_id: i64,
    cluster_id: i64,
    assigned_ip: String,
    vlan_id: i32,
    primary_vcid: i32,
    secondary_vcid: i32,
    vsi_id: i32,
    vendor: Option<String>,
    created_at: DateTime<Utc>,
    created_by: String,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        Ok(Assignment {
            id: AssignmentId(row.id),
            site_name: row.site_name,
            region_id: RegionId(row.region_id),
            cluster_id: ClusterId(row.cluster_id),
            ip: parse_ip(&row.assigned_ip)?,
            vlan: to_u32(row.vlan_id, "vlan_id")?,
            primary_vcid: to_u32(row.primary_vcid, "primary_vcid")?,
            secondary_vcid: to_u32(row.secondary_vcid, "secondary_vcid")?,
            vsi_id: to_u32(row.vsi_id, "vsi_id")?,
            vendor: row.vendor,
            created_at: row.created_at,
            created_by: row.created_by,
        })
    }
}

fn collect(rows: Vec<AssignmentRow>) -> Result<Vec<Assignment>, StoreError> {
    rows.into_iter().map(Assignment::try_from).collect()
}

/// Assignment ledger on PostgreSQL
#[derive(Debug, Clone)]
pub struct PgAssignmentStore {
    pool: PgPool,
}

impl PgAssignmentStore {
    /// Wrap an existing pool
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn list_where(&self, column: &str, id: i64) -> Result<Vec<Assignment>, StoreError> {
        let sql = format!(
            "SELECT {} FROM assignments WHERE {} = $1 ORDER BY created_at, id",
            ASSIGNMENT_COLUMNS, column
        );
        let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }
}

#[async_trait::async_trait]
impl AssignmentStore for PgAssignmentStore {
    async fn begin(&self, scopes: &[Scope], lock_timeout: Duration) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_db("begin transaction", e))?;

        // Transaction-local; reverts on commit/rollback
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", lock_timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_db("set lock_timeout", e))?;

        for scope in scopes {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(scope.lock_key())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::from_db(&format!("lock {}", scope), e))?;
            debug!("Acquired advisory lock for {}", scope);
        }

        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn get(&self, id: AssignmentId) -> Result<Assignment, StoreError> {
        let sql = format!("SELECT {} FROM assignments WHERE id = $1", ASSIGNMENT_COLUMNS);
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {} not found", id)))?
            .try_into()
    }

    async fn find_by_site(&self, site_name: &str) -> Result<Option<Assignment>, StoreError> {
        let sql = format!("SELECT {} FROM assignments WHERE site_name = $1", ASSIGNMENT_COLUMNS);
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(site_name)
            .fetch_optional(&self.pool)
            .await?
            .map(Assignment::try_from)
            .transpose()
    }

    async fn list_by_region(&self, region: RegionId) -> Result<Vec<Assignment>, StoreError> {
        self.list_where("region_id", region.0).await
    }

    async fn list_by_cluster(&self, cluster: ClusterId) -> Result<Vec<Assignment>, StoreError> {
        self.list_where("cluster_id", cluster.0).await
    }

    async fn used_addresses(&self, block: Ipv4Net) -> Result<HashSet<Ipv4Addr>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT assigned_ip FROM assignments WHERE assigned_ip::inet <<= $1::inet")
                .bind(block.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|(ip,)| parse_ip(ip)).collect()
    }

    async fn update_vendor(&self, id: AssignmentId, vendor: Option<&str>) -> Result<Assignment, StoreError> {
        let sql = format!(
            "UPDATE assignments SET vendor = $2 WHERE id = $1 RETURNING {}",
            ASSIGNMENT_COLUMNS
        );
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id.0)
            .bind(vendor)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {} not found", id)))?
            .try_into()
    }

    async fn delete(&self, id: AssignmentId) -> Result<Assignment, StoreError> {
        let sql = format!("DELETE FROM assignments WHERE id = $1 RETURNING {}", ASSIGNMENT_COLUMNS);
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Assignment {} not found", id)))?
            .try_into()
    }
}

/// Open allocation transaction holding advisory locks
struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn find_by_site(&mut self, site_name: &str) -> Result<Option<Assignment>, StoreError> {
        let sql = format!("SELECT {} FROM assignments WHERE site_name = $1", ASSIGNMENT_COLUMNS);
        sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(site_name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::from_db("find site", e))?
            .map(Assignment::try_from)
            .transpose()
    }

    async fn used_addresses(&mut self, block: Ipv4Net) -> Result<HashSet<Ipv4Addr>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT assigned_ip FROM assignments WHERE assigned_ip::inet <<= $1::inet")
                .bind(block.to_string())
                .fetch_all(&mut *self.tx)
                .await
                .map_err(|e| StoreError::from_db("read used addresses", e))?;
        rows.iter().map(|(ip,)| parse_ip(ip)).collect()
    }

    async fn used_ids(&mut self, scope: Scope, kind: IdKind) -> Result<BTreeSet<u32>, StoreError> {
        scope.check_axis(kind)?;
        let (scope_column, scope_id) = match scope {
            Scope::Region(id) => ("region_id", id.0),
            Scope::Cluster(id) => ("cluster_id", id.0),
        };
        let sql = format!("SELECT {} FROM assignments WHERE {} = $1", kind.column(), scope_column);
        let rows: Vec<(i32,)> = sqlx::query_as(&sql)
            .bind(scope_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| StoreError::from_db("read used ids", e))?;
        rows.into_iter().map(|(v,)| to_u32(v, kind.column())).collect()
    }

    async fn insert(&mut self, assignment: NewAssignment) -> Result<Assignment, StoreError> {
        let sql = format!(
            "INSERT INTO assignments (site_name, region_id, cluster_id, assigned_ip, vlan_id, \
             primary_vcid, secondary_vcid, vsi_id, vendor, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            ASSIGNMENT_COLUMNS
        );
        let values = assignment.values;
        let row = sqlx::query_as::<_, AssignmentRow>(&sql)
            .bind(&assignment.site_name)
            .bind(assignment.region_id.0)
            .bind(assignment.cluster_id.0)
            .bind(values.ip.to_string())
            .bind(to_i32(values.vlan, "vlan_id")?)
            .bind(to_i32(values.primary_vcid, "primary_vcid")?)
            .bind(to_i32(values.secondary_vcid, "secondary_vcid")?)
            .bind(to_i32(values.vsi_id, "vsi_id")?)
            .bind(assignment.vendor.as_deref())
            .bind(&assignment.created_by)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| StoreError::from_db(&format!("insert assignment for {}", assignment.site_name), e))?;
        row.try_into()
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| StoreError::from_db("commit", e))
    }
}

/// Range configuration read from the admin-managed tables
#[derive(Debug, Clone)]
pub struct PgRangeRegistry {
    pool: PgPool,
}

impl PgRangeRegistry {
    /// Wrap an existing pool
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bounds_to_range(start: Option<i32>, end: Option<i32>, what: &str) -> Result<Option<IdRange>, StoreError> {
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(IdRange::new(to_u32(start, what)?, to_u32(end, what)?)?)),
        _ => Ok(None),
    }
}

#[async_trait::async_trait]
impl RangeRegistry for PgRangeRegistry {
    async fn region(&self, id: RegionId) -> Result<Option<Region>, StoreError> {
        let row: Option<(i64, String, Option<i64>)> =
            sqlx::query_as("SELECT id, name, cluster_id FROM regions WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, cluster_id)| Region {
            id: RegionId(id),
            name,
            cluster_id: cluster_id.map(ClusterId),
        }))
    }

    async fn ip_blocks(&self, region: RegionId) -> Result<Vec<IpBlock>, StoreError> {
        let rows: Vec<(i64, i64, String, i32)> = sqlx::query_as(
            "SELECT id, region_id, network, position FROM ip_blocks \
             WHERE region_id = $1 AND active ORDER BY position, id",
        )
        .bind(region.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, region_id, network, position)| {
                let network: Ipv4Net = network
                    .parse()
                    .map_err(|e| StoreError::InvalidData(format!("block {} '{}': {}", id, network, e)))?;
                Ok(IpBlock {
                    id,
                    region_id: RegionId(region_id),
                    network: network.trunc(),
                    position,
                })
            })
            .collect()
    }

    async fn id_range(&self, scope: Scope, kind: IdKind) -> Result<Option<IdRange>, StoreError> {
        let row: Option<(Option<i32>, Option<i32>)> = match (scope, kind) {
            (Scope::Region(region), IdKind::Vlan) => {
                sqlx::query_as("SELECT vlan_start, vlan_end FROM vlan_ranges WHERE region_id = $1")
                    .bind(region.0)
                    .fetch_optional(&self.pool)
                    .await?
            }
            (Scope::Cluster(cluster), IdKind::PrimaryVcid | IdKind::SecondaryVcid | IdKind::VsiId) => {
                let prefix = match kind {
                    IdKind::PrimaryVcid => "primary",
                    IdKind::SecondaryVcid => "secondary",
                    _ => "vsi",
                };
                let sql = format!(
                    "SELECT {0}_start, {0}_end FROM vcid_ranges WHERE cluster_id = $1",
                    prefix
                );
                sqlx::query_as(&sql)
                    .bind(cluster.0)
                    .fetch_optional(&self.pool)
                    .await?
            }
            _ => None,
        };

        match row {
            Some((start, end)) => bounds_to_range(start, end, kind.column()),
            None => Ok(None),
        }
    }
}
