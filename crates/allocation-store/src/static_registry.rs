//! YAML-backed range registry
//!
//! Loads regions, clusters, and their ranges from a configuration file so the
//! allocator can run against ranges managed outside the database.
//!
//! ```yaml
//! clusters:
//!   - id: 1
//!     name: metro-north
//!     primaryVcid: { start: 1000, end: 1100 }
//!     secondaryVcid: { start: 2000, end: 2100 }
//!     vsiId: { start: 3000, end: 3100 }
//! regions:
//!   - id: 1
//!     name: East
//!     cluster: 1
//!     ipBlocks: ["10.1.1.0/24"]
//!     vlan: { start: 100, end: 200 }
//! ```

use crate::error::StoreError;
use crate::models::*;
use crate::store_trait::RangeRegistry;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Inclusive bounds as written in the configuration file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    pub start: u32,
    pub end: u32,
}

/// Cluster entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClusterConfig {
    pub id: ClusterId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_vcid: Option<RangeBounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_vcid: Option<RangeBounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsi_id: Option<RangeBounds>,
}

/// Region entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegionConfig {
    pub id: RegionId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterId>,
    #[serde(default)]
    pub ip_blocks: Vec<Ipv4Net>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<RangeBounds>,
}

/// Root of the range configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

impl RangeConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(yaml).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&contents)
    }
}

/// In-process registry built from a validated `RangeConfig`
#[derive(Debug, Clone)]
pub struct StaticRangeRegistry {
    regions: HashMap<RegionId, Region>,
    blocks: HashMap<RegionId, Vec<IpBlock>>,
    ranges: HashMap<(Scope, IdKind), IdRange>,
}

fn to_range(bounds: RangeBounds, what: &str) -> Result<IdRange, StoreError> {
    IdRange::new(bounds.start, bounds.end).map_err(|e| StoreError::Config(format!("{}: {}", what, e)))
}

impl StaticRangeRegistry {
    /// Validate and index a configuration
    pub fn from_config(config: RangeConfig) -> Result<Self, StoreError> {
        let mut ranges = HashMap::new();
        let mut clusters = HashMap::new();

        for cluster in &config.clusters {
            if clusters.insert(cluster.id, cluster.name.clone()).is_some() {
                return Err(StoreError::Config(format!("duplicate cluster id {}", cluster.id)));
            }
            let scope = Scope::Cluster(cluster.id);
            for (kind, bounds) in [
                (IdKind::PrimaryVcid, cluster.primary_vcid),
                (IdKind::SecondaryVcid, cluster.secondary_vcid),
                (IdKind::VsiId, cluster.vsi_id),
            ] {
                if let Some(bounds) = bounds {
                    let what = format!("cluster {} {}", cluster.name, kind);
                    ranges.insert((scope, kind), to_range(bounds, &what)?);
                }
            }
        }

        let mut regions = HashMap::new();
        let mut blocks: HashMap<RegionId, Vec<IpBlock>> = HashMap::new();
        let mut seen_networks: HashMap<Ipv4Net, RegionId> = HashMap::new();
        let mut next_block_id = 1i64;

        for region in &config.regions {
            if regions.contains_key(&region.id) {
                return Err(StoreError::Config(format!("duplicate region id {}", region.id)));
            }
            if let Some(cluster) = region.cluster {
                if !clusters.contains_key(&cluster) {
                    return Err(StoreError::Config(format!(
                        "region {} references unknown cluster {}",
                        region.name, cluster
                    )));
                }
            }

            if let Some(bounds) = region.vlan {
                let range = to_range(bounds, &format!("region {} VLAN", region.name))?;
                if range.start() == 0 || range.end() > MAX_VLAN_ID {
                    return Err(StoreError::Config(format!(
                        "region {} VLAN range {} outside 1-{}",
                        region.name, range, MAX_VLAN_ID
                    )));
                }
                ranges.insert((Scope::Region(region.id), IdKind::Vlan), range);
            }

            let mut region_blocks = Vec::with_capacity(region.ip_blocks.len());
            for (position, network) in region.ip_blocks.iter().enumerate() {
                if network.trunc() != *network {
                    return Err(StoreError::Config(format!(
                        "region {} block {} has host bits set",
                        region.name, network
                    )));
                }
                if let Some(owner) = seen_networks.insert(*network, region.id) {
                    return Err(StoreError::Config(format!(
                        "block {} configured for both region {} and region {}",
                        network, owner, region.id
                    )));
                }
                region_blocks.push(IpBlock {
                    id: next_block_id,
                    region_id: region.id,
                    network: *network,
                    position: i32::try_from(position)
                        .map_err(|_| StoreError::Config(format!("too many blocks in region {}", region.name)))?,
                });
                next_block_id += 1;
            }
            debug!("Loaded {} IP block(s) for region {}", region_blocks.len(), region.name);
            blocks.insert(region.id, region_blocks);

            regions.insert(
                region.id,
                Region {
                    id: region.id,
                    name: region.name.clone(),
                    cluster_id: region.cluster,
                },
            );
        }

        info!(
            "Range registry loaded: {} region(s), {} cluster(s), {} id range(s)",
            regions.len(),
            clusters.len(),
            ranges.len()
        );

        Ok(Self { regions, blocks, ranges })
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StoreError> {
        Self::from_config(RangeConfig::from_yaml_str(yaml)?)
    }

    /// Read, parse, and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_config(RangeConfig::from_file(path)?)
    }
}

#[async_trait::async_trait]
impl RangeRegistry for StaticRangeRegistry {
    async fn region(&self, id: RegionId) -> Result<Option<Region>, StoreError> {
        Ok(self.regions.get(&id).cloned())
    }

    async fn ip_blocks(&self, region: RegionId) -> Result<Vec<IpBlock>, StoreError> {
        Ok(self.blocks.get(&region).cloned().unwrap_or_default())
    }

    async fn id_range(&self, scope: Scope, kind: IdKind) -> Result<Option<IdRange>, StoreError> {
        Ok(self.ranges.get(&(scope, kind)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EAST: &str = r#"
clusters:
  - id: 1
    name: metro-north
    primaryVcid: { start: 1000, end: 1100 }
    secondaryVcid: { start: 2000, end: 2100 }
    vsiId: { start: 3000, end: 3100 }
regions:
  - id: 1
    name: East
    cluster: 1
    ipBlocks: ["10.1.1.0/24", "10.1.2.0/24"]
    vlan: { start: 100, end: 200 }
"#;

    #[tokio::test]
    async fn test_load_and_query() {
        let registry = StaticRangeRegistry::from_yaml_str(EAST).unwrap();

        let region = registry.region(RegionId(1)).await.unwrap().unwrap();
        assert_eq!(region.name, "East");
        assert_eq!(region.cluster_id, Some(ClusterId(1)));

        let blocks = registry.ip_blocks(RegionId(1)).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].network.to_string(), "10.1.1.0/24");
        assert_eq!(blocks[1].position, 1);

        let vlan = registry.id_range(Scope::Region(RegionId(1)), IdKind::Vlan).await.unwrap();
        assert_eq!(vlan, Some(IdRange::new(100, 200).unwrap()));

        let vsi = registry.id_range(Scope::Cluster(ClusterId(1)), IdKind::VsiId).await.unwrap();
        assert_eq!(vsi, Some(IdRange::new(3000, 3100).unwrap()));
    }

    #[tokio::test]
    async fn test_unconfigured_range_is_none() {
        let registry = StaticRangeRegistry::from_yaml_str(EAST).unwrap();
        // VLAN is region-scoped; asking the cluster axis finds nothing
        let range = registry.id_range(Scope::Cluster(ClusterId(1)), IdKind::Vlan).await.unwrap();
        assert!(range.is_none());
        assert!(registry.region(RegionId(9)).await.unwrap().is_none());
        assert!(registry.ip_blocks(RegionId(9)).await.unwrap().is_empty());
    }

    #[test]
    fn test_rejects_unknown_cluster_reference() {
        let yaml = r#"
regions:
  - id: 1
    name: East
    cluster: 7
"#;
        let err = StaticRangeRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown cluster"));
    }

    #[test]
    fn test_rejects_vlan_out_of_bounds() {
        let yaml = r#"
regions:
  - id: 1
    name: East
    vlan: { start: 4000, end: 4095 }
"#;
        assert!(StaticRangeRegistry::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let yaml = r#"
clusters:
  - id: 1
    name: metro-north
    vsiId: { start: 3100, end: 3000 }
"#;
        assert!(StaticRangeRegistry::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_rejects_block_with_host_bits() {
        let yaml = r#"
regions:
  - id: 1
    name: East
    ipBlocks: ["10.1.1.7/24"]
"#;
        let err = StaticRangeRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("host bits"));
    }

    #[test]
    fn test_rejects_shared_block() {
        let yaml = r#"
regions:
  - id: 1
    name: East
    ipBlocks: ["10.1.1.0/24"]
  - id: 2
    name: West
    ipBlocks: ["10.1.1.0/24"]
"#;
        assert!(StaticRangeRegistry::from_yaml_str(yaml).is_err());
    }
}
