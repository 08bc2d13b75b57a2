//! /30 point-to-point subnet allocation
//!
//! A /24 block is carved into 64 /30 subnets. A site receives the first
//! usable host (base + 1) of the lowest free /30, scanning blocks in their
//! configured order. Both hosts (.1 and .2) of a /30 belong to the site that
//! holds it, so a /30 counts as taken when either host appears in the ledger.

use crate::error::AllocationError;
use allocation_store::{IpBlock, RegionId, ResourceKind, Scope, StoreTransaction};
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Prefix length of a site subnet
pub const SITE_PREFIX_LEN: u8 = 30;

/// Number of /30 subnets in a /24
pub const SUBNETS_PER_BLOCK: usize = 64;

/// /30 subnets of a block in ascending order
///
/// Blocks that are not /24 yield nothing.
pub fn site_subnets(block: Ipv4Net) -> impl Iterator<Item = Ipv4Net> {
    let subnets = if block.prefix_len() == 24 {
        block.subnets(SITE_PREFIX_LEN).ok()
    } else {
        None
    };
    subnets.into_iter().flatten()
}

/// Whether neither usable host of a /30 is assigned
fn is_free(subnet: Ipv4Net, used: &HashSet<Ipv4Addr>) -> bool {
    let base = u32::from(subnet.network());
    !used.contains(&Ipv4Addr::from(base + 1)) && !used.contains(&Ipv4Addr::from(base + 2))
}

/// First usable host of the lowest free /30 in `block`
#[must_use]
pub fn first_free_host(block: Ipv4Net, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    site_subnets(block)
        .find(|subnet| is_free(*subnet, used))
        .map(|subnet| Ipv4Addr::from(u32::from(subnet.network()) + 1))
}

/// Number of free /30 subnets in `block`
#[must_use]
pub fn free_subnet_count(block: Ipv4Net, used: &HashSet<Ipv4Addr>) -> usize {
    site_subnets(block).filter(|subnet| is_free(*subnet, used)).count()
}

/// The /30 that an assigned address belongs to
#[must_use]
pub fn point_to_point_subnet(ip: Ipv4Addr) -> Ipv4Net {
    // Prefix 30 is always valid for IPv4
    Ipv4Net::new(ip, SITE_PREFIX_LEN).map_or_else(|_| Ipv4Net::from(ip), |net| net.trunc())
}

/// Allocates site subnets from a region's blocks
#[derive(Debug, Default, Clone, Copy)]
pub struct SubnetAllocator;

impl SubnetAllocator {
    /// Lowest free /30 across `blocks`, in order
    ///
    /// Must run inside a transaction holding the region lock; the returned
    /// address is only reserved once the caller inserts it.
    pub async fn allocate(
        &self,
        tx: &mut dyn StoreTransaction,
        region: RegionId,
        blocks: &[IpBlock],
    ) -> Result<Ipv4Addr, AllocationError> {
        for block in blocks {
            if !block.is_subnettable() {
                warn!("Skipping block {}: only /24 blocks are subnetted", block.network);
                continue;
            }

            let used = tx.used_addresses(block.network).await?;
            if let Some(ip) = first_free_host(block.network, &used) {
                debug!("Selected {} from block {} ({} in use)", ip, block.network, used.len());
                return Ok(ip);
            }
            debug!("Block {} is full", block.network);
        }

        Err(AllocationError::ResourceExhausted {
            scope: Scope::Region(region),
            resource: ResourceKind::Subnet,
        })
    }
}
