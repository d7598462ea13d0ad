//! NUMA Topology
//!
//! Which tier each location id belongs to, and where pages on it migrate.
//! Built from the `[numa]` config section; the crate never reads sysfs.

use serde::{Deserialize, Serialize};

use crate::error::{TierError, TierResult};
use crate::page::LocationId;

/// Memory tier of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// DRAM-like
    #[serde(alias = "dram")]
    Fast,
    /// PMEM-like
    #[serde(alias = "pmem")]
    Capacity,
}

impl Tier {
    pub fn other(self) -> Tier {
        match self {
            Tier::Fast => Tier::Capacity,
            Tier::Capacity => Tier::Fast,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Fast => f.write_str("fast"),
            Tier::Capacity => f.write_str("capacity"),
        }
    }
}

/// One configured node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: u8,
    pub tier: Tier,
    /// Migration target for pages on this node
    #[serde(default)]
    pub peer: Option<u8>,
}

/// Node table indexed by location id
#[derive(Debug, Clone)]
pub struct NumaTopology {
    table: Vec<Option<NodeSpec>>,
    nodes: Vec<NodeSpec>,
}

impl NumaTopology {
    /// Build and validate a topology
    ///
    /// Peers must exist and sit in the other tier. Node 255 is reserved for
    /// the unknown location.
    pub fn new(nodes: &[NodeSpec]) -> TierResult<Self> {
        let mut table = vec![None; LocationId::UNKNOWN.as_u8() as usize];

        for node in nodes {
            let slot = table
                .get_mut(node.id as usize)
                .ok_or_else(|| TierError::Config(format!("node id {} is reserved", node.id)))?;
            if slot.is_some() {
                return Err(TierError::Config(format!("node {} listed twice", node.id)));
            }
            *slot = Some(*node);
        }

        for node in nodes {
            let Some(peer) = node.peer else { continue };
            match table.get(peer as usize).copied().flatten() {
                Some(peer_node) if peer_node.tier != node.tier => {}
                Some(_) => {
                    return Err(TierError::Config(format!(
                        "node {} and its peer {} are both {} tier",
                        node.id, peer, node.tier
                    )))
                }
                None => {
                    return Err(TierError::Config(format!(
                        "node {} names unknown peer {}",
                        node.id, peer
                    )))
                }
            }
        }

        Ok(Self {
            table,
            nodes: nodes.to_vec(),
        })
    }

    /// Node 0 fast, node 1 capacity, paired with each other
    pub fn two_node() -> Self {
        let nodes = [
            NodeSpec {
                id: 0,
                tier: Tier::Fast,
                peer: Some(1),
            },
            NodeSpec {
                id: 1,
                tier: Tier::Capacity,
                peer: Some(0),
            },
        ];
        let mut table = vec![None; LocationId::UNKNOWN.as_u8() as usize];
        for node in nodes {
            table[node.id as usize] = Some(node);
        }
        Self {
            table,
            nodes: nodes.to_vec(),
        }
    }

    fn lookup(&self, location: LocationId) -> Option<&NodeSpec> {
        self.table.get(location.as_u8() as usize)?.as_ref()
    }

    pub fn tier_of(&self, location: LocationId) -> Option<Tier> {
        self.lookup(location).map(|n| n.tier)
    }

    pub fn peer_of(&self, location: LocationId) -> Option<LocationId> {
        self.lookup(location)?.peer.map(LocationId::new)
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn nodes_in(&self, tier: Tier) -> impl Iterator<Item = LocationId> + '_ {
        self.nodes
            .iter()
            .filter(move |n| n.tier == tier)
            .map(|n| LocationId::new(n.id))
    }
}

impl Default for NumaTopology {
    fn default() -> Self {
        Self::two_node()
    }
}
