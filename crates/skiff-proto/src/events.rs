//! Unsolicited notifications pushed by the broker.

use serde::{Deserialize, Serialize};

use crate::types::{ContainerId, ContainerStatus, NodeId, NodeStats, ProxyId, TunnelId, VolumeId};

/// A web domain the broker can serve for this account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainOffer {
    /// The domain, e.g. `apps.example.com`.
    pub domain: String,
}

/// A node in the resource offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOffer {
    /// Node id.
    pub node: NodeId,
    /// Current statistics.
    pub stats: NodeStats,
}

/// A volume that already exists for this account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOffer {
    /// Volume id.
    pub uuid: VolumeId,
    /// Optional tag.
    #[serde(default)]
    pub tag: Option<String>,
}

/// Pushes from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params", rename_all = "snake_case")]
pub enum Push {
    /// Initial description of everything this session can use.
    ResourceOffer {
        /// Servable domains.
        #[serde(default)]
        domains: Vec<DomainOffer>,
        /// Available nodes.
        #[serde(default)]
        nodes: Vec<NodeOffer>,
        /// Existing volumes.
        #[serde(default)]
        volumes: Vec<VolumeOffer>,
    },
    /// Fresh statistics for a node.
    UpdateStats {
        /// Node id.
        node: NodeId,
        /// New statistics.
        stats: NodeStats,
    },
    /// A node left the pool.
    NodeDestroyed {
        /// Node id.
        node: NodeId,
    },
    /// A container changed state.
    ContainerStatus {
        /// Owning node.
        node: NodeId,
        /// Container id.
        container: ContainerId,
        /// New status.
        status: ContainerStatus,
    },
    /// Bytes from the container towards a local client.
    FromProxy {
        /// Owning tunnel.
        tunnel: TunnelId,
        /// Proxied connection.
        proxy: ProxyId,
        /// Payload.
        #[serde(with = "crate::b64")]
        data: Vec<u8>,
    },
    /// The container side closed a proxied connection.
    CloseProxy {
        /// Owning tunnel.
        tunnel: TunnelId,
        /// Proxied connection.
        proxy: ProxyId,
    },
    /// A log line emitted by the broker for this session.
    Log {
        /// Whether this is an error.
        error: bool,
        /// The line.
        log: String,
    },
}

impl Push {
    /// Wire name of the push.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ResourceOffer { .. } => "resource_offer",
            Self::UpdateStats { .. } => "update_stats",
            Self::NodeDestroyed { .. } => "node_destroyed",
            Self::ContainerStatus { .. } => "container_status",
            Self::FromProxy { .. } => "from_proxy",
            Self::CloseProxy { .. } => "close_proxy",
            Self::Log { .. } => "log",
        }
    }
}
