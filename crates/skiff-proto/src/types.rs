//! Core types shared by the location client and the broker.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ProtoError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Create a new random `", stringify!($name), "`.")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Parse a `", stringify!($name), "` from a string.")]
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not a valid UUID.
            pub fn parse(s: &str) -> Result<Self, ProtoError> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ProtoError::Validation(format!(concat!("invalid ", $what, " ID: {}"), e)))
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a compute node owned by the broker.
    NodeId,
    "node"
);
uuid_id!(
    /// Identifier of a container spawned on a node.
    ContainerId,
    "container"
);
uuid_id!(
    /// Identifier of a persistent volume.
    VolumeId,
    "volume"
);
uuid_id!(
    /// Identifier of a tunnel onto a container port.
    TunnelId,
    "tunnel"
);
uuid_id!(
    /// Identifier of one proxied connection inside a tunnel.
    ProxyId,
    "proxy"
);
uuid_id!(
    /// Identifier the broker assigns to a published cluster.
    ClusterId,
    "cluster"
);

/// Live resource statistics for a node.
///
/// All three figures are reported by the broker on a common scale; higher
/// `cpu` and `memory` mean more headroom, higher `paging` means more pressure.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeStats {
    /// Available processor capacity.
    pub cpu: f64,
    /// Available memory.
    pub memory: f64,
    /// Paging activity.
    pub paging: f64,
}

impl NodeStats {
    /// Create a stats record.
    #[must_use]
    pub const fn new(cpu: f64, memory: f64, paging: f64) -> Self {
        Self { cpu, memory, paging }
    }

    /// Ranking score: `cpu + memory - 10 * paging`.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.cpu + self.memory - 10.0 * self.paging
    }
}

/// Write mode of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Writes are acknowledged once durable.
    Sync,
    /// Writes are acknowledged before they reach disk.
    #[default]
    Async,
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Spawn requested, not yet running.
    #[default]
    Pending,
    /// Running and reachable.
    Running,
    /// Exited or destroyed.
    Dead,
}

/// Filesystem section of an image description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RootFs {
    /// Layer content hashes, base layer first.
    #[serde(rename = "Layers", default)]
    pub layers: Vec<String>,
}

/// Description of a container image in `docker inspect` shape.
///
/// Only the layer stack is interpreted; every other field is carried along
/// untouched so the broker can cache the full description.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageDescription {
    /// Root filesystem layers.
    #[serde(rename = "RootFS", default)]
    pub root_fs: RootFs,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageDescription {
    /// Build a description from a list of layer hashes.
    #[must_use]
    pub fn from_layers<I, S>(layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root_fs: RootFs {
                layers: layers.into_iter().map(Into::into).collect(),
            },
            extra: Map::new(),
        }
    }

    /// The layer stack as plain sha256 hex digests, base layer first.
    #[must_use]
    pub fn layer_stack(&self) -> Vec<String> {
        self.root_fs
            .layers
            .iter()
            .map(|l| l.strip_prefix("sha256:").unwrap_or(l).to_string())
            .collect()
    }
}
