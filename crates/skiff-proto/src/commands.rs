//! Typed broker commands and their replies.
//!
//! Each variant of [`Command`] is one broker operation. Operations the
//! location waits on have a matching reply struct; the rest are
//! fire-and-forget.

use serde::{Deserialize, Serialize};

use crate::types::{
    ClusterId, ContainerId, ImageDescription, NodeId, ProxyId, TunnelId, VolumeId, WriteMode,
};

/// The set of containers published together behind one web endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Member containers.
    pub containers: Vec<ContainerId>,
    /// Optional path rewrite rule applied by the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
}

/// Commands sent from the location to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params", rename_all = "snake_case")]
pub enum Command {
    /// Keepalive.
    Heartbeat,
    /// Create a volume.
    CreateVolume {
        /// Globally visible tag.
        tag: Option<String>,
        /// Write mode.
        mode: WriteMode,
    },
    /// Destroy a volume.
    DestroyVolume {
        /// Volume to destroy.
        volume: VolumeId,
    },
    /// Resolve a container tag advertised by another session.
    FindTag {
        /// The tag.
        tag: String,
    },
    /// Ask the broker for a cached image description.
    DescribeImage {
        /// Short id or `name:tag`.
        image_id: String,
    },
    /// Store an image description on the broker.
    CacheDescription {
        /// Short id or `name:tag`.
        image_id: String,
        /// The description to cache.
        description: ImageDescription,
    },
    /// Ask which of the given layers the broker does not hold yet.
    UploadRequirements {
        /// Layer sha256 digests.
        layers: Vec<String>,
    },
    /// Upload one layer.
    UploadLayer {
        /// Layer sha256 digest.
        sha256: String,
        /// Layer tarball.
        #[serde(with = "crate::b64")]
        data: Vec<u8>,
    },
    /// Spawn a container on a node.
    SpawnContainer {
        /// Target node.
        node: NodeId,
        /// Image to run.
        image: String,
        /// Optional tag advertising the container to other sessions.
        tag: Option<String>,
    },
    /// Destroy a container.
    DestroyContainer {
        /// Owning node.
        node: NodeId,
        /// Container to destroy.
        container: ContainerId,
    },
    /// Wait until a TCP port accepts connections inside a container.
    WaitTcp {
        /// Target container.
        container: ContainerId,
        /// Port inside the container.
        port: u16,
    },
    /// Create a tunnel onto a container port.
    CreateTunnel {
        /// Tunnel id chosen by the client.
        tunnel: TunnelId,
        /// Owning node.
        node: NodeId,
        /// Target container.
        container: ContainerId,
        /// Port inside the container.
        port: u16,
        /// Seconds the broker may take to reach the port.
        timeout_secs: u64,
    },
    /// Destroy a tunnel.
    DestroyTunnel {
        /// Tunnel to destroy.
        tunnel: TunnelId,
    },
    /// Bytes from a local client towards the container.
    ToProxy {
        /// Owning tunnel.
        tunnel: TunnelId,
        /// Proxied connection.
        proxy: ProxyId,
        /// Payload.
        #[serde(with = "crate::b64")]
        data: Vec<u8>,
    },
    /// A local client closed its connection.
    CloseProxy {
        /// Owning tunnel.
        tunnel: TunnelId,
        /// Proxied connection.
        proxy: ProxyId,
    },
    /// Publish a cluster on a web endpoint.
    PublishWeb {
        /// Endpoint domain.
        domain: String,
        /// Subdomain within the endpoint domain (empty for the apex).
        subdomain: String,
        /// The cluster.
        cluster: ClusterSpec,
        /// Concatenated PEM certificate, key and intermediates.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ssl: Option<String>,
    },
    /// Remove a published cluster.
    UnpublishWeb {
        /// Cluster to remove.
        cluster: ClusterId,
    },
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::CreateVolume { .. } => "create_volume",
            Self::DestroyVolume { .. } => "destroy_volume",
            Self::FindTag { .. } => "find_tag",
            Self::DescribeImage { .. } => "describe_image",
            Self::CacheDescription { .. } => "cache_description",
            Self::UploadRequirements { .. } => "upload_requirements",
            Self::UploadLayer { .. } => "upload_layer",
            Self::SpawnContainer { .. } => "spawn_container",
            Self::DestroyContainer { .. } => "destroy_container",
            Self::WaitTcp { .. } => "wait_tcp",
            Self::CreateTunnel { .. } => "create_tunnel",
            Self::DestroyTunnel { .. } => "destroy_tunnel",
            Self::ToProxy { .. } => "to_proxy",
            Self::CloseProxy { .. } => "close_proxy",
            Self::PublishWeb { .. } => "publish_web",
            Self::UnpublishWeb { .. } => "unpublish_web",
        }
    }
}

/// Reply to [`Command::CreateVolume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeReply {
    /// The new volume.
    pub volume: VolumeId,
}

/// Reply to [`Command::FindTag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindTagReply {
    /// The tagged container.
    pub container: ContainerId,
    /// Node it runs on.
    pub node: NodeId,
    /// Container ip.
    pub ip: String,
}

/// Reply to [`Command::DescribeImage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeImageReply {
    /// Cached description, if the broker has one.
    pub description: Option<ImageDescription>,
}

/// Reply to [`Command::UploadRequirements`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequirementsReply {
    /// Layers the broker still needs.
    pub missing: Vec<String>,
}

/// Reply to [`Command::SpawnContainer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnContainerReply {
    /// The new container.
    pub container: ContainerId,
    /// Its ip on the node network.
    pub ip: String,
}

/// Reply to [`Command::PublishWeb`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReply {
    /// Id the broker assigned to the cluster.
    pub cluster: ClusterId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shape() {
        let cmd = Command::WaitTcp {
            container: ContainerId::new(),
            port: 80,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["cmd"], "wait_tcp");
        assert_eq!(value["params"]["port"], 80);
        assert_eq!(value["cmd"], cmd.name());
    }

    #[test]
    fn test_unit_command_has_no_params() {
        let value = serde_json::to_value(Command::Heartbeat).unwrap();
        assert_eq!(value["cmd"], "heartbeat");
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_layer_data_is_base64() {
        let cmd = Command::UploadLayer {
            sha256: "abc".into(),
            data: vec![0, 1, 2],
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["params"]["data"], "AAEC");
        let back: Command = serde_json::from_value(value).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_publish_omits_empty_ssl() {
        let cmd = Command::PublishWeb {
            domain: "example.com".into(),
            subdomain: "www".into(),
            cluster: ClusterSpec {
                containers: vec![ContainerId::new()],
                rewrite: None,
            },
            ssl: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(!json.contains("ssl"));
        assert!(!json.contains("rewrite"));
    }

    #[test]
    fn test_names_match_serde_tags() {
        let commands = vec![
            Command::Heartbeat,
            Command::DestroyVolume {
                volume: VolumeId::new(),
            },
            Command::FindTag { tag: "x".into() },
            Command::UnpublishWeb {
                cluster: ClusterId::new(),
            },
            Command::CloseProxy {
                tunnel: TunnelId::new(),
                proxy: ProxyId::new(),
            },
        ];
        for cmd in commands {
            let value = serde_json::to_value(&cmd).unwrap();
            assert_eq!(value["cmd"], cmd.name());
        }
    }
}
