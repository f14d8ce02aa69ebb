//! Error types for skiff-location.

use std::time::Duration;

use skiff_proto::{ContainerId, NodeId, ProxyId, TunnelId};
use thiserror::Error;

/// Errors that can occur in location operations.
#[derive(Debug, Error)]
pub enum LocationError {
    /// Could not reach the broker.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker refused the handshake.
    #[error("broker rejected the session: {0}")]
    Rejected(String),

    /// Key material could not be loaded or used.
    #[error("key error: {0}")]
    Keys(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The broker sent something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// No resource offer arrived in time.
    #[error("no resource offer received within {0:?}")]
    NotReady(Duration),

    /// A blocking command got no reply in time.
    #[error("command {command} timed out after {timeout:?}")]
    Timeout {
        /// Command wire name.
        command: &'static str,
        /// How long we waited.
        timeout: Duration,
    },

    /// The broker answered a command with an error.
    #[error("command {command} failed: {message}")]
    Broker {
        /// Command wire name.
        command: &'static str,
        /// Message from the broker.
        message: String,
    },

    /// The location has no nodes.
    #[error("the location has no nodes")]
    NoNodes,

    /// A node is not known to the location.
    #[error("unknown node: {0}")]
    NodeNotFound(NodeId),

    /// A container is not known to the location.
    #[error("unknown container: {0}")]
    ContainerNotFound(ContainerId),

    /// A container died before it became ready.
    #[error("container {0} is dead")]
    ContainerDead(ContainerId),

    /// A container did not start in time.
    #[error("container {container} not running after {timeout:?}")]
    ContainerNotReady {
        /// The container.
        container: ContainerId,
        /// How long we waited.
        timeout: Duration,
    },

    /// No volume matches the key.
    #[error("no volume with uuid or tag: {0}")]
    VolumeNotFound(String),

    /// The tag is already used by another volume.
    #[error("tag already in use: {0}")]
    TagInUse(String),

    /// The tag is not acceptable.
    #[error("invalid tag '{tag}': {reason}")]
    InvalidTag {
        /// The rejected tag.
        tag: String,
        /// Why.
        reason: &'static str,
    },

    /// No endpoint serves the fqdn.
    #[error("there is no endpoint capable of serving: {0}")]
    NoEndpoint(String),

    /// The fqdn is not inside the endpoint domain.
    #[error("fqdn {fqdn} is not within domain {domain}")]
    OutsideDomain {
        /// Requested fqdn.
        fqdn: String,
        /// Endpoint domain.
        domain: String,
    },

    /// The cluster has not been published.
    #[error("cluster has not been published")]
    NotPublished,

    /// A tunnel was torn down through the wrong container.
    #[error("tunnel {tunnel} is connected to a different container than {container}")]
    TunnelOwnership {
        /// The tunnel.
        tunnel: TunnelId,
        /// The container that tried to destroy it.
        container: ContainerId,
    },

    /// No tunnel with this id.
    #[error("unknown tunnel: {0}")]
    UnknownTunnel(TunnelId),

    /// No proxy with this id inside the tunnel.
    #[error("unknown proxy: {0}")]
    UnknownProxy(ProxyId),

    /// An fqdn used for local polling does not resolve to localhost.
    #[error("fqdn '{0}' does not resolve to localhost")]
    NotLocalhost(String),

    /// A URL never answered 200.
    #[error("could not connect to: {url}")]
    HttpNotReady {
        /// The polled URL.
        url: String,
    },

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(String),

    /// A layer could not be uploaded.
    #[error("layer {sha256}: {reason}")]
    Layer {
        /// Layer digest.
        sha256: String,
        /// Why.
        reason: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<skiff_proto::ProtoError> for LocationError {
    fn from(err: skiff_proto::ProtoError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for LocationError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LocationError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Result type for location operations.
pub type Result<T> = std::result::Result<T, LocationError>;
